//! Wire codec for envelopes, node responses, and receipts.
//!
//! The byte layout is fixed: everything above this module only ever handles the encoded
//! bytes, never the structs.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    chunk::ChunkInfo,
    identity::{NodeId, TransactionId},
    signing::PublicKey,
    status::Status,
};

/// Encode/decode failures.
#[derive(Debug, Error)]
pub enum WireError {
    /// Value could not be encoded.
    #[error("failed to encode {what}: {source}")]
    Encode {
        /// Name of the value being encoded.
        what: &'static str,
        /// Bincode error.
        source: Box<bincode::ErrorKind>,
    },
    /// Bytes did not decode into the expected value.
    #[error("failed to decode {what}: {source}")]
    Decode {
        /// Name of the value being decoded.
        what: &'static str,
        /// Bincode error.
        source: Box<bincode::ErrorKind>,
    },
}

/// Body signed by every signer of a transaction.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionBody {
    /// Logical request identity.
    pub transaction_id: TransactionId,
    /// Node this copy of the body is addressed to.
    pub node_id: NodeId,
    /// Free-form memo.
    pub memo: String,
    /// Seconds after the valid start during which the body may reach consensus.
    pub valid_duration_secs: u64,
    /// Chunk position for multi-chunk requests.
    pub chunk_info: Option<ChunkInfo>,
    /// Operation name, interpreted by the node.
    pub operation: String,
    /// Operation-specific payload bytes.
    pub data: Vec<u8>,
}

/// One signature over a body.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignaturePair {
    /// Key that produced the signature.
    pub public_key: PublicKey,
    /// Raw signature bytes.
    pub signature: Vec<u8>,
}

/// Envelope sent to a node: encoded body plus its signatures.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Encoded [`TransactionBody`]; this exact byte string is what was signed.
    pub body_bytes: Vec<u8>,
    /// Signatures keyed by public key, in key order.
    pub signatures: Vec<SignaturePair>,
}

/// Query for the receipt of an accepted transaction.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRequest {
    /// Transaction whose receipt is requested.
    pub transaction_id: TransactionId,
}

/// Response returned by a node for any request.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeResponse {
    /// Precheck status.
    pub status: Status,
    /// Encoded result (a [`TransactionReceipt`] for receipt queries, empty otherwise).
    pub payload: Vec<u8>,
}

/// Definitive (or not-yet-known) outcome of a transaction.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Consensus status.
    pub status: Status,
    /// Transaction the receipt belongs to.
    pub transaction_id: TransactionId,
    /// Operation-specific result bytes.
    pub data: Vec<u8>,
}

/// Encodes one wire value.
///
/// # Errors
///
/// Returns [`WireError::Encode`] when bincode rejects the value.
pub fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, WireError> {
    bincode::serialize(value).map_err(|source| WireError::Encode { what, source })
}

/// Decodes one wire value.
///
/// # Errors
///
/// Returns [`WireError::Decode`] when the bytes are not a valid encoding of `T`.
pub fn decode<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, WireError> {
    bincode::deserialize(bytes).map_err(|source| WireError::Decode { what, source })
}
