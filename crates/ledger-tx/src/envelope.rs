//! Per-node signed envelopes sharing one logical request identity.
//!
//! A request template is turned into one [`SignedEnvelope`] per candidate node. The encoded
//! bodies differ only in the destination node field. Envelopes live in an [`EnvelopeSet`]
//! addressed by node position, the same position the execution engine's node cursor uses.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use crate::{
    builder::BuilderError,
    chunk::ChunkInfo,
    identity::{NodeId, TransactionId},
    signing::{PublicKey, SignerRef},
    wire::{self, SignaturePair, SignedTransaction, TransactionBody, WireError},
};

/// Node-independent body fields of one request (or one chunk of it).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BodyTemplate {
    /// Operation name.
    pub operation: String,
    /// Free-form memo.
    pub memo: String,
    /// Validity window after the valid start.
    pub valid_duration: Duration,
    /// Chunk position, for multi-chunk requests.
    pub chunk_info: Option<ChunkInfo>,
    /// Operation payload bytes.
    pub data: Vec<u8>,
}

impl BodyTemplate {
    /// Produces the body addressed to `node_id`.
    #[must_use]
    pub fn body_for(&self, transaction_id: TransactionId, node_id: NodeId) -> TransactionBody {
        TransactionBody {
            transaction_id,
            node_id,
            memo: self.memo.clone(),
            valid_duration_secs: self.valid_duration.as_secs(),
            chunk_info: self.chunk_info,
            operation: self.operation.clone(),
            data: self.data.clone(),
        }
    }
}

/// Encoded body for one node plus the signatures collected for it.
///
/// The body bytes never change. Adding a signature after the wire form was built discards
/// the cached wire bytes so the next send re-serializes instead of reusing stale bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SignedEnvelope {
    /// Destination node.
    node_id: NodeId,
    /// Encoded [`TransactionBody`].
    body_bytes: Vec<u8>,
    /// Signatures over `body_bytes`, keyed by signer.
    signatures: BTreeMap<PublicKey, Vec<u8>>,
    /// Cached encoded [`SignedTransaction`].
    wire: Option<Vec<u8>>,
}

impl SignedEnvelope {
    /// Wraps already-encoded body bytes.
    fn new(node_id: NodeId, body_bytes: Vec<u8>) -> Self {
        Self {
            node_id,
            body_bytes,
            signatures: BTreeMap::new(),
            wire: None,
        }
    }

    /// Returns the destination node.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the exact bytes signers sign.
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body_bytes
    }

    /// Decodes the body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Decode`] if the stored bytes are corrupt.
    pub fn body(&self) -> Result<TransactionBody, WireError> {
        wire::decode("transaction body", &self.body_bytes)
    }

    /// Returns the keys that have signed this envelope.
    pub fn signers(&self) -> impl Iterator<Item = &PublicKey> {
        self.signatures.keys()
    }

    /// Returns true when `public_key` has signed this envelope.
    #[must_use]
    pub fn is_signed_by(&self, public_key: &PublicKey) -> bool {
        self.signatures.contains_key(public_key)
    }

    /// Signs the body with `signer`; returns false if that key already signed.
    pub fn sign(&mut self, signer: SignerRef<'_>) -> bool {
        let signer = signer.as_signer();
        let public_key = signer.public_key();
        if self.is_signed_by(&public_key) {
            return false;
        }
        let signature = signer.sign(&self.body_bytes);
        self.add_signature(public_key, signature)
    }

    /// Adds an externally produced signature; returns false if that key already signed.
    pub fn add_signature(&mut self, public_key: PublicKey, signature: Vec<u8>) -> bool {
        if self.is_signed_by(&public_key) {
            return false;
        }
        let _ = self.signatures.insert(public_key, signature);
        self.wire = None;
        true
    }

    /// Returns true when the wire form is built and current.
    #[must_use]
    pub const fn is_serialized(&self) -> bool {
        self.wire.is_some()
    }

    /// Returns the wire form, encoding it on first use after any signature change.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Encode`] when encoding fails.
    pub fn wire_bytes(&mut self) -> Result<&[u8], WireError> {
        if self.wire.is_none() {
            let signed = SignedTransaction {
                body_bytes: self.body_bytes.clone(),
                signatures: self
                    .signatures
                    .iter()
                    .map(|(public_key, signature)| SignaturePair {
                        public_key: *public_key,
                        signature: signature.clone(),
                    })
                    .collect(),
            };
            self.wire = Some(wire::encode("signed transaction", &signed)?);
        }
        Ok(self.wire.as_deref().unwrap_or_default())
    }
}

/// Fixed-size, position-addressed envelopes of one logical request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EnvelopeSet {
    /// Identity shared by every envelope.
    transaction_id: TransactionId,
    /// One envelope per candidate node, in candidate order.
    envelopes: Vec<SignedEnvelope>,
}

impl EnvelopeSet {
    /// Returns the shared identity.
    #[must_use]
    pub const fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Returns the number of envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// Returns true when there are no envelopes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Returns candidate nodes in envelope order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.envelopes.iter().map(SignedEnvelope::node_id).collect()
    }

    /// Returns the envelope at `position`.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&SignedEnvelope> {
        self.envelopes.get(position)
    }

    /// Returns the envelope at `position` mutably.
    pub fn get_mut(&mut self, position: usize) -> Option<&mut SignedEnvelope> {
        self.envelopes.get_mut(position)
    }

    /// Returns the envelope addressed to `node_id`.
    #[must_use]
    pub fn for_node(&self, node_id: NodeId) -> Option<&SignedEnvelope> {
        self.envelopes
            .iter()
            .find(|envelope| envelope.node_id == node_id)
    }

    /// Iterates envelopes in candidate order.
    pub fn iter(&self) -> impl Iterator<Item = &SignedEnvelope> {
        self.envelopes.iter()
    }

    /// Iterates envelopes mutably in candidate order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SignedEnvelope> {
        self.envelopes.iter_mut()
    }

    /// Signs every envelope with `signer`; returns how many were newly signed.
    pub fn sign(&mut self, signer: SignerRef<'_>) -> usize {
        self.envelopes
            .iter_mut()
            .map(|envelope| envelope.sign(signer))
            .filter(|signed| *signed)
            .count()
    }

    /// Returns every key that signed at least one envelope.
    #[must_use]
    pub fn signers(&self) -> BTreeSet<PublicKey> {
        self.envelopes
            .iter()
            .flat_map(|envelope| envelope.signers().copied())
            .collect()
    }
}

/// Builds one unsigned envelope per node for `transaction_id`.
///
/// # Errors
///
/// Returns [`BuilderError::EmptyNodeList`] for an empty `node_ids`, or
/// [`BuilderError::Wire`] when a body fails to encode.
pub fn build_envelopes(
    template: &BodyTemplate,
    transaction_id: TransactionId,
    node_ids: &[NodeId],
) -> Result<EnvelopeSet, BuilderError> {
    if node_ids.is_empty() {
        return Err(BuilderError::EmptyNodeList);
    }
    let envelopes = node_ids
        .iter()
        .map(|node_id| {
            let body = template.body_for(transaction_id, *node_id);
            wire::encode("transaction body", &body)
                .map(|bytes| SignedEnvelope::new(*node_id, bytes))
                .map_err(|source| BuilderError::Wire { source })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(EnvelopeSet {
        transaction_id,
        envelopes,
    })
}
