//! Protocol status codes returned by nodes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome code carried by every node response and every receipt.
///
/// Codes this crate does not name are preserved as [`Status::Other`] so a caller can still
/// see the exact value a node returned.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Status {
    /// Request passed precheck and was accepted for processing.
    Ok,
    /// Request body could not be parsed or is structurally invalid.
    InvalidTransaction,
    /// Payer account does not exist.
    PayerAccountNotFound,
    /// Envelope names a node other than the one it was sent to.
    InvalidNodeAccount,
    /// Valid-start plus valid-duration is already in the past.
    TransactionExpired,
    /// Valid start is too far in the future.
    InvalidTransactionStart,
    /// A required signature is missing or wrong.
    InvalidSignature,
    /// Offered fee is below the node's price.
    InsufficientTxFee,
    /// Payer cannot cover the fee.
    InsufficientPayerBalance,
    /// A request with this transaction id was already accepted.
    DuplicateTransaction,
    /// Node is overloaded; try the same node again shortly.
    Busy,
    /// Outcome not known yet.
    Unknown,
    /// Request reached consensus and succeeded.
    Success,
    /// No receipt exists (yet) for the requested transaction id.
    ReceiptNotFound,
    /// No record exists for the requested transaction id.
    RecordNotFound,
    /// Node accepted the request but could not hand it to consensus.
    PlatformTransactionNotCreated,
    /// Node is not yet participating in consensus.
    PlatformNotActive,
    /// Chunked request declared more chunks than the network allows.
    MaxChunksExceeded,
    /// Any code without a named variant.
    Other(i32),
}

impl Status {
    /// Returns the numeric wire code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::InvalidTransaction => 1,
            Self::PayerAccountNotFound => 2,
            Self::InvalidNodeAccount => 3,
            Self::TransactionExpired => 4,
            Self::InvalidTransactionStart => 5,
            Self::InvalidSignature => 7,
            Self::InsufficientTxFee => 9,
            Self::InsufficientPayerBalance => 10,
            Self::DuplicateTransaction => 11,
            Self::Busy => 12,
            Self::ReceiptNotFound => 18,
            Self::RecordNotFound => 19,
            Self::Unknown => 21,
            Self::Success => 22,
            Self::PlatformTransactionNotCreated => 23,
            Self::PlatformNotActive => 33,
            Self::MaxChunksExceeded => 267,
            Self::Other(code) => code,
        }
    }

    /// Returns true for codes that mean "accepted" (`Ok` at precheck, `Success` in receipts).
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::Success)
    }

    /// Returns true when the node is temporarily unable to serve and the same node should be
    /// asked again after a delay.
    #[must_use]
    pub const fn is_node_busy(self) -> bool {
        matches!(
            self,
            Self::Busy | Self::PlatformNotActive | Self::PlatformTransactionNotCreated
        )
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::InvalidTransaction,
            2 => Self::PayerAccountNotFound,
            3 => Self::InvalidNodeAccount,
            4 => Self::TransactionExpired,
            5 => Self::InvalidTransactionStart,
            7 => Self::InvalidSignature,
            9 => Self::InsufficientTxFee,
            10 => Self::InsufficientPayerBalance,
            11 => Self::DuplicateTransaction,
            12 => Self::Busy,
            18 => Self::ReceiptNotFound,
            19 => Self::RecordNotFound,
            21 => Self::Unknown,
            22 => Self::Success,
            23 => Self::PlatformTransactionNotCreated,
            33 => Self::PlatformNotActive,
            267 => Self::MaxChunksExceeded,
            other => Self::Other(other),
        }
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::InvalidTransaction => "INVALID_TRANSACTION",
            Self::PayerAccountNotFound => "PAYER_ACCOUNT_NOT_FOUND",
            Self::InvalidNodeAccount => "INVALID_NODE_ACCOUNT",
            Self::TransactionExpired => "TRANSACTION_EXPIRED",
            Self::InvalidTransactionStart => "INVALID_TRANSACTION_START",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InsufficientTxFee => "INSUFFICIENT_TX_FEE",
            Self::InsufficientPayerBalance => "INSUFFICIENT_PAYER_BALANCE",
            Self::DuplicateTransaction => "DUPLICATE_TRANSACTION",
            Self::Busy => "BUSY",
            Self::Unknown => "UNKNOWN",
            Self::Success => "SUCCESS",
            Self::ReceiptNotFound => "RECEIPT_NOT_FOUND",
            Self::RecordNotFound => "RECORD_NOT_FOUND",
            Self::PlatformTransactionNotCreated => "PLATFORM_TRANSACTION_NOT_CREATED",
            Self::PlatformNotActive => "PLATFORM_NOT_ACTIVE",
            Self::MaxChunksExceeded => "MAX_CHUNKS_EXCEEDED",
            Self::Other(code) => return write!(f, "STATUS_{code}"),
        };
        f.write_str(name)
    }
}
