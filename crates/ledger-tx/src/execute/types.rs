//! Shared execution types, errors, and the node transport boundary.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    backoff::{BackoffError, BackoffPolicy},
    builder::BuilderError,
    identity::{NodeId, TransactionId},
    status::Status,
    wire::WireError,
};

/// Default attempt budget per logical request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default bound on one send/receive.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry and deadline tuning for one execution.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ExecutionConfig {
    /// Delay schedule for same-node retries.
    backoff: BackoffPolicy,
    /// Maximum attempts, counting the first.
    max_attempts: u32,
    /// Optional bound on each send/receive.
    attempt_timeout: Option<Duration>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
        }
    }
}

impl ExecutionConfig {
    /// Sets backoff bounds.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError::MinExceedsMax`] when `min > max`.
    pub fn with_backoff(self, min: Duration, max: Duration) -> Result<Self, BackoffError> {
        Ok(self.with_backoff_policy(BackoffPolicy::new(min, max)?))
    }

    /// Sets an already validated backoff policy.
    #[must_use]
    pub const fn with_backoff_policy(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets or clears the per-attempt deadline.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, attempt_timeout: Option<Duration>) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Returns the backoff policy.
    #[must_use]
    pub const fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Returns the attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the per-attempt deadline.
    #[must_use]
    pub const fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }
}

/// Remote procedure invoked on a node.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RpcMethod {
    /// Submit a signed envelope.
    SubmitTransaction,
    /// Fetch the receipt of an accepted transaction.
    GetTransactionReceipt,
}

impl RpcMethod {
    /// Returns the method name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SubmitTransaction => "submitTransaction",
            Self::GetTransactionReceipt => "getTransactionReceipt",
        }
    }
}

/// Transport failure classes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TransportErrorKind {
    /// Node unreachable or refusing connections.
    Unavailable,
    /// No response within the deadline.
    DeadlineExceeded,
    /// Node is shedding load.
    ResourceExhausted,
    /// Stream was reset mid-call.
    StreamReset,
    /// Node-side internal failure other than a stream reset.
    Internal,
    /// Anything else, including misconfiguration.
    Other,
}

impl TransportErrorKind {
    /// Returns true for transient classes worth retrying on the same node.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::DeadlineExceeded | Self::ResourceExhausted | Self::StreamReset
        )
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::ResourceExhausted => "resource exhausted",
            Self::StreamReset => "stream reset",
            Self::Internal => "internal",
            Self::Other => "other",
        })
    }
}

/// Low-level transport error surfaced by [`NodeTransport`] implementations.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("{kind} transport failure: {message}")]
pub struct TransportError {
    /// Failure class.
    pub kind: TransportErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns true when the failure is transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Opaque connection to the network: sends encoded bytes to one node.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Sends `request` to `node_id` and returns the encoded response.
    async fn send(
        &self,
        node_id: NodeId,
        method: RpcMethod,
        request: &[u8],
        deadline: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError>;
}

/// Where a retryable status should be retried.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryTarget {
    /// Same node, after a backoff delay.
    SameNode,
    /// Next candidate node, immediately.
    NextNode,
}

/// Classified result of one attempt.
#[derive(Debug)]
pub enum ExecutionOutcome<T> {
    /// Definitive success.
    Success(T),
    /// Transient transport failure.
    RetryableTransport(TransportError),
    /// Node asked to be retried (or to try elsewhere).
    RetryableStatus {
        /// Status the node returned.
        status: Status,
        /// Retry placement.
        target: RetryTarget,
    },
    /// Definitive, well-formed rejection.
    TerminalStatus(Status),
    /// Failure no retry can fix.
    UnrecoverableError(ExecuteError),
}

/// Last failure observed before the attempt budget ran out.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LastFailure {
    /// Retryable status.
    Status(Status),
    /// Transient transport error.
    Transport(TransportError),
}

impl fmt::Display for LastFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "status {status}"),
            Self::Transport(error) => error.fmt(f),
        }
    }
}

/// Caller-facing execution errors.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Node rejected the request at precheck.
    #[error("transaction {transaction_id} rejected by node {node_id} with status {status}")]
    PrecheckStatus {
        /// Exact status returned.
        status: Status,
        /// Identity of the rejected request.
        transaction_id: TransactionId,
        /// Node that rejected it.
        node_id: NodeId,
    },
    /// Receipt reached a non-success status and status validation was requested.
    #[error("transaction {transaction_id} failed with receipt status {status}")]
    ReceiptStatus {
        /// Receipt status.
        status: Status,
        /// Identity of the failed request.
        transaction_id: TransactionId,
    },
    /// Attempt budget exhausted on retryable failures.
    #[error("transaction {transaction_id} gave up after {attempts} attempts; last failure: {last}")]
    MaxAttemptsExceeded {
        /// Attempts made.
        attempts: u32,
        /// Last retryable failure observed.
        last: LastFailure,
        /// Identity of the request.
        transaction_id: TransactionId,
    },
    /// Caller cancelled the execution.
    #[error("transaction {transaction_id} cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts started before cancellation.
        attempts: u32,
        /// Identity of the request.
        transaction_id: TransactionId,
    },
    /// Non-retryable transport failure.
    #[error("transaction {transaction_id} could not reach node {node_id}: {source}")]
    Transport {
        /// Transport error.
        source: TransportError,
        /// Node contacted.
        node_id: NodeId,
        /// Identity of the request.
        transaction_id: TransactionId,
    },
    /// One chunk of a chunked request failed; earlier chunks are not retracted.
    #[error("chunk {number}/{total} ({transaction_id}) failed: {source}")]
    Chunk {
        /// One-based chunk position.
        number: u32,
        /// Total chunks.
        total: u32,
        /// Identity of the failed chunk.
        transaction_id: TransactionId,
        /// Underlying failure.
        source: Box<ExecuteError>,
    },
    /// Request could not be built.
    #[error("failed to build request: {source}")]
    Build {
        /// Builder error.
        source: BuilderError,
    },
    /// Request or response bytes could not be encoded/decoded.
    #[error("wire codec failure: {source}")]
    Wire {
        /// Codec error.
        source: WireError,
    },
    /// Invalid execution configuration.
    #[error("invalid execution configuration: {message}")]
    Config {
        /// Human-readable description.
        message: String,
    },
}

impl ExecuteError {
    /// Returns the last status a node reported, when one is known.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::PrecheckStatus { status, .. } | Self::ReceiptStatus { status, .. } => {
                Some(*status)
            }
            Self::MaxAttemptsExceeded {
                last: LastFailure::Status(status),
                ..
            } => Some(*status),
            Self::Chunk { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Returns the identity of the request that failed, when one is known.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            Self::PrecheckStatus { transaction_id, .. }
            | Self::ReceiptStatus { transaction_id, .. }
            | Self::MaxAttemptsExceeded { transaction_id, .. }
            | Self::Cancelled { transaction_id, .. }
            | Self::Transport { transaction_id, .. }
            | Self::Chunk { transaction_id, .. } => Some(*transaction_id),
            Self::Build { .. } | Self::Wire { .. } | Self::Config { .. } => None,
        }
    }
}

/// Summary of an accepted submission.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct TransactionResponse {
    /// Identity of the accepted request (or chunk).
    pub transaction_id: TransactionId,
    /// Node that accepted it; receipts are fetched from this node.
    pub node_id: NodeId,
    /// SHA-256 of the exact envelope bytes sent.
    pub hash: [u8; 32],
}

/// Predicate deciding whether a terminal status should trigger a retry under a fresh
/// transaction id.
#[derive(Clone)]
pub struct RegeneratePolicy {
    /// Decision function.
    predicate: Arc<dyn Fn(Status) -> bool + Send + Sync>,
}

impl RegeneratePolicy {
    /// Creates a policy from a predicate.
    #[must_use]
    pub fn new(predicate: impl Fn(Status) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Returns true when `status` warrants a fresh identity.
    #[must_use]
    pub fn should_regenerate(&self, status: Status) -> bool {
        (self.predicate)(status)
    }
}

impl Default for RegeneratePolicy {
    fn default() -> Self {
        Self::new(|status| status == Status::TransactionExpired)
    }
}

impl fmt::Debug for RegeneratePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegeneratePolicy").finish_non_exhaustive()
    }
}
