//! Retry, backoff, and failover engine plus the node transport boundary.

/// Attempt loop and the executable-request trait.
mod engine;
/// Shared per-node connection handles.
mod pool;
/// JSON-RPC over HTTP transport implementation.
mod rpc;
#[cfg(test)]
/// Execution engine unit tests.
mod tests;
/// Submission of frozen chunks.
mod transaction;
/// Shared execution types, errors, and transport traits.
mod types;

pub use engine::{Engine, Executable};
pub use pool::{ConnectionPool, Connector};
pub use rpc::{HttpConnector, HttpNodeTransport, NodeChannel};
pub(crate) use transaction::{Regeneration, TransactionAttempt};
pub use types::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MAX_ATTEMPTS, ExecuteError, ExecutionConfig,
    ExecutionOutcome, LastFailure, NodeTransport, RegeneratePolicy, RetryTarget, RpcMethod,
    TransactionResponse, TransportError, TransportErrorKind,
};
