//! Attempt loop: send, classify, back off or fail over, repeat.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use super::{
    ExecuteError, ExecutionConfig, ExecutionOutcome, LastFailure, NodeTransport, RetryTarget,
    RpcMethod, TransportError, TransportErrorKind,
};
use crate::{
    builder::BuilderError,
    chunk::ChunkInfo,
    identity::{NodeId, TransactionId},
    ring::{Locked, RingCursor},
    status::Status,
};

/// One request the engine can drive.
///
/// Implemented once per request kind; the engine never needs to know what the request means,
/// only how to encode it for a node and how to read the node's answer.
pub trait Executable: Send {
    /// Value produced on success.
    type Output: Send;

    /// Remote method to invoke.
    fn method(&self) -> RpcMethod;

    /// Current logical identity (may change after regeneration).
    fn transaction_id(&self) -> TransactionId;

    /// Candidate nodes in attempt order.
    fn node_ids(&self) -> Vec<NodeId>;

    /// Encoded request for the node at `node_index`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError`] when the request cannot be encoded.
    fn request_bytes(&mut self, node_index: usize) -> Result<Vec<u8>, ExecuteError>;

    /// Classifies the response returned by the node at `node_index`.
    fn classify(&mut self, node_index: usize, response: &[u8])
    -> ExecutionOutcome<Self::Output>;

    /// Switches to a fresh identity after terminal `status`, if this request supports it.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError`] when the request cannot be rebuilt.
    fn regenerate_identity(&mut self, status: Status) -> Result<bool, ExecuteError> {
        let _ = status;
        Ok(false)
    }
}

/// Per-execution bookkeeping; dropped when the request reaches a terminal outcome.
#[derive(Debug, Clone)]
pub(crate) struct AttemptState {
    /// Rotating cursor over candidate nodes.
    cursor: RingCursor<NodeId, Locked>,
    /// Attempts started so far.
    attempts: u32,
    /// Same-node retries since the last node switch.
    consecutive_failures: u32,
    /// Total time spent in backoff sleeps.
    total_backoff: Duration,
    /// Chunk being driven, for chunked requests.
    chunk: Option<ChunkInfo>,
}

impl AttemptState {
    /// Creates state positioned at the first candidate.
    fn new(node_ids: Vec<NodeId>, chunk: Option<ChunkInfo>) -> Result<Self, BuilderError> {
        let cursor = RingCursor::new(node_ids)
            .lock()
            .map_err(|_| BuilderError::EmptyNodeList)?;
        Ok(Self {
            cursor,
            attempts: 0,
            consecutive_failures: 0,
            total_backoff: Duration::ZERO,
            chunk,
        })
    }

    /// Returns the node the next attempt goes to.
    fn current_node(&self) -> NodeId {
        *self.cursor.current()
    }

    /// One-based number of the chunk being driven.
    fn chunk_number(&self) -> Option<u32> {
        self.chunk.map(|info| info.number)
    }
}

/// Executes requests against a transport with retry, backoff, and failover.
///
/// Attempts for one request are strictly sequential; independent requests may share one
/// engine (and its transport) concurrently.
#[derive(Clone)]
pub struct Engine {
    /// Network boundary.
    transport: Arc<dyn NodeTransport>,
    /// Retry tuning.
    config: ExecutionConfig,
}

impl Engine {
    /// Creates an engine.
    #[must_use]
    pub fn new(transport: Arc<dyn NodeTransport>, config: ExecutionConfig) -> Self {
        Self { transport, config }
    }

    /// Returns the retry tuning.
    #[must_use]
    pub const fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Returns an engine sharing this transport with different tuning.
    #[must_use]
    pub fn with_config(&self, config: ExecutionConfig) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config,
        }
    }

    /// Drives `request` until success, a terminal status, budget exhaustion, or cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError`] describing the terminal failure.
    pub async fn execute<E: Executable>(
        &self,
        request: &mut E,
        cancel: &CancellationToken,
    ) -> Result<E::Output, ExecuteError> {
        self.execute_chunk(request, None, cancel).await
    }

    /// Same as [`Engine::execute`], tagging log events with the chunk being driven.
    pub(crate) async fn execute_chunk<E: Executable>(
        &self,
        request: &mut E,
        chunk: Option<ChunkInfo>,
        cancel: &CancellationToken,
    ) -> Result<E::Output, ExecuteError> {
        let max_attempts = self.config.max_attempts();
        if max_attempts == 0 {
            return Err(ExecuteError::Config {
                message: "attempt budget must allow at least one attempt".to_owned(),
            });
        }
        let mut state = AttemptState::new(request.node_ids(), chunk)
            .map_err(|source| ExecuteError::Build { source })?;
        let method = request.method();

        loop {
            let node_index = state.cursor.current_index();
            let node_id = state.current_node();
            let transaction_id = request.transaction_id();
            let bytes = request.request_bytes(node_index)?;
            state.attempts = state.attempts.saturating_add(1);
            tracing::debug!(
                %transaction_id,
                node = %node_id,
                attempt = state.attempts,
                chunk = ?state.chunk_number(),
                method = method.as_str(),
                "sending request"
            );

            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(cancelled(&state, transaction_id));
                }
                sent = self.send_once(node_id, method, &bytes) => sent,
            };
            let outcome = match sent {
                Ok(response) => request.classify(node_index, &response),
                Err(error) if error.is_retryable() => ExecutionOutcome::RetryableTransport(error),
                Err(source) => ExecutionOutcome::UnrecoverableError(ExecuteError::Transport {
                    source,
                    node_id,
                    transaction_id,
                }),
            };

            let (last, target) = match outcome {
                ExecutionOutcome::Success(output) => {
                    tracing::debug!(
                        %transaction_id,
                        node = %node_id,
                        attempts = state.attempts,
                        "request succeeded"
                    );
                    return Ok(output);
                }
                ExecutionOutcome::UnrecoverableError(error) => {
                    tracing::warn!(%transaction_id, node = %node_id, %error, "unrecoverable failure");
                    return Err(error);
                }
                ExecutionOutcome::TerminalStatus(status) => {
                    if !request.regenerate_identity(status)? {
                        tracing::debug!(%transaction_id, node = %node_id, %status, "terminal status");
                        return Err(ExecuteError::PrecheckStatus {
                            status,
                            transaction_id,
                            node_id,
                        });
                    }
                    tracing::info!(
                        old = %transaction_id,
                        new = %request.transaction_id(),
                        %status,
                        "regenerated transaction id"
                    );
                    state.consecutive_failures = 0;
                    if state.attempts >= max_attempts {
                        return Err(exhausted(
                            &state,
                            LastFailure::Status(status),
                            request.transaction_id(),
                        ));
                    }
                    continue;
                }
                ExecutionOutcome::RetryableTransport(error) => {
                    (LastFailure::Transport(error), RetryTarget::SameNode)
                }
                ExecutionOutcome::RetryableStatus { status, target } => {
                    (LastFailure::Status(status), target)
                }
            };

            if state.attempts >= max_attempts {
                tracing::warn!(
                    %transaction_id,
                    node = %node_id,
                    attempts = state.attempts,
                    chunk = ?state.chunk_number(),
                    total_backoff = ?state.total_backoff,
                    last = %last,
                    "attempt budget exhausted"
                );
                return Err(exhausted(&state, last, transaction_id));
            }

            match target {
                RetryTarget::SameNode => {
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    let delay = self.config.backoff().delay_for(state.consecutive_failures);
                    state.total_backoff = state.total_backoff.saturating_add(delay);
                    tracing::debug!(
                        %transaction_id,
                        node = %node_id,
                        consecutive_failures = state.consecutive_failures,
                        ?delay,
                        last = %last,
                        "retrying same node after backoff"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return Err(cancelled(&state, transaction_id));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RetryTarget::NextNode => {
                    state.consecutive_failures = 0;
                    let next = *state.cursor.advance();
                    tracing::debug!(
                        %transaction_id,
                        node = %node_id,
                        next_node = %next,
                        last = %last,
                        "failing over to next node"
                    );
                }
            }
        }
    }

    /// Sends once, bounded by the per-attempt deadline.
    async fn send_once(
        &self,
        node_id: NodeId,
        method: RpcMethod,
        bytes: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let deadline = self.config.attempt_timeout();
        let send = self.transport.send(node_id, method, bytes, deadline);
        match deadline {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .unwrap_or_else(|_elapsed| {
                    Err(TransportError::new(
                        TransportErrorKind::DeadlineExceeded,
                        format!("no response from node {node_id} within {limit:?}"),
                    ))
                }),
            None => send.await,
        }
    }
}

/// Builds the cancellation error.
fn cancelled(state: &AttemptState, transaction_id: TransactionId) -> ExecuteError {
    tracing::debug!(
        %transaction_id,
        attempts = state.attempts,
        chunk = ?state.chunk_number(),
        total_backoff = ?state.total_backoff,
        "execution cancelled"
    );
    ExecuteError::Cancelled {
        attempts: state.attempts,
        transaction_id,
    }
}

/// Builds the budget-exhausted error.
fn exhausted(state: &AttemptState, last: LastFailure, transaction_id: TransactionId) -> ExecuteError {
    ExecuteError::MaxAttemptsExceeded {
        attempts: state.attempts,
        last,
        transaction_id,
    }
}
