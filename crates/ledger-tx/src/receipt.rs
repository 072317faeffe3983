//! Polling for the receipt of an accepted transaction.

use tokio_util::sync::CancellationToken;

use crate::{
    execute::{
        DEFAULT_MAX_ATTEMPTS, Engine, ExecuteError, Executable, ExecutionOutcome, RetryTarget,
        RpcMethod,
    },
    identity::{NodeId, TransactionId},
    status::Status,
    wire::{self, NodeResponse, ReceiptRequest, TransactionReceipt},
};

/// Receipt polling tuning.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ReceiptConfig {
    /// Attempt budget for one poll, counting the first query.
    pub max_attempts: u32,
    /// Turn non-success receipts into [`ExecuteError::ReceiptStatus`].
    pub validate_status: bool,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            validate_status: true,
        }
    }
}

/// Query for the receipt of `transaction_id`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReceiptQuery {
    /// Transaction whose receipt is polled.
    transaction_id: TransactionId,
    /// Nodes to ask, normally the node that accepted the transaction.
    node_ids: Vec<NodeId>,
    /// Whether non-success receipts are errors.
    validate_status: bool,
}

impl ReceiptQuery {
    /// Creates a query; status validation is on by default.
    #[must_use]
    pub fn new(transaction_id: TransactionId, node_ids: Vec<NodeId>) -> Self {
        Self {
            transaction_id,
            node_ids,
            validate_status: true,
        }
    }

    /// Sets whether a non-success receipt is returned as an error.
    #[must_use]
    pub const fn with_validate_status(mut self, validate_status: bool) -> Self {
        self.validate_status = validate_status;
        self
    }

    /// Polls until a definitive receipt arrives or the engine's attempt budget runs out.
    ///
    /// "Not yet available" answers are retried on the same node with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::ReceiptStatus`] for a failed receipt when validation is on,
    /// and any engine error otherwise.
    pub async fn execute(
        mut self,
        engine: &Engine,
        cancel: &CancellationToken,
    ) -> Result<TransactionReceipt, ExecuteError> {
        let receipt = engine.execute(&mut self, cancel).await?;
        if self.validate_status && !receipt.status.is_success() {
            return Err(ExecuteError::ReceiptStatus {
                status: receipt.status,
                transaction_id: self.transaction_id,
            });
        }
        Ok(receipt)
    }
}

/// Statuses meaning "ask again later".
const fn is_not_yet_available(status: Status) -> bool {
    matches!(
        status,
        Status::Unknown | Status::ReceiptNotFound | Status::RecordNotFound
    ) || status.is_node_busy()
}

impl Executable for ReceiptQuery {
    type Output = TransactionReceipt;

    fn method(&self) -> RpcMethod {
        RpcMethod::GetTransactionReceipt
    }

    fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    fn node_ids(&self) -> Vec<NodeId> {
        self.node_ids.clone()
    }

    fn request_bytes(&mut self, _node_index: usize) -> Result<Vec<u8>, ExecuteError> {
        wire::encode(
            "receipt request",
            &ReceiptRequest {
                transaction_id: self.transaction_id,
            },
        )
        .map_err(|source| ExecuteError::Wire { source })
    }

    fn classify(
        &mut self,
        _node_index: usize,
        response: &[u8],
    ) -> ExecutionOutcome<TransactionReceipt> {
        let response: NodeResponse = match wire::decode("node response", response) {
            Ok(response) => response,
            Err(source) => return ExecutionOutcome::UnrecoverableError(ExecuteError::Wire { source }),
        };
        match response.status {
            Status::Ok => {}
            status if is_not_yet_available(status) => {
                return ExecutionOutcome::RetryableStatus {
                    status,
                    target: RetryTarget::SameNode,
                };
            }
            Status::InvalidNodeAccount => {
                return ExecutionOutcome::RetryableStatus {
                    status: Status::InvalidNodeAccount,
                    target: RetryTarget::NextNode,
                };
            }
            status => return ExecutionOutcome::TerminalStatus(status),
        }
        let receipt: TransactionReceipt = match wire::decode("receipt", &response.payload) {
            Ok(receipt) => receipt,
            Err(source) => return ExecutionOutcome::UnrecoverableError(ExecuteError::Wire { source }),
        };
        if is_not_yet_available(receipt.status) {
            return ExecutionOutcome::RetryableStatus {
                status: receipt.status,
                target: RetryTarget::SameNode,
            };
        }
        ExecutionOutcome::Success(receipt)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::{
        execute::{ExecutionConfig, LastFailure, NodeTransport, TransportError},
        identity::{AccountId, Timestamp},
    };

    /// Mock transport answering receipt queries from a script.
    #[derive(Debug)]
    struct ScriptedReceipts {
        /// Ordered (precheck, receipt) statuses; the last one repeats.
        replies: Vec<(Status, Option<Status>)>,
        /// Virtual time and node of each call.
        calls: Mutex<Vec<(Instant, NodeId, RpcMethod)>>,
    }

    #[async_trait]
    impl NodeTransport for ScriptedReceipts {
        async fn send(
            &self,
            node_id: NodeId,
            method: RpcMethod,
            request: &[u8],
            _deadline: Option<Duration>,
        ) -> Result<Vec<u8>, TransportError> {
            let mut call_index = 0_usize;
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((Instant::now(), node_id, method));
                call_index = calls.len().saturating_sub(1);
            }
            let query: ReceiptRequest =
                wire::decode("receipt request", request).expect("request decodes");
            let (status, receipt) = self
                .replies
                .get(call_index)
                .or_else(|| self.replies.last())
                .copied()
                .unwrap_or((Status::Unknown, None));
            let payload = receipt.map_or_else(Vec::new, |status| {
                wire::encode(
                    "receipt",
                    &TransactionReceipt {
                        status,
                        transaction_id: query.transaction_id,
                        data: vec![1, 2, 3],
                    },
                )
                .expect("receipt encodes")
            });
            Ok(wire::encode("node response", &NodeResponse { status, payload })
                .expect("response encodes"))
        }
    }

    fn scripted(replies: Vec<(Status, Option<Status>)>) -> Arc<ScriptedReceipts> {
        Arc::new(ScriptedReceipts {
            replies,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn tx_id() -> TransactionId {
        TransactionId::new(AccountId::new(0, 0, 7), Timestamp::new(1_700_000_000, 5))
    }

    fn engine(transport: Arc<ScriptedReceipts>, max_attempts: u32) -> Engine {
        Engine::new(
            transport,
            ExecutionConfig::default()
                .with_backoff(Duration::from_millis(50), Duration::from_secs(1))
                .expect("valid backoff")
                .with_max_attempts(max_attempts),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn not_yet_available_twice_then_success_takes_three_attempts() {
        let transport = scripted(vec![
            (Status::ReceiptNotFound, None),
            (Status::Ok, Some(Status::Unknown)),
            (Status::Ok, Some(Status::Success)),
        ]);
        let engine = engine(Arc::clone(&transport), 10);
        let node = NodeId::from_num(3);

        let receipt = ReceiptQuery::new(tx_id(), vec![node])
            .execute(&engine, &CancellationToken::new())
            .await;

        assert!(receipt.is_ok());
        if let Ok(receipt) = receipt {
            assert_eq!(receipt.status, Status::Success);
            assert_eq!(receipt.transaction_id, tx_id());
            assert_eq!(receipt.data, vec![1, 2, 3]);
        }
        let calls = transport.calls.lock().map(|calls| calls.clone()).unwrap_or_default();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, called, method)| {
            *called == node && *method == RpcMethod::GetTransactionReceipt
        }));
        let backoff = engine.config().backoff();
        assert_eq!(calls[1].0.duration_since(calls[0].0), backoff.delay_for(1));
        assert_eq!(calls[2].0.duration_since(calls[1].0), backoff.delay_for(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_receipt_is_an_error_only_when_validating() {
        let transport = scripted(vec![(Status::Ok, Some(Status::InsufficientPayerBalance))]);
        let engine = engine(transport, 10);
        let query = ReceiptQuery::new(tx_id(), vec![NodeId::from_num(3)]);

        let validated = query
            .clone()
            .execute(&engine, &CancellationToken::new())
            .await;
        assert!(matches!(
            validated,
            Err(ExecuteError::ReceiptStatus {
                status: Status::InsufficientPayerBalance,
                ..
            })
        ));

        let raw = query
            .with_validate_status(false)
            .execute(&engine, &CancellationToken::new())
            .await;
        assert!(matches!(
            raw,
            Ok(TransactionReceipt {
                status: Status::InsufficientPayerBalance,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_polling_respects_its_own_budget() {
        let transport = scripted(vec![(Status::Ok, Some(Status::Unknown))]);
        let engine = engine(Arc::clone(&transport), 4);

        let result = ReceiptQuery::new(tx_id(), vec![NodeId::from_num(3)])
            .execute(&engine, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(ExecuteError::MaxAttemptsExceeded {
                attempts: 4,
                last: LastFailure::Status(Status::Unknown),
                ..
            })
        ));
    }

    #[test]
    fn default_receipt_config_validates() {
        let config = ReceiptConfig::default();
        assert!(config.validate_status);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }
}
