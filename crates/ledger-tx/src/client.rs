//! Client tying a network, an operator, and the execution engine together.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    builder::{BuilderError, FrozenTx, TxBuilder},
    config::{ClientConfig, ConfigError},
    execute::{
        Engine, ExecuteError, Executable as _, ExecutionConfig, HttpNodeTransport, NodeTransport,
        RegeneratePolicy, Regeneration, TransactionAttempt, TransactionResponse,
    },
    identity::NodeId,
    receipt::{ReceiptConfig, ReceiptQuery},
    signing::Operator,
    wire::TransactionReceipt,
};

/// Submits frozen requests to a fixed network of nodes.
///
/// Cheap to share by reference across tasks: every execution keeps its own attempt state and
/// only the transport is shared.
#[derive(Clone)]
pub struct LedgerClient {
    /// Known nodes, in default attempt order.
    network: Vec<NodeId>,
    /// Retry/backoff engine over the shared transport.
    engine: Engine,
    /// Default payer and signer.
    operator: Option<Operator>,
    /// Receipt polling tuning.
    receipt_config: ReceiptConfig,
    /// Cap on candidate nodes filled in from the network.
    max_nodes_per_transaction: Option<usize>,
    /// Opt-in identity regeneration for operator-generated requests.
    regenerate_policy: Option<RegeneratePolicy>,
}

impl LedgerClient {
    /// Creates a client over `network` using default execution tuning.
    #[must_use]
    pub fn new(network: Vec<NodeId>, transport: Arc<dyn NodeTransport>) -> Self {
        Self {
            network,
            engine: Engine::new(transport, ExecutionConfig::default()),
            operator: None,
            receipt_config: ReceiptConfig::default(),
            max_nodes_per_transaction: None,
            regenerate_policy: None,
        }
    }

    /// Builds a client talking JSON-RPC over HTTP to the configured network.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a node id, the operator, or the tuning is invalid.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let nodes = config.nodes()?;
        let network = nodes.iter().map(|(node_id, _)| *node_id).collect();
        let transport = HttpNodeTransport::new(nodes.into_iter().collect());
        let client = Self::new(network, Arc::new(transport))
            .with_execution_config(config.execution_config()?)
            .with_receipt_config(config.receipt_config())
            .with_max_nodes_per_transaction(config.max_nodes_per_transaction)
            .with_regenerate_policy(
                config
                    .regenerate_transaction_id
                    .then(RegeneratePolicy::default),
            );
        Ok(match config.operator()? {
            Some(operator) => client.with_operator(operator),
            None => client,
        })
    }

    /// Sets retry, backoff, and deadline tuning.
    #[must_use]
    pub fn with_execution_config(mut self, config: ExecutionConfig) -> Self {
        self.engine = self.engine.with_config(config);
        self
    }

    /// Sets the default payer and signer.
    #[must_use]
    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Sets receipt polling tuning.
    #[must_use]
    pub const fn with_receipt_config(mut self, receipt_config: ReceiptConfig) -> Self {
        self.receipt_config = receipt_config;
        self
    }

    /// Caps how many network nodes a request is addressed to when it names none itself.
    #[must_use]
    pub const fn with_max_nodes_per_transaction(mut self, max_nodes: Option<usize>) -> Self {
        self.max_nodes_per_transaction = max_nodes;
        self
    }

    /// Enables or disables identity regeneration.
    #[must_use]
    pub fn with_regenerate_policy(mut self, policy: Option<RegeneratePolicy>) -> Self {
        self.regenerate_policy = policy;
        self
    }

    /// Returns the known nodes.
    #[must_use]
    pub fn network(&self) -> &[NodeId] {
        &self.network
    }

    /// Returns the operator, if set.
    #[must_use]
    pub const fn operator(&self) -> Option<&Operator> {
        self.operator.as_ref()
    }

    /// Returns the engine used for submissions.
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Returns the receipt polling tuning.
    #[must_use]
    pub const fn receipt_config(&self) -> ReceiptConfig {
        self.receipt_config
    }

    /// Freezes `builder`, filling a missing id from the operator and missing nodes from the
    /// network, then signs with the operator.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError`] when no id can be generated, no nodes are known, or a body
    /// fails to encode.
    pub fn freeze(&self, builder: TxBuilder) -> Result<FrozenTx, BuilderError> {
        let limit = self.max_nodes_per_transaction.unwrap_or(usize::MAX);
        let network: Vec<NodeId> = self.network.iter().copied().take(limit).collect();
        let payer = self.operator.as_ref().map(Operator::account_id);
        let mut frozen = builder.freeze_with_defaults(payer, &network)?;
        if let Some(operator) = &self.operator {
            let _ = frozen.sign(operator.signer());
        }
        Ok(frozen)
    }

    /// Submits `tx` and returns the acceptance of its first chunk.
    ///
    /// Multi-chunk requests still submit every chunk; see [`LedgerClient::execute_all`].
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError`] when any chunk fails.
    pub async fn execute(&self, tx: &mut FrozenTx) -> Result<TransactionResponse, ExecuteError> {
        self.execute_cancellable(tx, &CancellationToken::new()).await
    }

    /// Same as [`LedgerClient::execute`], aborting when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError`] when any chunk fails or the execution is cancelled.
    pub async fn execute_cancellable(
        &self,
        tx: &mut FrozenTx,
        cancel: &CancellationToken,
    ) -> Result<TransactionResponse, ExecuteError> {
        let responses = self.execute_all(tx, cancel).await?;
        responses
            .into_iter()
            .next()
            .ok_or(ExecuteError::Build {
                source: BuilderError::EmptyNodeList,
            })
    }

    /// Submits every chunk of `tx` strictly in order and returns one acceptance per chunk.
    ///
    /// When the request has several chunks and [`crate::ChunkConfig::wait_for_receipts`] is
    /// set, each chunk's receipt is awaited (and validated) before the next chunk is sent.
    /// Chunks accepted before a failure are not retracted.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::Chunk`] naming the failed chunk for multi-chunk requests, and
    /// the plain [`ExecuteError`] otherwise.
    pub async fn execute_all(
        &self,
        tx: &mut FrozenTx,
        cancel: &CancellationToken,
    ) -> Result<Vec<TransactionResponse>, ExecuteError> {
        let total = tx.chunk_count();
        let wait_for_receipts = total > 1 && tx.chunk_config().wait_for_receipts;
        // Chunks are linked by their initial identity, so only single-chunk requests move.
        let regeneration = match (&self.regenerate_policy, &self.operator) {
            (Some(policy), Some(operator)) if total == 1 && tx.is_transaction_id_generated() => {
                Some(Regeneration { policy, operator })
            }
            _ => None,
        };

        let mut responses = Vec::with_capacity(total);
        for chunk in tx.chunks_mut() {
            let info = chunk.chunk_info();
            let mut attempt = TransactionAttempt::new(chunk, regeneration);
            let outcome = self.engine.execute_chunk(&mut attempt, info, cancel).await;
            let transaction_id = attempt.transaction_id();
            let with_chunk = |error: ExecuteError| match info {
                Some(info) => ExecuteError::Chunk {
                    number: info.number,
                    total: info.total,
                    transaction_id,
                    source: Box::new(error),
                },
                None => error,
            };

            let response = outcome.map_err(with_chunk)?;
            if let Some(info) = info {
                tracing::info!(
                    %transaction_id,
                    node = %response.node_id,
                    chunk = info.number,
                    total = info.total,
                    "chunk accepted"
                );
            }
            if wait_for_receipts {
                let _receipt = self
                    .get_receipt_cancellable(&response, cancel)
                    .await
                    .map_err(with_chunk)?;
            }
            responses.push(response);
        }
        Ok(responses)
    }

    /// Polls the accepting node for the receipt of `response`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError`] when polling fails or, with validation on, the receipt
    /// reports failure.
    pub async fn get_receipt(
        &self,
        response: &TransactionResponse,
    ) -> Result<TransactionReceipt, ExecuteError> {
        self.get_receipt_cancellable(response, &CancellationToken::new())
            .await
    }

    /// Same as [`LedgerClient::get_receipt`], aborting when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError`] when polling fails, is cancelled, or, with validation on,
    /// the receipt reports failure.
    pub async fn get_receipt_cancellable(
        &self,
        response: &TransactionResponse,
        cancel: &CancellationToken,
    ) -> Result<TransactionReceipt, ExecuteError> {
        let engine = self.engine.with_config(
            self.engine
                .config()
                .with_max_attempts(self.receipt_config.max_attempts),
        );
        ReceiptQuery::new(response.transaction_id, vec![response.node_id])
            .with_validate_status(self.receipt_config.validate_status)
            .execute(&engine, cancel)
            .await
    }
}

impl std::fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerClient")
            .field("network", &self.network)
            .field("config", self.engine.config())
            .field("operator", &self.operator)
            .field("receipt_config", &self.receipt_config)
            .field("max_nodes_per_transaction", &self.max_nodes_per_transaction)
            .field("regenerate_policy", &self.regenerate_policy)
            .finish()
    }
}
