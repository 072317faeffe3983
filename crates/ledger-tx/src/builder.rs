//! Request builder and its frozen, signable form.

use std::{collections::BTreeSet, time::Duration};

use thiserror::Error;

use crate::{
    chunk::{ChunkConfig, ChunkInfo, ChunkPlan},
    client::LedgerClient,
    envelope::{BodyTemplate, EnvelopeSet, build_envelopes},
    identity::{AccountId, NodeId, TransactionId},
    signing::{PublicKey, SignerRef},
    wire::WireError,
};

/// Default validity window of a request.
pub const DEFAULT_VALID_DURATION: Duration = Duration::from_secs(120);

/// Builder-layer errors.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// No candidate nodes to address envelopes to.
    #[error("candidate node list is empty")]
    EmptyNodeList,
    /// No transaction id was set and none could be generated.
    #[error("transaction id is not set and no operator is available to generate one")]
    MissingTransactionId,
    /// Payload needs more chunks than allowed.
    #[error("payload requires {required} chunks, more than the maximum of {max}")]
    TooManyChunks {
        /// Chunks the payload would need.
        required: usize,
        /// Configured ceiling.
        max: usize,
    },
    /// Chunk size or chunk ceiling is zero.
    #[error("invalid chunk config: chunk_size={chunk_size}, max_chunks={max_chunks}; both must be at least 1")]
    InvalidChunkConfig {
        /// Configured bytes per chunk.
        chunk_size: usize,
        /// Configured chunk ceiling.
        max_chunks: usize,
    },
    /// Body encoding failed.
    #[error("failed to encode transaction body: {source}")]
    Wire {
        /// Codec error.
        source: WireError,
    },
}

/// Mutable request builder with chained setters.
///
/// Nothing is encoded until [`TxBuilder::freeze`]; after that the request is a [`FrozenTx`]
/// and only signatures can be added.
#[derive(Debug, Clone)]
pub struct TxBuilder {
    /// Operation name placed in every body.
    operation: String,
    /// Explicit identity, if any.
    transaction_id: Option<TransactionId>,
    /// Candidate nodes in attempt order.
    node_ids: Vec<NodeId>,
    /// Free-form memo.
    memo: String,
    /// Validity window.
    valid_duration: Duration,
    /// Operation payload.
    data: Vec<u8>,
    /// Chunking limits.
    chunk_config: ChunkConfig,
}

impl TxBuilder {
    /// Creates a builder for `operation`.
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            transaction_id: None,
            node_ids: Vec::new(),
            memo: String::new(),
            valid_duration: DEFAULT_VALID_DURATION,
            data: Vec::new(),
            chunk_config: ChunkConfig::default(),
        }
    }

    /// Sets an explicit transaction id.
    #[must_use]
    pub const fn with_transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    /// Replaces the candidate node list.
    #[must_use]
    pub fn with_node_ids(mut self, node_ids: Vec<NodeId>) -> Self {
        self.node_ids = node_ids;
        self
    }

    /// Appends one candidate node.
    #[must_use]
    pub fn add_node_id(mut self, node_id: NodeId) -> Self {
        self.node_ids.push(node_id);
        self
    }

    /// Sets the memo.
    #[must_use]
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    /// Sets the validity window.
    #[must_use]
    pub const fn with_valid_duration(mut self, valid_duration: Duration) -> Self {
        self.valid_duration = valid_duration;
        self
    }

    /// Sets the operation payload.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Sets the maximum bytes per chunk.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_config.chunk_size = chunk_size;
        self
    }

    /// Sets the maximum number of chunks.
    #[must_use]
    pub const fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.chunk_config.max_chunks = max_chunks;
        self
    }

    /// Replaces all chunking limits.
    #[must_use]
    pub const fn with_chunk_config(mut self, chunk_config: ChunkConfig) -> Self {
        self.chunk_config = chunk_config;
        self
    }

    /// Returns the explicit transaction id, if set.
    #[must_use]
    pub const fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    /// Returns the candidate nodes set so far.
    #[must_use]
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    /// Validates and encodes the request into per-node envelopes.
    ///
    /// Payloads larger than the chunk size are split into a [`ChunkPlan`] first; a payload
    /// needing too many chunks fails here, before any envelope exists.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError`] when the id or node list is missing, the payload needs too many
    /// chunks, or a body fails to encode.
    pub fn freeze(self) -> Result<FrozenTx, BuilderError> {
        let transaction_id = self
            .transaction_id
            .ok_or(BuilderError::MissingTransactionId)?;
        self.freeze_as(transaction_id, false)
    }

    /// Freezes through `client`, which supplies a missing id and node list and signs with its
    /// operator.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError`] under the same conditions as [`LedgerClient::freeze`].
    pub fn freeze_with(self, client: &LedgerClient) -> Result<FrozenTx, BuilderError> {
        client.freeze(self)
    }

    /// Freezes, generating an id for `payer` and taking `network` nodes when they are unset.
    pub(crate) fn freeze_with_defaults(
        mut self,
        payer: Option<AccountId>,
        network: &[NodeId],
    ) -> Result<FrozenTx, BuilderError> {
        if self.node_ids.is_empty() {
            self.node_ids = network.to_vec();
        }
        match (self.transaction_id, payer) {
            (Some(transaction_id), _) => self.freeze_as(transaction_id, false),
            (None, Some(payer)) => self.freeze_as(TransactionId::generate(payer), true),
            (None, None) => Err(BuilderError::MissingTransactionId),
        }
    }

    /// Shared freeze path.
    fn freeze_as(
        self,
        transaction_id: TransactionId,
        generated_id: bool,
    ) -> Result<FrozenTx, BuilderError> {
        if self.node_ids.is_empty() {
            return Err(BuilderError::EmptyNodeList);
        }
        let chunk_config = self.chunk_config;
        chunk_config.validate()?;
        let template = |data: Vec<u8>, chunk_info: Option<ChunkInfo>| BodyTemplate {
            operation: self.operation.clone(),
            memo: self.memo.clone(),
            valid_duration: self.valid_duration,
            chunk_info,
            data,
        };

        let chunks = if self.data.len() > chunk_config.chunk_size {
            ChunkPlan::new(&self.data, transaction_id, &chunk_config)?
                .into_chunks()
                .into_iter()
                .map(|planned| {
                    FrozenChunk::build(
                        template(planned.data, Some(planned.info)),
                        planned.transaction_id,
                        &self.node_ids,
                    )
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![FrozenChunk::build(
                template(self.data.clone(), None),
                transaction_id,
                &self.node_ids,
            )?]
        };

        Ok(FrozenTx {
            chunks,
            chunk_config,
            generated_id,
        })
    }
}

/// One chunk (or the whole body of a single-chunk request) with its envelopes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrozenChunk {
    /// Node-independent body fields.
    template: BodyTemplate,
    /// Per-node envelopes.
    envelopes: EnvelopeSet,
}

impl FrozenChunk {
    /// Encodes `template` for every node.
    fn build(
        template: BodyTemplate,
        transaction_id: TransactionId,
        node_ids: &[NodeId],
    ) -> Result<Self, BuilderError> {
        let envelopes = build_envelopes(&template, transaction_id, node_ids)?;
        Ok(Self {
            template,
            envelopes,
        })
    }

    /// Returns this chunk's identity.
    #[must_use]
    pub const fn transaction_id(&self) -> TransactionId {
        self.envelopes.transaction_id()
    }

    /// Returns chunk position metadata, for multi-chunk requests.
    #[must_use]
    pub const fn chunk_info(&self) -> Option<ChunkInfo> {
        self.template.chunk_info
    }

    /// Returns the payload slice carried by this chunk.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.template.data
    }

    /// Returns the per-node envelopes.
    #[must_use]
    pub const fn envelopes(&self) -> &EnvelopeSet {
        &self.envelopes
    }

    /// Returns the per-node envelopes mutably (for adding signatures).
    pub fn envelopes_mut(&mut self) -> &mut EnvelopeSet {
        &mut self.envelopes
    }

    /// Re-encodes every envelope under a new identity. Existing signatures are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::Wire`] when a body fails to encode.
    pub fn regenerate(&mut self, transaction_id: TransactionId) -> Result<(), BuilderError> {
        self.envelopes =
            build_envelopes(&self.template, transaction_id, &self.envelopes.node_ids())?;
        Ok(())
    }
}

/// Immutable, validated request: one [`FrozenChunk`] per chunk, in submission order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrozenTx {
    /// Chunks in submission order; never empty.
    chunks: Vec<FrozenChunk>,
    /// Limits the request was frozen with.
    chunk_config: ChunkConfig,
    /// True when the identity was generated for the client operator.
    generated_id: bool,
}

impl FrozenTx {
    /// Returns the identity of the first chunk (the request's initial identity).
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.chunks.first().map(FrozenChunk::transaction_id)
    }

    /// Returns the candidate nodes.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.chunks
            .first()
            .map(|chunk| chunk.envelopes.node_ids())
            .unwrap_or_default()
    }

    /// Returns the number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns the chunks in submission order.
    #[must_use]
    pub fn chunks(&self) -> &[FrozenChunk] {
        &self.chunks
    }

    /// Returns the chunks mutably, in submission order.
    pub fn chunks_mut(&mut self) -> &mut [FrozenChunk] {
        &mut self.chunks
    }

    /// Returns the chunking limits.
    #[must_use]
    pub const fn chunk_config(&self) -> ChunkConfig {
        self.chunk_config
    }

    /// Returns true when the identity was generated rather than set by the caller.
    #[must_use]
    pub const fn is_transaction_id_generated(&self) -> bool {
        self.generated_id
    }

    /// Signs every envelope of every chunk with `signer`.
    pub fn sign(&mut self, signer: SignerRef<'_>) -> &mut Self {
        for chunk in &mut self.chunks {
            let _ = chunk.envelopes.sign(signer);
        }
        self
    }

    /// Returns every key that signed any envelope.
    #[must_use]
    pub fn signers(&self) -> BTreeSet<PublicKey> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.envelopes.signers())
            .collect()
    }
}
