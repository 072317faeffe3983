//! Splitting oversized payloads into ordered, individually identified chunks.

use serde::{Deserialize, Serialize};

use crate::{builder::BuilderError, identity::TransactionId};

/// Default maximum bytes carried by one chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1_024;

/// Default maximum number of chunks one payload may be split into.
pub const DEFAULT_MAX_CHUNKS: usize = 20;

/// Position of one chunk within its request, embedded in the chunk's body.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Identity of the first chunk, shared by every chunk of the request.
    pub initial_transaction_id: TransactionId,
    /// Total number of chunks.
    pub total: u32,
    /// One-based position of this chunk.
    pub number: u32,
}

/// Chunking limits.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ChunkConfig {
    /// Maximum bytes per chunk.
    pub chunk_size: usize,
    /// Maximum number of chunks; larger payloads are rejected before anything is sent.
    pub max_chunks: usize,
    /// Wait for each chunk's receipt before submitting the next chunk.
    pub wait_for_receipts: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks: DEFAULT_MAX_CHUNKS,
            wait_for_receipts: true,
        }
    }
}

impl ChunkConfig {
    /// Checks that both limits allow at least one byte and one chunk.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::InvalidChunkConfig`] when `chunk_size` or `max_chunks` is 0.
    pub fn validate(&self) -> Result<(), BuilderError> {
        if self.chunk_size == 0 || self.max_chunks == 0 {
            return Err(BuilderError::InvalidChunkConfig {
                chunk_size: self.chunk_size,
                max_chunks: self.max_chunks,
            });
        }
        Ok(())
    }
}

/// Number of chunks needed for `len` bytes; an empty payload still takes one chunk.
#[must_use]
pub fn required_chunks(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size.max(1)).max(1)
}

/// One planned chunk.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PlannedChunk {
    /// Identity derived for this chunk.
    pub transaction_id: TransactionId,
    /// Position metadata carried in the body.
    pub info: ChunkInfo,
    /// Slice of the payload carried by this chunk.
    pub data: Vec<u8>,
}

/// Ordered chunks of one payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChunkPlan {
    /// Identity of the first chunk.
    initial_transaction_id: TransactionId,
    /// Chunks in submission order.
    chunks: Vec<PlannedChunk>,
}

impl ChunkPlan {
    /// Splits `payload` into chunks of at most `config.chunk_size` bytes.
    ///
    /// Chunk `i` (zero-based) gets the identity `initial` advanced by `i` nanoseconds.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::InvalidChunkConfig`] when either limit is 0, and
    /// [`BuilderError::TooManyChunks`] when the payload needs more than `config.max_chunks`
    /// chunks.
    pub fn new(
        payload: &[u8],
        initial: TransactionId,
        config: &ChunkConfig,
    ) -> Result<Self, BuilderError> {
        config.validate()?;
        let required = required_chunks(payload.len(), config.chunk_size);
        let too_many = || BuilderError::TooManyChunks {
            required,
            max: config.max_chunks,
        };
        if required > config.max_chunks {
            return Err(too_many());
        }
        let total = u32::try_from(required).map_err(|_| too_many())?;

        let mut chunks = Vec::with_capacity(required);
        let mut pieces = payload.chunks(config.chunk_size);
        for number in 1..=total {
            let offset = u64::from(number.saturating_sub(1));
            chunks.push(PlannedChunk {
                transaction_id: initial.offset_nanos(offset),
                info: ChunkInfo {
                    initial_transaction_id: initial,
                    total,
                    number,
                },
                data: pieces.next().map(<[u8]>::to_vec).unwrap_or_default(),
            });
        }
        Ok(Self {
            initial_transaction_id: initial,
            chunks,
        })
    }

    /// Returns the identity of the first chunk.
    #[must_use]
    pub const fn initial_transaction_id(&self) -> TransactionId {
        self.initial_transaction_id
    }

    /// Returns the number of chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true when the plan has no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterates chunks in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &PlannedChunk> {
        self.chunks.iter()
    }

    /// Consumes the plan, returning chunks in submission order.
    #[must_use]
    pub fn into_chunks(self) -> Vec<PlannedChunk> {
        self.chunks
    }
}
