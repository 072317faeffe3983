#![forbid(unsafe_code)]
#![cfg_attr(
    test,
    allow(
        clippy::arithmetic_side_effects,
        clippy::expect_used,
        clippy::indexing_slicing,
        clippy::missing_docs_in_private_items,
        clippy::panic,
        missing_docs
    )
)]

//! Client-side request execution for a replicated ledger network.
//!
//! A request is built with [`TxBuilder`], frozen into one signed envelope per candidate node,
//! and driven by the [`Engine`] with per-node failover, exponential backoff, and a bounded
//! attempt budget. Large payloads are split into ordered chunks; receipts are polled with
//! the same engine.
//!
//! External users should start from [`LedgerClient`].

/// Exponential backoff policy.
pub mod backoff;
/// Request builder and frozen requests.
pub mod builder;
/// Payload chunking.
pub mod chunk;
/// Client orchestration.
pub mod client;
/// Serializable client configuration.
pub mod config;
/// Per-node signed envelopes.
pub mod envelope;
/// Execution engine and node transports.
pub mod execute;
/// Account, node, and request identities.
pub mod identity;
/// Tracing setup.
pub mod logging;
/// Receipt polling.
pub mod receipt;
/// Rotating node cursor.
pub mod ring;
/// Signing boundary types.
pub mod signing;
/// Protocol status codes.
pub mod status;
/// Wire codec.
pub mod wire;

pub use backoff::{BackoffError, BackoffPolicy};
pub use builder::{BuilderError, FrozenChunk, FrozenTx, TxBuilder};
pub use chunk::{ChunkConfig, ChunkInfo, ChunkPlan};
pub use client::LedgerClient;
pub use config::{ClientConfig, ConfigError, OperatorConfig};
pub use envelope::{EnvelopeSet, SignedEnvelope};
pub use execute::{
    Engine, ExecuteError, Executable, ExecutionConfig, ExecutionOutcome, HttpNodeTransport,
    NodeTransport, RegeneratePolicy, RpcMethod, TransactionResponse, TransportError,
    TransportErrorKind,
};
pub use identity::{AccountId, NodeId, Timestamp, TransactionId};
pub use logging::init_tracing;
pub use receipt::{ReceiptConfig, ReceiptQuery};
pub use ring::RingCursor;
pub use signing::{Operator, PublicKey, Signer, SignerRef};
pub use status::Status;
pub use wire::TransactionReceipt;
