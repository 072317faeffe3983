//! Execution engine unit tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::{
    builder::{FrozenChunk, FrozenTx, TxBuilder},
    identity::{AccountId, NodeId, Timestamp, TransactionId},
    signing::{Operator, PublicKey, Signer, SignerRef},
    status::Status,
    wire::{self, NodeResponse, SignedTransaction, TransactionBody},
};

/// Scripted answer for one call.
#[derive(Debug, Clone)]
enum Reply {
    /// Encoded node response with this status.
    Status(Status),
    /// Raw bytes, possibly malformed.
    Raw(Vec<u8>),
    /// Transport failure of this class.
    Transport(TransportErrorKind),
    /// Never answers.
    Hang,
}

/// One recorded call.
#[derive(Debug, Clone)]
struct Call {
    /// Node contacted.
    node_id: NodeId,
    /// Method invoked.
    method: RpcMethod,
    /// Virtual time the call started.
    at: Instant,
    /// Request bytes.
    request: Vec<u8>,
}

/// Mock transport that answers calls from a script, in order.
#[derive(Debug)]
struct SequencedNodeTransport {
    /// Ordered replies; the last one repeats.
    replies: Vec<Reply>,
    /// Calls received so far.
    calls: Mutex<Vec<Call>>,
}

impl SequencedNodeTransport {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NodeTransport for SequencedNodeTransport {
    async fn send(
        &self,
        node_id: NodeId,
        method: RpcMethod,
        request: &[u8],
        _deadline: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let mut call_index = 0_usize;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                node_id,
                method,
                at: Instant::now(),
                request: request.to_vec(),
            });
            call_index = calls.len().saturating_sub(1);
        }
        let reply = self
            .replies
            .get(call_index)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or(Reply::Hang);
        match reply {
            Reply::Status(status) => Ok(encode_response(status)),
            Reply::Raw(bytes) => Ok(bytes),
            Reply::Transport(kind) => Err(TransportError::new(kind, "scripted failure")),
            Reply::Hang => std::future::pending().await,
        }
    }
}

fn encode_response(status: Status) -> Vec<u8> {
    wire::encode(
        "node response",
        &NodeResponse {
            status,
            payload: Vec::new(),
        },
    )
    .expect("response encodes")
}

fn node_a() -> NodeId {
    NodeId::from_num(3)
}

fn node_b() -> NodeId {
    NodeId::from_num(4)
}

fn node_c() -> NodeId {
    NodeId::from_num(5)
}

fn payer() -> AccountId {
    AccountId::new(0, 0, 1_001)
}

fn tx_id() -> TransactionId {
    TransactionId::new(payer(), Timestamp::new(1_700_000_000, 0))
}

fn frozen(nodes: Vec<NodeId>) -> FrozenTx {
    TxBuilder::new("transfer")
        .with_transaction_id(tx_id())
        .with_node_ids(nodes)
        .with_data(vec![7_u8; 16])
        .freeze()
        .expect("request freezes")
}

fn config(max_attempts: u32) -> ExecutionConfig {
    ExecutionConfig::default()
        .with_backoff(Duration::from_millis(100), Duration::from_secs(2))
        .expect("valid backoff")
        .with_max_attempts(max_attempts)
        .with_attempt_timeout(Some(Duration::from_secs(1)))
}

fn sent_body(call: &Call) -> TransactionBody {
    let envelope: SignedTransaction =
        wire::decode("envelope", &call.request).expect("envelope decodes");
    wire::decode("body", &envelope.body_bytes).expect("body decodes")
}

async fn submit(
    engine: &Engine,
    tx: &mut FrozenTx,
    regeneration: Option<Regeneration<'_>>,
    cancel: &CancellationToken,
) -> Result<TransactionResponse, ExecuteError> {
    let chunk = tx.chunks_mut().first_mut().expect("one chunk");
    let mut attempt = TransactionAttempt::new(chunk, regeneration);
    engine.execute(&mut attempt, cancel).await
}

#[tokio::test(start_paused = true)]
async fn busy_retries_same_node_then_fails_over_without_delay() {
    let transport = SequencedNodeTransport::new(vec![
        Reply::Status(Status::Busy),
        Reply::Status(Status::InvalidNodeAccount),
        Reply::Status(Status::Ok),
    ]);
    let engine = Engine::new(transport.clone(), config(10));
    let mut tx = frozen(vec![node_a(), node_b()]);

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;

    assert!(result.is_ok());
    if let Ok(response) = result {
        assert_eq!(response.node_id, node_b());
        assert_eq!(response.transaction_id, tx_id());
    }
    let calls = transport.calls();
    let nodes: Vec<NodeId> = calls.iter().map(|call| call.node_id).collect();
    assert_eq!(nodes, vec![node_a(), node_a(), node_b()]);
    assert!(calls.iter().all(|call| call.method == RpcMethod::SubmitTransaction));

    let backoff = engine.config().backoff();
    assert_eq!(calls[1].at.duration_since(calls[0].at), backoff.delay_for(1));
    assert_eq!(calls[2].at.duration_since(calls[1].at), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn failover_resets_backoff_to_first_step() {
    let transport = SequencedNodeTransport::new(vec![
        Reply::Status(Status::Busy),
        Reply::Status(Status::Busy),
        Reply::Status(Status::InvalidNodeAccount),
        Reply::Status(Status::Busy),
        Reply::Status(Status::Ok),
    ]);
    let engine = Engine::new(transport.clone(), config(10));
    let mut tx = frozen(vec![node_a(), node_b()]);

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;

    assert!(matches!(result, Ok(ref response) if response.node_id == node_b()));
    let calls = transport.calls();
    let nodes: Vec<NodeId> = calls.iter().map(|call| call.node_id).collect();
    assert_eq!(nodes, vec![node_a(), node_a(), node_a(), node_b(), node_b()]);
    let gaps: Vec<Duration> = calls
        .windows(2)
        .map(|pair| pair[1].at.duration_since(pair[0].at))
        .collect();
    let backoff = engine.config().backoff();
    assert_eq!(
        gaps,
        vec![
            backoff.delay_for(1),
            backoff.delay_for(2),
            Duration::ZERO,
            backoff.delay_for(1),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn repeated_failover_wraps_to_first_node() {
    let mut replies = vec![Reply::Status(Status::InvalidNodeAccount); 6];
    replies.push(Reply::Status(Status::Ok));
    let transport = SequencedNodeTransport::new(replies);
    let engine = Engine::new(transport.clone(), config(10));
    let mut tx = frozen(vec![node_a(), node_b(), node_c()]);

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;

    assert!(matches!(result, Ok(ref response) if response.node_id == node_a()));
    let calls = transport.calls();
    let nodes: Vec<NodeId> = calls.iter().map(|call| call.node_id).collect();
    assert_eq!(
        nodes,
        vec![
            node_a(),
            node_b(),
            node_c(),
            node_a(),
            node_b(),
            node_c(),
            node_a(),
        ]
    );
    assert!(
        calls
            .windows(2)
            .all(|pair| pair[1].at.duration_since(pair[0].at) == Duration::ZERO)
    );
}

#[tokio::test(start_paused = true)]
async fn each_node_receives_its_own_signed_copy() {
    let transport = SequencedNodeTransport::new(vec![
        Reply::Status(Status::InvalidNodeAccount),
        Reply::Status(Status::Ok),
    ]);
    let engine = Engine::new(transport.clone(), config(10));
    let key = SigningKey::from_bytes(&[8_u8; 32]);
    let mut tx = frozen(vec![node_a(), node_b()]);
    let _ = tx.sign(SignerRef::new(&key));

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;
    assert!(result.is_ok());

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    let first = sent_body(&calls[0]);
    let second = sent_body(&calls[1]);
    assert_eq!(first.node_id, node_a());
    assert_eq!(second.node_id, node_b());
    assert_eq!(first.transaction_id, second.transaction_id);
    assert_eq!(first.data, second.data);

    for call in &calls {
        let envelope: SignedTransaction =
            wire::decode("envelope", &call.request).expect("envelope decodes");
        assert_eq!(envelope.signatures.len(), 1);
        let pair = &envelope.signatures[0];
        assert_eq!(pair.public_key, Signer::public_key(&key));
        assert!(pair.public_key.verify(&envelope.body_bytes, &pair.signature));
    }
}

#[tokio::test(start_paused = true)]
async fn transient_transport_errors_exhaust_exact_budget() {
    let transport =
        SequencedNodeTransport::new(vec![Reply::Transport(TransportErrorKind::Unavailable)]);
    let engine = Engine::new(transport.clone(), config(3));
    let mut tx = frozen(vec![node_a(), node_b()]);

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(ExecuteError::MaxAttemptsExceeded {
            attempts: 3,
            last: LastFailure::Transport(TransportError {
                kind: TransportErrorKind::Unavailable,
                ..
            }),
            ..
        })
    ));
    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|call| call.node_id == node_a()));

    let backoff = engine.config().backoff();
    assert_eq!(calls[1].at.duration_since(calls[0].at), backoff.delay_for(1));
    assert_eq!(calls[2].at.duration_since(calls[1].at), backoff.delay_for(2));
}

#[tokio::test(start_paused = true)]
async fn terminal_precheck_status_is_returned_exactly() {
    let transport =
        SequencedNodeTransport::new(vec![Reply::Status(Status::InsufficientPayerBalance)]);
    let engine = Engine::new(transport.clone(), config(10));
    let mut tx = frozen(vec![node_a(), node_b()]);

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(ExecuteError::PrecheckStatus {
            status: Status::InsufficientPayerBalance,
            node_id,
            ..
        }) if node_id == node_a()
    ));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unrecoverable_transport_error_stops_immediately() {
    let transport =
        SequencedNodeTransport::new(vec![Reply::Transport(TransportErrorKind::Internal)]);
    let engine = Engine::new(transport.clone(), config(10));
    let mut tx = frozen(vec![node_a()]);

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(ExecuteError::Transport {
            source: TransportError {
                kind: TransportErrorKind::Internal,
                ..
            },
            ..
        })
    ));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_response_is_a_wire_error() {
    let transport = SequencedNodeTransport::new(vec![Reply::Raw(vec![0xff])]);
    let engine = Engine::new(transport.clone(), config(10));
    let mut tx = frozen(vec![node_a()]);

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;

    assert!(matches!(result, Err(ExecuteError::Wire { .. })));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn attempt_timeout_counts_as_retryable_deadline() {
    let transport = SequencedNodeTransport::new(vec![Reply::Hang, Reply::Status(Status::Ok)]);
    let engine = Engine::new(transport.clone(), config(10));
    let mut tx = frozen(vec![node_a()]);
    let started = Instant::now();

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;

    assert!(result.is_ok());
    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    let expected = Duration::from_secs(1).saturating_add(engine.config().backoff().delay_for(1));
    assert_eq!(calls[1].at.duration_since(started), expected);
}

#[tokio::test(start_paused = true)]
async fn timeouts_exhaust_budget_naming_deadline() {
    let transport = SequencedNodeTransport::new(vec![Reply::Hang]);
    let engine = Engine::new(transport.clone(), config(2));
    let mut tx = frozen(vec![node_a()]);

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(ExecuteError::MaxAttemptsExceeded {
            attempts: 2,
            last: LastFailure::Transport(TransportError {
                kind: TransportErrorKind::DeadlineExceeded,
                ..
            }),
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_stops_execution() {
    let transport = SequencedNodeTransport::new(vec![Reply::Status(Status::Busy)]);
    let engine = Engine::new(
        transport.clone(),
        config(10)
            .with_backoff(Duration::from_secs(5), Duration::from_secs(60))
            .expect("valid backoff"),
    );
    let mut tx = frozen(vec![node_a()]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result = submit(&engine, &mut tx, None, &cancel).await;

    assert!(matches!(
        result,
        Err(ExecuteError::Cancelled { attempts: 1, .. })
    ));
    assert_eq!(transport.calls().len(), 1);
    assert!(canceller.await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_token_sends_nothing() {
    let transport = SequencedNodeTransport::new(vec![Reply::Status(Status::Ok)]);
    let engine = Engine::new(transport.clone(), config(10));
    let mut tx = frozen(vec![node_a()]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = submit(&engine, &mut tx, None, &cancel).await;

    assert!(matches!(result, Err(ExecuteError::Cancelled { .. })));
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_attempt_budget_is_a_configuration_error() {
    let transport = SequencedNodeTransport::new(vec![Reply::Status(Status::Ok)]);
    let engine = Engine::new(transport.clone(), config(0));
    let mut tx = frozen(vec![node_a()]);

    let result = submit(&engine, &mut tx, None, &CancellationToken::new()).await;

    assert!(matches!(result, Err(ExecuteError::Config { .. })));
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn expired_operator_transaction_is_regenerated_and_resigned() {
    let transport = SequencedNodeTransport::new(vec![
        Reply::Status(Status::TransactionExpired),
        Reply::Status(Status::Ok),
    ]);
    let engine = Engine::new(transport.clone(), config(10));
    let key = SigningKey::from_bytes(&[9_u8; 32]);
    let operator_key: PublicKey = Signer::public_key(&key);
    let operator = Operator::new(payer(), Arc::new(key));
    let policy = RegeneratePolicy::default();
    let mut tx = frozen(vec![node_a()]);
    let _ = tx.sign(operator.signer());

    let result = submit(
        &engine,
        &mut tx,
        Some(Regeneration {
            policy: &policy,
            operator: &operator,
        }),
        &CancellationToken::new(),
    )
    .await;

    assert!(result.is_ok());
    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    let first = sent_body(&calls[0]);
    let second = sent_body(&calls[1]);
    assert_eq!(first.transaction_id, tx_id());
    assert_ne!(second.transaction_id, tx_id());
    assert_eq!(second.transaction_id.payer, payer());
    if let Ok(response) = result {
        assert_eq!(response.transaction_id, second.transaction_id);
    }
    let envelope: SignedTransaction =
        wire::decode("envelope", &calls[1].request).expect("envelope decodes");
    assert_eq!(envelope.signatures.len(), 1);
    assert_eq!(envelope.signatures[0].public_key, operator_key);
    assert!(operator_key.verify(&envelope.body_bytes, &envelope.signatures[0].signature));
}

#[tokio::test(start_paused = true)]
async fn budget_spent_on_regeneration_reports_fresh_identity() {
    let transport =
        SequencedNodeTransport::new(vec![Reply::Status(Status::TransactionExpired)]);
    let engine = Engine::new(transport.clone(), config(1));
    let operator = Operator::new(payer(), Arc::new(SigningKey::from_bytes(&[9_u8; 32])));
    let policy = RegeneratePolicy::default();
    let mut tx = frozen(vec![node_a()]);
    let _ = tx.sign(operator.signer());

    let result = submit(
        &engine,
        &mut tx,
        Some(Regeneration {
            policy: &policy,
            operator: &operator,
        }),
        &CancellationToken::new(),
    )
    .await;

    let current = tx.chunks().first().map(FrozenChunk::transaction_id);
    assert_ne!(current, Some(tx_id()));
    assert!(matches!(
        result,
        Err(ExecuteError::MaxAttemptsExceeded {
            attempts: 1,
            last: LastFailure::Status(Status::TransactionExpired),
            transaction_id,
        }) if Some(transaction_id) == current
    ));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn foreign_signatures_block_regeneration() {
    let transport =
        SequencedNodeTransport::new(vec![Reply::Status(Status::TransactionExpired)]);
    let engine = Engine::new(transport.clone(), config(10));
    let operator = Operator::new(payer(), Arc::new(SigningKey::from_bytes(&[9_u8; 32])));
    let other = SigningKey::from_bytes(&[10_u8; 32]);
    let policy = RegeneratePolicy::default();
    let mut tx = frozen(vec![node_a()]);
    let _ = tx.sign(operator.signer());
    let _ = tx.sign(SignerRef::new(&other));

    let result = submit(
        &engine,
        &mut tx,
        Some(Regeneration {
            policy: &policy,
            operator: &operator,
        }),
        &CancellationToken::new(),
    )
    .await;

    assert!(matches!(
        result,
        Err(ExecuteError::PrecheckStatus {
            status: Status::TransactionExpired,
            ..
        })
    ));
    assert_eq!(transport.calls().len(), 1);
}

#[test]
fn execution_config_rejects_inverted_backoff() {
    let config =
        ExecutionConfig::default().with_backoff(Duration::from_secs(2), Duration::from_secs(1));
    assert!(config.is_err());
}

#[test]
fn error_accessors_expose_status_and_identity() {
    let error = ExecuteError::Chunk {
        number: 2,
        total: 3,
        transaction_id: tx_id(),
        source: Box::new(ExecuteError::PrecheckStatus {
            status: Status::InvalidSignature,
            transaction_id: tx_id(),
            node_id: node_a(),
        }),
    };
    assert_eq!(error.status(), Some(Status::InvalidSignature));
    assert_eq!(error.transaction_id(), Some(tx_id()));
    assert!(error.to_string().contains("chunk 2/3"));
}
