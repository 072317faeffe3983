//! Submission of one frozen chunk through the engine.

use sha2::{Digest, Sha256};

use super::{
    ExecuteError, ExecutionOutcome, Executable, RegeneratePolicy, RetryTarget, RpcMethod,
    TransactionResponse,
};
use crate::{
    builder::FrozenChunk,
    identity::{NodeId, TransactionId},
    signing::Operator,
    status::Status,
    wire::{self, NodeResponse},
};

/// Everything needed to move a chunk to a fresh identity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Regeneration<'a> {
    /// Statuses that trigger regeneration.
    pub(crate) policy: &'a RegeneratePolicy,
    /// Payer of the fresh identity and its only allowed signer.
    pub(crate) operator: &'a Operator,
}

/// Submits one chunk's envelopes, one node at a time.
pub(crate) struct TransactionAttempt<'a> {
    /// Chunk being submitted.
    chunk: &'a mut FrozenChunk,
    /// Candidate nodes, aligned with envelope positions.
    node_ids: Vec<NodeId>,
    /// Set when the identity may be regenerated.
    regeneration: Option<Regeneration<'a>>,
    /// Hash of the bytes sent by the latest attempt.
    last_hash: [u8; 32],
}

impl<'a> TransactionAttempt<'a> {
    /// Wraps a chunk for execution.
    pub(crate) fn new(chunk: &'a mut FrozenChunk, regeneration: Option<Regeneration<'a>>) -> Self {
        let node_ids = chunk.envelopes().node_ids();
        Self {
            chunk,
            node_ids,
            regeneration,
            last_hash: [0; 32],
        }
    }
}

impl Executable for TransactionAttempt<'_> {
    type Output = TransactionResponse;

    fn method(&self) -> RpcMethod {
        RpcMethod::SubmitTransaction
    }

    fn transaction_id(&self) -> TransactionId {
        self.chunk.transaction_id()
    }

    fn node_ids(&self) -> Vec<NodeId> {
        self.node_ids.clone()
    }

    fn request_bytes(&mut self, node_index: usize) -> Result<Vec<u8>, ExecuteError> {
        let envelope = self
            .chunk
            .envelopes_mut()
            .get_mut(node_index)
            .ok_or_else(|| ExecuteError::Config {
                message: format!("no envelope at node position {node_index}"),
            })?;
        let bytes = envelope
            .wire_bytes()
            .map_err(|source| ExecuteError::Wire { source })?
            .to_vec();
        self.last_hash = Sha256::digest(&bytes).into();
        Ok(bytes)
    }

    fn classify(
        &mut self,
        node_index: usize,
        response: &[u8],
    ) -> ExecutionOutcome<TransactionResponse> {
        let response: NodeResponse = match wire::decode("node response", response) {
            Ok(response) => response,
            Err(source) => return ExecutionOutcome::UnrecoverableError(ExecuteError::Wire { source }),
        };
        match response.status {
            status if status.is_success() => {
                let Some(node_id) = self.node_ids.get(node_index).copied() else {
                    return ExecutionOutcome::UnrecoverableError(ExecuteError::Config {
                        message: format!("no node at position {node_index}"),
                    });
                };
                ExecutionOutcome::Success(TransactionResponse {
                    transaction_id: self.chunk.transaction_id(),
                    node_id,
                    hash: self.last_hash,
                })
            }
            status if status.is_node_busy() => ExecutionOutcome::RetryableStatus {
                status,
                target: RetryTarget::SameNode,
            },
            Status::InvalidNodeAccount => ExecutionOutcome::RetryableStatus {
                status: Status::InvalidNodeAccount,
                target: RetryTarget::NextNode,
            },
            status => ExecutionOutcome::TerminalStatus(status),
        }
    }

    fn regenerate_identity(&mut self, status: Status) -> Result<bool, ExecuteError> {
        let Some(regeneration) = self.regeneration else {
            return Ok(false);
        };
        if !regeneration.policy.should_regenerate(status) {
            return Ok(false);
        }
        let operator_key = regeneration.operator.public_key();
        if self
            .chunk
            .envelopes()
            .signers()
            .iter()
            .any(|signer| *signer != operator_key)
        {
            // Signatures from other keys cannot be reproduced for a new body.
            return Ok(false);
        }
        let fresh = TransactionId::generate(regeneration.operator.account_id());
        self.chunk
            .regenerate(fresh)
            .map_err(|source| ExecuteError::Build { source })?;
        let _ = self
            .chunk
            .envelopes_mut()
            .sign(regeneration.operator.signer());
        Ok(true)
    }
}
