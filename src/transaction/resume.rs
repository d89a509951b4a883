//! Background replay of dangling chain operations.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{ChainError, Result};
use crate::storage::keys;
use crate::storage::{AddEdgesRequest, CompactCodec, DeleteEdgesRequest, UpdateEdgeRequest};
use crate::types::{ChainOpKind, EdgeKey, PartitionId, ResultCode, ResumeType, SpaceId};

use super::add_edges::ChainAddEdgesLocalProcessor;
use super::chain::ChainTask;
use super::delete_edges::ChainDeleteEdgesLocalProcessor;
use super::manager::TransactionManager;
use super::update_edge::ChainUpdateEdgeLocalProcessor;

/// Rebuilds chain processors from persisted intent values.
pub struct ChainProcessorFactory;

impl ChainProcessorFactory {
    /// Decodes `value`, the content of the prime or double-prime of
    /// `raw_key`, into a replaying task of the matching kind.
    ///
    /// Fails with [`ChainError::CorruptRecord`] on an unknown op tag or when
    /// the payload describes a different edge than the key it is stored under.
    pub fn make_processor(
        txn: &Arc<TransactionManager>,
        space: SpaceId,
        raw_key: &[u8],
        resume: ResumeType,
        value: &[u8],
    ) -> Result<ChainTask> {
        let kind = keys::parse_type(value)?;
        let Some((_, payload)) = value.split_last() else {
            return Err(ChainError::CorruptRecord("empty intent value".into()));
        };
        let vid_len = txn.env().schema.vid_len(space)?;
        let part = keys::part_of_key(raw_key)?;
        let task = match kind {
            ChainOpKind::Insert => {
                let req = AddEdgesRequest::decode(payload)?;
                let edge = match req.parts.get(&part).map(Vec::as_slice) {
                    Some([edge]) if req.parts.len() == 1 => &edge.key,
                    _ => return Err(Self::mismatch(raw_key)),
                };
                Self::expect_key(vid_len, part, edge, raw_key)?;
                ChainAddEdgesLocalProcessor::resume(Arc::clone(txn), req, resume).into()
            }
            ChainOpKind::Update => {
                let req = UpdateEdgeRequest::decode(payload)?;
                if req.part_id != part {
                    return Err(Self::mismatch(raw_key));
                }
                Self::expect_key(vid_len, part, &req.edge_key, raw_key)?;
                ChainUpdateEdgeLocalProcessor::resume(Arc::clone(txn), req, resume).into()
            }
            ChainOpKind::Delete => {
                let req = DeleteEdgesRequest::decode(payload)?;
                let edge_key = match req.parts.get(&part).map(Vec::as_slice) {
                    Some([edge_key]) if req.parts.len() == 1 => edge_key,
                    _ => return Err(Self::mismatch(raw_key)),
                };
                Self::expect_key(vid_len, part, edge_key, raw_key)?;
                ChainDeleteEdgesLocalProcessor::resume(Arc::clone(txn), req, resume).into()
            }
        };
        Ok(task)
    }

    fn expect_key(vid_len: usize, part: PartitionId, key: &EdgeKey, raw_key: &[u8]) -> Result<()> {
        match keys::edge_key(vid_len, part, key) {
            Some(encoded) if encoded == raw_key => Ok(()),
            _ => Err(Self::mismatch(raw_key)),
        }
    }

    fn mismatch(raw_key: &[u8]) -> ChainError {
        ChainError::CorruptRecord(format!(
            "intent does not describe edge {}",
            hex::encode(raw_key)
        ))
    }
}

/// Outcome counts of one resume pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResumeSummary {
    /// Tasks replayed.
    pub replayed: usize,
    /// Replays that converged (including stale no-ops).
    pub resolved: usize,
    /// Entries dropped without replay.
    pub dropped: usize,
}

enum Next {
    Replay(ChainTask),
    Drop(&'static str),
    Retry,
}

/// Drains the dangling-edge table once.
pub struct ChainResumeProcessor {
    txn: Arc<TransactionManager>,
}

impl ChainResumeProcessor {
    /// Creates a resumer for `txn`.
    pub fn new(txn: Arc<TransactionManager>) -> Self {
        Self { txn }
    }

    /// Replays every dangling edge whose intent is still on disk, concurrently.
    ///
    /// Entries whose partition moved away or whose intent vanished are
    /// dropped; transient read failures are left for the next pass.
    pub async fn process(&self) -> ResumeSummary {
        let _pass = self.txn.resume_gate().lock().await;
        let mut summary = ResumeSummary::default();
        let mut pending = Vec::new();
        for (space, raw, resume) in self.txn.dangling_edges() {
            match self.next(space, &raw, resume).await {
                Next::Replay(task) => {
                    let handle = self.txn.add_chain_task(task);
                    pending.push((space, raw, resume, handle));
                }
                Next::Drop(reason) => {
                    info!(space, key = %hex::encode(&raw), resume = %resume, reason, "chain.resume.drop");
                    self.txn.del_prime(space, &raw);
                    self.txn.metrics().resume_dropped();
                    summary.dropped += 1;
                }
                Next::Retry => {}
            }
        }
        for (space, raw, resume, handle) in pending {
            let code = handle.await.unwrap_or(ResultCode::Unknown);
            summary.replayed += 1;
            self.txn.metrics().resume_attempted(code);
            if matches!(code, ResultCode::Succeeded | ResultCode::OutdatedEdge) {
                summary.resolved += 1;
            } else {
                debug!(space, key = %hex::encode(&raw), resume = %resume, code = %code, "chain.resume.retry_later");
            }
        }
        summary
    }

    async fn next(&self, space: SpaceId, raw: &[u8], resume: ResumeType) -> Next {
        let Ok(part) = keys::part_of_key(raw) else {
            return Next::Drop("malformed key");
        };
        if !self.txn.env().leadership.is_leader(space, part) {
            return Next::Drop("not leader");
        }
        let key = match resume {
            ResumeType::ResumeChain => keys::prime_key_for(part, raw),
            ResumeType::ResumeRemote => keys::double_prime_key_for(part, raw),
        };
        let value = match self.txn.env().kv.get(space, part, &key).await {
            Ok(value) => value,
            Err(ResultCode::KeyNotFound) => return Next::Drop("intent gone"),
            Err(ResultCode::LeaderChanged) => return Next::Drop("leader changed"),
            Err(code) => {
                warn!(space, part, code = %code, "chain.resume.read_failed");
                return Next::Retry;
            }
        };
        match ChainProcessorFactory::make_processor(&self.txn, space, raw, resume, &value) {
            Ok(task) => Next::Replay(task),
            Err(err) => {
                error!(space, part, key = %hex::encode(raw), error = %err, "chain.resume.corrupt_intent");
                Next::Drop("corrupt intent")
            }
        }
    }
}
