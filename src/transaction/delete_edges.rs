//! Chain processors for deleting mirrored edges.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::storage::keys;
use crate::storage::{CompactCodec, DeleteEdgesProcessor, DeleteEdgesRequest, ExecResponse};
use crate::types::{ChainOpKind, EdgeKey, PartitionId, ResultCode, ResumeType, TermId};

use super::chain::{ChainCore, ChainMode, ChainProcessor, ChainState};
use super::manager::TransactionManager;

/// Initiator of a chain delete covering one local and one remote partition.
pub struct ChainDeleteEdgesLocalProcessor {
    core: ChainCore,
    req: DeleteEdgesRequest,
    vid_len: usize,
}

impl ChainDeleteEdgesLocalProcessor {
    /// Processor for a client request. `req` must hold a single partition
    /// whose edges all mirror into the same remote partition.
    pub fn new(txn: Arc<TransactionManager>, req: DeleteEdgesRequest) -> Self {
        Self::with_mode(txn, req, ChainMode::Normal)
    }

    /// Processor replaying an intent recovered from a prime or double-prime.
    pub fn resume(txn: Arc<TransactionManager>, req: DeleteEdgesRequest, resume: ResumeType) -> Self {
        Self::with_mode(txn, req, ChainMode::Resume(resume))
    }

    fn with_mode(txn: Arc<TransactionManager>, req: DeleteEdgesRequest, mode: ChainMode) -> Self {
        let local_part = req.parts.keys().next().copied().unwrap_or_default();
        let core = ChainCore::new(txn, ChainOpKind::Delete, req.space_id, local_part, mode);
        Self {
            core,
            req,
            vid_len: 0,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> ChainState {
        self.core.state
    }

    fn edge_keys(&self) -> &[EdgeKey] {
        self.req
            .parts
            .values()
            .next()
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Validates vid lengths and resolves the single remote partition.
    fn check_request(&mut self) -> Result<(), ResultCode> {
        if self.req.parts.len() != 1 || self.edge_keys().is_empty() {
            return Err(ResultCode::InvalidData);
        }
        let env = self.core.env();
        self.vid_len = env.schema.vid_len(self.req.space_id)?;
        let part_num = env.schema.part_num(self.req.space_id)?;
        let remote_part = keys::part_of_vid(&self.edge_keys()[0].dst, part_num);
        let mut raw_keys = Vec::with_capacity(self.edge_keys().len());
        for edge_key in self.edge_keys() {
            if keys::part_of_vid(&edge_key.dst, part_num) != remote_part {
                return Err(ResultCode::InvalidData);
            }
            let raw = keys::edge_key(self.vid_len, self.core.local_part, edge_key)
                .ok_or(ResultCode::InvalidVid)?;
            raw_keys.push(raw);
        }
        self.core.remote_part = remote_part;
        self.core.set_keys(raw_keys);
        Ok(())
    }

    fn intents(&self, shadow: fn(PartitionId, &[u8]) -> Vec<u8>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let part = self.core.local_part;
        self.edge_keys()
            .iter()
            .filter_map(|edge_key| {
                let raw = keys::edge_key(self.vid_len, part, edge_key)?;
                let single = DeleteEdgesRequest {
                    space_id: self.req.space_id,
                    parts: BTreeMap::from([(part, vec![edge_key.clone()])]),
                };
                let mut value = single.encode();
                value.push(keys::op_tag(ChainOpKind::Delete));
                Some((shadow(part, &raw), value))
            })
            .collect()
    }

    fn make_prime(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.intents(keys::prime_key_for)
    }

    fn make_double_prime(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.intents(keys::double_prime_key_for)
    }

    fn reversed_request(&self) -> DeleteEdgesRequest {
        let reversed = self.edge_keys().iter().map(keys::reverse_edge_key).collect();
        DeleteEdgesRequest {
            space_id: self.req.space_id,
            parts: BTreeMap::from([(self.core.remote_part, reversed)]),
        }
    }
}

#[async_trait]
impl ChainProcessor for ChainDeleteEdgesLocalProcessor {
    async fn prepare_local(&mut self) -> ResultCode {
        if let Err(code) = self.check_request() {
            self.core.trace("prepare", code);
            return code;
        }
        let code = self.core.fetch_term();
        if !code.is_ok() {
            return code;
        }
        match self.core.mode {
            ChainMode::Normal => {
                let code = self.core.lock();
                if !code.is_ok() {
                    return code;
                }
                let primes = self.make_prime();
                self.core.write_primes(primes).await
            }
            ChainMode::Resume(resume) => {
                if resume == ResumeType::ResumeChain {
                    let code = self.core.lock();
                    if !code.is_ok() {
                        return code;
                    }
                }
                self.core.resume_prepared()
            }
        }
    }

    async fn process_remote(&mut self, code: ResultCode) -> ResultCode {
        if !self.core.ready_for_remote(code) {
            return code;
        }
        let reversed = self.reversed_request();
        let client = self.core.env().client;
        let term = self.core.term;
        let mut retry = self.core.retry();
        let code = loop {
            let code = client.chain_delete_edges(reversed.clone(), term).await;
            if !retry.again(code).await {
                break code;
            }
        };
        self.core.remote_done(code)
    }

    async fn process_local(&mut self, code: ResultCode) -> ResultCode {
        let double_primes = if self.core.state == ChainState::RemoteDone {
            self.make_double_prime()
        } else {
            Vec::new()
        };
        let env = self.core.env();
        let req = &self.req;
        let part = self.core.local_part;
        self.core
            .settle(code, double_primes, move |hook| async move {
                DeleteEdgesProcessor::new(env.kv.as_ref(), env.schema.as_ref())
                    .with_hook(part, hook)
                    .process(req)
                    .await
                    .code()
            })
            .await
    }

    fn finish(&mut self, code: ResultCode) -> ResultCode {
        self.core.finish(code)
    }
}

/// Mirror side of a chain delete.
pub struct ChainDeleteEdgesRemoteProcessor {
    txn: Arc<TransactionManager>,
}

impl ChainDeleteEdgesRemoteProcessor {
    /// Creates the processor.
    pub fn new(txn: Arc<TransactionManager>) -> Self {
        Self { txn }
    }

    /// Applies a reversed delete sent by the initiator at `term`.
    pub async fn process(&self, req: DeleteEdgesRequest, term: TermId) -> ExecResponse {
        if let Some(first) = req.parts.values().flatten().next() {
            let code = self
                .txn
                .fence_remote(req.space_id, req.parts.keys().copied(), &first.dst, term);
            if !code.is_ok() {
                let mut resp = ExecResponse::default();
                for part in req.parts.keys() {
                    resp.push_result(*part, code);
                }
                return resp;
            }
        }
        let env = self.txn.env();
        DeleteEdgesProcessor::new(env.kv.as_ref(), env.schema.as_ref())
            .process(&req)
            .await
    }
}

/// Fans a client delete out into one chain task per
/// `(local partition, remote partition)` pair.
pub struct ChainDeleteEdgesGroupProcessor {
    txn: Arc<TransactionManager>,
}

impl ChainDeleteEdgesGroupProcessor {
    /// Creates the processor.
    pub fn new(txn: Arc<TransactionManager>) -> Self {
        Self { txn }
    }

    /// Runs every sub-request and aggregates per-partition codes.
    pub async fn process(&self, req: DeleteEdgesRequest) -> ExecResponse {
        let mut resp = ExecResponse::default();
        let part_num = match self.txn.env().schema.part_num(req.space_id) {
            Ok(n) => n,
            Err(code) => {
                for part in req.parts.keys() {
                    resp.push_result(*part, code);
                }
                return resp;
            }
        };

        let mut shuffled: BTreeMap<(PartitionId, PartitionId), Vec<EdgeKey>> = BTreeMap::new();
        for (part, edge_keys) in req.parts {
            for edge_key in edge_keys {
                let remote = keys::part_of_vid(&edge_key.dst, part_num);
                shuffled.entry((part, remote)).or_default().push(edge_key);
            }
        }

        let mut handles = Vec::with_capacity(shuffled.len());
        for ((part, _), edge_keys) in shuffled {
            let sub = DeleteEdgesRequest {
                space_id: req.space_id,
                parts: BTreeMap::from([(part, edge_keys)]),
            };
            let task = ChainDeleteEdgesLocalProcessor::new(self.txn.clone(), sub);
            handles.push((part, self.txn.add_chain_task(task.into())));
        }
        for (part, handle) in handles {
            let code = handle.await.unwrap_or(ResultCode::Unknown);
            resp.push_result(part, code);
        }
        resp
    }
}
