//! Chain processors for inserting mirrored edges.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::storage::keys;
use crate::storage::{read_edge, AddEdgesProcessor, AddEdgesRequest, CompactCodec, ExecResponse, NewEdge};
use crate::types::{
    now_micros, ChainOpKind, EdgeVersion, PartitionId, ResultCode, ResumeType, TermId,
};

use super::chain::{ChainCore, ChainMode, ChainProcessor, ChainState};
use super::manager::TransactionManager;

/// Initiator of a chain insert covering one local and one remote partition.
///
/// Also serves replays of persisted insert intents, see
/// [`ChainAddEdgesLocalProcessor::resume`].
pub struct ChainAddEdgesLocalProcessor {
    core: ChainCore,
    req: AddEdgesRequest,
    vid_len: usize,
}

impl ChainAddEdgesLocalProcessor {
    /// Processor for a client request. `req` must hold a single partition
    /// whose edges all mirror into the same remote partition.
    pub fn new(txn: Arc<TransactionManager>, req: AddEdgesRequest) -> Self {
        Self::with_mode(txn, req, ChainMode::Normal)
    }

    /// Processor replaying an intent recovered from a prime or double-prime.
    pub fn resume(txn: Arc<TransactionManager>, req: AddEdgesRequest, resume: ResumeType) -> Self {
        Self::with_mode(txn, req, ChainMode::Resume(resume))
    }

    fn with_mode(txn: Arc<TransactionManager>, req: AddEdgesRequest, mode: ChainMode) -> Self {
        let local_part = req.parts.keys().next().copied().unwrap_or_default();
        let core = ChainCore::new(txn, ChainOpKind::Insert, req.space_id, local_part, mode);
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

    /// The request as it will be persisted and mirrored.
    pub fn request(&self) -> &AddEdgesRequest {
        &self.req
    }

    fn edges(&self) -> &[NewEdge] {
        self.req
            .parts
            .values()
            .next()
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn check_request(&mut self) -> Result<(), ResultCode> {
        if self.req.parts.len() != 1 || self.edges().is_empty() {
            return Err(ResultCode::InvalidData);
        }
        let env = self.core.env();
        self.vid_len = env.schema.vid_len(self.req.space_id)?;
        let part_num = env.schema.part_num(self.req.space_id)?;
        let mut remote_part = None;
        let mut raw_keys = Vec::with_capacity(self.edges().len());
        for edge in self.edges() {
            let raw = keys::edge_key(self.vid_len, self.core.local_part, &edge.key)
                .ok_or(ResultCode::InvalidVid)?;
            let part = keys::part_of_vid(&edge.key.dst, part_num);
            if remote_part.is_some_and(|p| p != part) {
                return Err(ResultCode::InvalidData);
            }
            remote_part = Some(part);
            raw_keys.push(raw);
        }
        self.core.remote_part = remote_part.unwrap_or_default();
        self.core.set_keys(raw_keys);
        Ok(())
    }

    /// Resolves every omitted or null column to its schema default, so both
    /// mirrored copies store identical values even for `now()` defaults.
    fn replace_null_with_default_value(&mut self) -> Result<(), ResultCode> {
        let env = self.core.env();
        let mut resolved_names: Option<Vec<String>> = None;
        for edge in self.req.parts.values_mut().flatten() {
            let schema = env.schema.edge_schema(self.req.space_id, edge.key.edge_type)?;
            edge.props = schema.build_row(&self.req.prop_names, &edge.props)?;
            let names: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
            match &resolved_names {
                Some(existing) if *existing != names => return Err(ResultCode::InvalidData),
                _ => resolved_names = Some(names),
            }
        }
        if let Some(names) = resolved_names {
            self.req.prop_names = names;
        }
        Ok(())
    }

    fn intents(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let part = self.core.local_part;
        self.edges()
            .iter()
            .filter_map(|edge| {
                let raw = keys::edge_key(self.vid_len, part, &edge.key)?;
                let single = AddEdgesRequest {
                    space_id: self.req.space_id,
                    parts: BTreeMap::from([(part, vec![edge.clone()])]),
                    prop_names: self.req.prop_names.clone(),
                    if_not_exists: self.req.if_not_exists,
                    version: self.req.version,
                };
                let mut value = single.encode();
                value.push(keys::op_tag(ChainOpKind::Insert));
                Some((raw, value))
            })
            .collect()
    }

    fn make_prime(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let part = self.core.local_part;
        self.intents()
            .into_iter()
            .map(|(raw, value)| (keys::prime_key_for(part, &raw), value))
            .collect()
    }

    fn make_double_prime(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let part = self.core.local_part;
        self.intents()
            .into_iter()
            .map(|(raw, value)| (keys::double_prime_key_for(part, &raw), value))
            .collect()
    }

    fn reversed_request(&self) -> AddEdgesRequest {
        let edges = self
            .edges()
            .iter()
            .map(|edge| NewEdge {
                key: keys::reverse_edge_key(&edge.key),
                props: edge.props.clone(),
            })
            .collect();
        AddEdgesRequest {
            space_id: self.req.space_id,
            parts: BTreeMap::from([(self.core.remote_part, edges)]),
            prop_names: self.req.prop_names.clone(),
            if_not_exists: self.req.if_not_exists,
            version: self.req.version,
        }
    }
}

#[async_trait]
impl ChainProcessor for ChainAddEdgesLocalProcessor {
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
                if let Err(code) = self.replace_null_with_default_value() {
                    return code;
                }
                let code = self.core.lock();
                if !code.is_ok() {
                    return code;
                }
                self.req.version = Some(now_micros());
                let primes = self.make_prime();
                self.core.write_primes(primes).await
            }
            ChainMode::Resume(resume) => {
                if self.req.version.is_none() {
                    self.req.version = Some(now_micros());
                }
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
        let (term, version) = (self.core.term, self.req.version);
        let mut retry = self.core.retry();
        let code = loop {
            let code = client.chain_add_edges(reversed.clone(), term, version).await;
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
                AddEdgesProcessor::new(env.kv.as_ref(), env.schema.as_ref())
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

/// Mirror side of a chain insert: fences the caller's term, then commits.
pub struct ChainAddEdgesRemoteProcessor {
    txn: Arc<TransactionManager>,
}

impl ChainAddEdgesRemoteProcessor {
    /// Creates the processor.
    pub fn new(txn: Arc<TransactionManager>) -> Self {
        Self { txn }
    }

    /// Applies a reversed insert sent by the initiator at `term`.
    pub async fn process(
        &self,
        mut req: AddEdgesRequest,
        term: TermId,
        edge_version: Option<EdgeVersion>,
    ) -> ExecResponse {
        let code = self.check(&req, term, edge_version).await;
        if !code.is_ok() {
            let mut resp = ExecResponse::default();
            for part in req.parts.keys() {
                resp.push_result(*part, code);
            }
            return resp;
        }
        if edge_version.is_some() {
            req.version = edge_version;
        }
        let env = self.txn.env();
        AddEdgesProcessor::new(env.kv.as_ref(), env.schema.as_ref())
            .process(&req)
            .await
    }

    async fn check(
        &self,
        req: &AddEdgesRequest,
        term: TermId,
        edge_version: Option<EdgeVersion>,
    ) -> ResultCode {
        let Some(first) = req.parts.values().flatten().next() else {
            return ResultCode::Succeeded;
        };
        let code = self.txn.fence_remote(
            req.space_id,
            req.parts.keys().copied(),
            &first.key.dst,
            term,
        );
        if !code.is_ok() {
            return code;
        }
        let Some(version) = edge_version else {
            return ResultCode::Succeeded;
        };
        let env = self.txn.env();
        let vid_len = match env.schema.vid_len(req.space_id) {
            Ok(len) => len,
            Err(code) => return code,
        };
        for (part, edges) in &req.parts {
            for edge in edges {
                let Some(raw) = keys::edge_key(vid_len, *part, &edge.key) else {
                    return ResultCode::InvalidVid;
                };
                match read_edge(env.kv.as_ref(), req.space_id, *part, &raw).await {
                    Ok(Some(row)) if row.version > version => {
                        warn!(
                            space = req.space_id,
                            part,
                            stored = row.version,
                            version,
                            "chain.remote.outdated_edge"
                        );
                        return ResultCode::OutdatedEdge;
                    }
                    Ok(_) => {}
                    Err(code) => return code,
                }
            }
        }
        ResultCode::Succeeded
    }
}

/// Fans a client insert out into one chain task per
/// `(local partition, remote partition)` pair.
pub struct ChainAddEdgesGroupProcessor {
    txn: Arc<TransactionManager>,
}

impl ChainAddEdgesGroupProcessor {
    /// Creates the processor.
    pub fn new(txn: Arc<TransactionManager>) -> Self {
        Self { txn }
    }

    /// Runs every sub-request and aggregates per-partition codes.
    pub async fn process(&self, req: AddEdgesRequest) -> ExecResponse {
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

        let mut shuffled: BTreeMap<(PartitionId, PartitionId), Vec<NewEdge>> = BTreeMap::new();
        for (part, edges) in req.parts {
            for edge in edges {
                let remote = keys::part_of_vid(&edge.key.dst, part_num);
                shuffled.entry((part, remote)).or_default().push(edge);
            }
        }

        let mut handles = Vec::with_capacity(shuffled.len());
        for ((part, _), edges) in shuffled {
            let sub = AddEdgesRequest {
                space_id: req.space_id,
                parts: BTreeMap::from([(part, edges)]),
                prop_names: req.prop_names.clone(),
                if_not_exists: req.if_not_exists,
                version: None,
            };
            let task = ChainAddEdgesLocalProcessor::new(self.txn.clone(), sub);
            handles.push((part, self.txn.add_chain_task(task.into())));
        }
        for (part, handle) in handles {
            let code = handle.await.unwrap_or(ResultCode::Unknown);
            resp.push_result(part, code);
        }
        resp
    }
}
