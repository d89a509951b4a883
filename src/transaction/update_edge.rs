//! Chain processors for updating one mirrored edge.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::storage::keys;
use crate::storage::{read_edge, CompactCodec, ExecResponse, UpdateEdgeProcessor, UpdateEdgeRequest, UpdatedProp};
use crate::types::{now_micros, ChainOpKind, EdgeVersion, ResultCode, ResumeType, TermId};

use super::chain::{ChainCore, ChainMode, ChainProcessor, ChainState};
use super::manager::TransactionManager;

/// Initiator of a chain update. Locks a single key.
pub struct ChainUpdateEdgeLocalProcessor {
    core: ChainCore,
    req: UpdateEdgeRequest,
    vid_len: usize,
}

impl ChainUpdateEdgeLocalProcessor {
    /// Processor for a client request.
    pub fn new(txn: Arc<TransactionManager>, req: UpdateEdgeRequest) -> Self {
        Self::with_mode(txn, req, ChainMode::Normal)
    }

    /// Processor replaying an intent recovered from a prime or double-prime.
    pub fn resume(txn: Arc<TransactionManager>, req: UpdateEdgeRequest, resume: ResumeType) -> Self {
        Self::with_mode(txn, req, ChainMode::Resume(resume))
    }

    fn with_mode(txn: Arc<TransactionManager>, req: UpdateEdgeRequest, mode: ChainMode) -> Self {
        let core = ChainCore::new(txn, ChainOpKind::Update, req.space_id, req.part_id, mode);
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
    pub fn request(&self) -> &UpdateEdgeRequest {
        &self.req
    }

    fn raw_key(&self) -> Option<Vec<u8>> {
        keys::edge_key(self.vid_len, self.req.part_id, &self.req.edge_key)
    }

    fn check_request(&mut self) -> Result<(), ResultCode> {
        let env = self.core.env();
        self.vid_len = env.schema.vid_len(self.req.space_id)?;
        let part_num = env.schema.part_num(self.req.space_id)?;
        let raw = self.raw_key().ok_or(ResultCode::InvalidVid)?;
        self.core.remote_part = keys::part_of_vid(&self.req.edge_key.dst, part_num);
        self.core.set_keys(vec![raw]);
        Ok(())
    }

    /// Reads the local row and fixes what both copies will store: the new
    /// version and, for an upsert of a missing edge, every column value.
    async fn resolve_against_local(&mut self) -> Result<(), ResultCode> {
        let env = self.core.env();
        let raw = self.raw_key().ok_or(ResultCode::InvalidVid)?;
        let stored = read_edge(env.kv.as_ref(), self.req.space_id, self.req.part_id, &raw).await?;
        let now = now_micros();
        let version = match stored {
            Some(row) => now.max(row.version.saturating_add(1)),
            None if self.req.insertable => {
                let schema = env.schema.edge_schema(self.req.space_id, self.req.edge_key.edge_type)?;
                let names: Vec<String> = self.req.updated_props.iter().map(|p| p.name.clone()).collect();
                let values: Vec<_> = self.req.updated_props.iter().map(|p| p.value.clone()).collect();
                let row = schema.build_row(&names, &values)?;
                self.req.updated_props = schema
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| UpdatedProp {
                        name: column.name.clone(),
                        value,
                    })
                    .collect();
                now
            }
            None => return Err(ResultCode::EdgeNotFound),
        };
        self.req.version = Some(version);
        Ok(())
    }

    /// Whether the recorded version is still the newest one of the edge.
    /// A later write makes the replay stale.
    async fn check_version(&self) -> Result<bool, ResultCode> {
        let Some(recorded) = self.req.version else {
            return Ok(true);
        };
        let env = self.core.env();
        let raw = self.raw_key().ok_or(ResultCode::InvalidVid)?;
        let stored = read_edge(env.kv.as_ref(), self.req.space_id, self.req.part_id, &raw).await?;
        Ok(stored.map_or(true, |row| row.version <= recorded))
    }

    fn intent_value(&self) -> Vec<u8> {
        let mut value = self.req.encode();
        value.push(keys::op_tag(ChainOpKind::Update));
        value
    }

    fn make_prime(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.core
            .prime_keys()
            .into_iter()
            .map(|key| (key, self.intent_value()))
            .collect()
    }

    fn make_double_prime(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.core
            .double_prime_keys()
            .into_iter()
            .map(|key| (key, self.intent_value()))
            .collect()
    }

    fn reversed_request(&self) -> UpdateEdgeRequest {
        UpdateEdgeRequest {
            space_id: self.req.space_id,
            part_id: self.core.remote_part,
            edge_key: keys::reverse_edge_key(&self.req.edge_key),
            updated_props: self.req.updated_props.clone(),
            insertable: self.req.insertable,
            version: self.req.version,
        }
    }
}

#[async_trait]
impl ChainProcessor for ChainUpdateEdgeLocalProcessor {
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
                if let Err(code) = self.resolve_against_local().await {
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
                match self.check_version().await {
                    Ok(true) => self.core.resume_prepared(),
                    Ok(false) => {
                        info!(
                            space = self.req.space_id,
                            part = self.req.part_id,
                            edge = %self.req.edge_key,
                            version = self.req.version.unwrap_or_default(),
                            "chain.resume.outdated_edge"
                        );
                        let code = self.core.discard().await;
                        if code.is_ok() {
                            ResultCode::OutdatedEdge
                        } else {
                            code
                        }
                    }
                    Err(code) => code,
                }
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
            let code = client.chain_update_edge(reversed.clone(), term, version).await;
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
        self.core
            .settle(code, double_primes, move |hook| async move {
                UpdateEdgeProcessor::new(env.kv.as_ref(), env.schema.as_ref())
                    .with_hook(hook)
                    .process(req)
                    .await
            })
            .await
    }

    fn finish(&mut self, code: ResultCode) -> ResultCode {
        self.core.finish(code)
    }
}

/// Mirror side of a chain update.
pub struct ChainUpdateEdgeRemoteProcessor {
    txn: Arc<TransactionManager>,
}

impl ChainUpdateEdgeRemoteProcessor {
    /// Creates the processor.
    pub fn new(txn: Arc<TransactionManager>) -> Self {
        Self { txn }
    }

    /// Applies a reversed update sent by the initiator at `term`.
    pub async fn process(
        &self,
        mut req: UpdateEdgeRequest,
        term: TermId,
        edge_version: Option<EdgeVersion>,
    ) -> ExecResponse {
        let mut resp = ExecResponse::default();
        let code = self.check(&req, term, edge_version).await;
        if !code.is_ok() {
            resp.push_result(req.part_id, code);
            return resp;
        }
        if edge_version.is_some() {
            req.version = edge_version;
        }
        let env = self.txn.env();
        let code = UpdateEdgeProcessor::new(env.kv.as_ref(), env.schema.as_ref())
            .process(&req)
            .await;
        resp.push_result(req.part_id, code);
        resp
    }

    async fn check(
        &self,
        req: &UpdateEdgeRequest,
        term: TermId,
        edge_version: Option<EdgeVersion>,
    ) -> ResultCode {
        let code = self
            .txn
            .fence_remote(req.space_id, [req.part_id], &req.edge_key.dst, term);
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
        let Some(raw) = keys::edge_key(vid_len, req.part_id, &req.edge_key) else {
            return ResultCode::InvalidVid;
        };
        match read_edge(env.kv.as_ref(), req.space_id, req.part_id, &raw).await {
            Ok(Some(row)) if row.version > version => ResultCode::OutdatedEdge,
            Ok(_) => ResultCode::Succeeded,
            Err(code) => code,
        }
    }
}
