//! The three-phase chain protocol shared by every mirrored edge mutation.
//!
//! ```text
//! prepare_local ──► process_remote ──► process_local ──► finish
//!   lock + prime      reversed RPC       commit / demote / abort
//! ```
//!
//! Phases exchange [`ResultCode`]s; a failed phase is passed down the
//! pipeline untouched and `finish` always runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::primitives::concurrency::MemoryLockGuard;
use crate::storage::keys;
use crate::storage::{BatchHolder, BatchHook};
use crate::types::{ChainOpKind, PartitionId, ResultCode, ResumeType, SpaceId, TermId};

use super::add_edges::ChainAddEdgesLocalProcessor;
use super::delete_edges::ChainDeleteEdgesLocalProcessor;
use super::env::StorageEnv;
use super::manager::TransactionManager;
use super::update_edge::ChainUpdateEdgeLocalProcessor;

/// Progress of one chain operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChainState {
    /// Nothing acquired or written yet.
    Initial,
    /// Locks held and intents durable.
    Prepared,
    /// The mirror call resolved, whatever its outcome.
    RemoteDone,
    /// The local side settled.
    LocalDone,
    /// Intents erased and locks released without committing.
    Aborted,
}

/// How a local processor was created.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChainMode {
    /// Serving a client request.
    Normal,
    /// Replaying a persisted intent of the given kind.
    Resume(ResumeType),
}

/// Asynchronous phase contract of a chain operation.
#[async_trait]
pub trait ChainProcessor: Send {
    /// Takes the memory locks and writes the prime records.
    async fn prepare_local(&mut self) -> ResultCode;

    /// Mirrors the reversed mutation on the remote partition. Passes a failed
    /// prepare through without calling out.
    async fn process_remote(&mut self, code: ResultCode) -> ResultCode;

    /// Commits, demotes to a double-prime, or aborts depending on `code`.
    async fn process_local(&mut self, code: ResultCode) -> ResultCode;

    /// Terminal hook; runs exactly once and yields the caller-visible code.
    fn finish(&mut self, code: ResultCode) -> ResultCode;
}

/// Runs the phases of `proc` in order.
pub async fn run_chain<P: ChainProcessor + ?Sized>(proc: &mut P) -> ResultCode {
    let code = proc.prepare_local().await;
    let code = proc.process_remote(code).await;
    let code = proc.process_local(code).await;
    proc.finish(code)
}

/// A schedulable chain operation, tagged by mutation kind.
pub enum ChainTask {
    /// Insert edges.
    AddEdges(ChainAddEdgesLocalProcessor),
    /// Update one edge.
    UpdateEdge(ChainUpdateEdgeLocalProcessor),
    /// Delete edges.
    DeleteEdges(ChainDeleteEdgesLocalProcessor),
}

impl ChainTask {
    /// Mutation kind of the task.
    pub fn kind(&self) -> ChainOpKind {
        match self {
            ChainTask::AddEdges(_) => ChainOpKind::Insert,
            ChainTask::UpdateEdge(_) => ChainOpKind::Update,
            ChainTask::DeleteEdges(_) => ChainOpKind::Delete,
        }
    }
}

impl From<ChainAddEdgesLocalProcessor> for ChainTask {
    fn from(proc: ChainAddEdgesLocalProcessor) -> Self {
        ChainTask::AddEdges(proc)
    }
}

impl From<ChainUpdateEdgeLocalProcessor> for ChainTask {
    fn from(proc: ChainUpdateEdgeLocalProcessor) -> Self {
        ChainTask::UpdateEdge(proc)
    }
}

impl From<ChainDeleteEdgesLocalProcessor> for ChainTask {
    fn from(proc: ChainDeleteEdgesLocalProcessor) -> Self {
        ChainTask::DeleteEdges(proc)
    }
}

#[async_trait]
impl ChainProcessor for ChainTask {
    async fn prepare_local(&mut self) -> ResultCode {
        match self {
            ChainTask::AddEdges(p) => p.prepare_local().await,
            ChainTask::UpdateEdge(p) => p.prepare_local().await,
            ChainTask::DeleteEdges(p) => p.prepare_local().await,
        }
    }

    async fn process_remote(&mut self, code: ResultCode) -> ResultCode {
        match self {
            ChainTask::AddEdges(p) => p.process_remote(code).await,
            ChainTask::UpdateEdge(p) => p.process_remote(code).await,
            ChainTask::DeleteEdges(p) => p.process_remote(code).await,
        }
    }

    async fn process_local(&mut self, code: ResultCode) -> ResultCode {
        match self {
            ChainTask::AddEdges(p) => p.process_local(code).await,
            ChainTask::UpdateEdge(p) => p.process_local(code).await,
            ChainTask::DeleteEdges(p) => p.process_local(code).await,
        }
    }

    fn finish(&mut self, code: ResultCode) -> ResultCode {
        match self {
            ChainTask::AddEdges(p) => p.finish(code),
            ChainTask::UpdateEdge(p) => p.finish(code),
            ChainTask::DeleteEdges(p) => p.finish(code),
        }
    }
}

/// Codes after which a replay should simply be attempted again later.
pub(crate) fn is_transient(code: ResultCode) -> bool {
    matches!(
        code,
        ResultCode::RpcFailure
            | ResultCode::LeaderChanged
            | ResultCode::OutdatedTerm
            | ResultCode::StorageError
            | ResultCode::WriteWriteConflict
    )
}

/// Bounded retry on `LeaderChanged` answers from the mirror.
pub(crate) struct Retry {
    left: u32,
    backoff: Duration,
}

impl Retry {
    /// Whether to call again after `code`; sleeps the backoff when so.
    pub(crate) async fn again(&mut self, code: ResultCode) -> bool {
        if code != ResultCode::LeaderChanged || self.left == 0 {
            return false;
        }
        self.left -= 1;
        if !self.backoff.is_zero() {
            tokio::time::sleep(self.backoff).await;
        }
        true
    }
}

/// State and bookkeeping common to every local chain processor.
pub(crate) struct ChainCore {
    pub(crate) txn: Arc<TransactionManager>,
    pub(crate) op: ChainOpKind,
    pub(crate) space: SpaceId,
    pub(crate) local_part: PartitionId,
    pub(crate) remote_part: PartitionId,
    pub(crate) mode: ChainMode,
    pub(crate) state: ChainState,
    pub(crate) term: TermId,
    pub(crate) keys: Vec<Vec<u8>>,
    guard: Option<MemoryLockGuard<Vec<u8>>>,
}

impl ChainCore {
    pub(crate) fn new(
        txn: Arc<TransactionManager>,
        op: ChainOpKind,
        space: SpaceId,
        local_part: PartitionId,
        mode: ChainMode,
    ) -> Self {
        Self {
            txn,
            op,
            space,
            local_part,
            remote_part: 0,
            mode,
            state: ChainState::Initial,
            term: 0,
            keys: Vec::new(),
            guard: None,
        }
    }

    pub(crate) fn env(&self) -> StorageEnv {
        self.txn.env().clone()
    }

    pub(crate) fn is_resume(&self) -> bool {
        matches!(self.mode, ChainMode::Resume(_))
    }

    fn first_key_hex(&self) -> String {
        self.keys.first().map(hex::encode).unwrap_or_default()
    }

    pub(crate) fn trace(&self, phase: &'static str, code: ResultCode) {
        if self.txn.config().trace_chain {
            debug!(
                space = self.space,
                part = self.local_part,
                op = %self.op,
                mode = ?self.mode,
                phase,
                code = %code,
                "chain.phase"
            );
        }
    }

    /// Records the physical edge keys the operation covers, first occurrence wins.
    pub(crate) fn set_keys(&mut self, keys: Vec<Vec<u8>>) {
        let mut seen = std::collections::HashSet::with_capacity(keys.len());
        self.keys = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();
    }

    pub(crate) fn prime_keys(&self) -> Vec<Vec<u8>> {
        self.keys
            .iter()
            .map(|k| keys::prime_key_for(self.local_part, k))
            .collect()
    }

    pub(crate) fn double_prime_keys(&self) -> Vec<Vec<u8>> {
        self.keys
            .iter()
            .map(|k| keys::double_prime_key_for(self.local_part, k))
            .collect()
    }

    /// Captures the partition term the operation is fenced by.
    pub(crate) fn fetch_term(&mut self) -> ResultCode {
        match self.txn.get_term(self.space, self.local_part) {
            Ok(term) => {
                self.term = term;
                ResultCode::Succeeded
            }
            Err(code) => code,
        }
    }

    fn term_unchanged(&self) -> bool {
        self.txn.get_term(self.space, self.local_part) == Ok(self.term)
    }

    /// Locks every key of the operation, all or nothing.
    pub(crate) fn lock(&mut self) -> ResultCode {
        let core = self.txn.get_lock_core(self.space, self.local_part);
        let guard = MemoryLockGuard::new(core, self.keys.iter().cloned(), true, true);
        if !guard.is_locked() {
            debug!(
                space = self.space,
                part = self.local_part,
                key = %guard.conflict_key().map(hex::encode).unwrap_or_default(),
                "chain.prepare.conflict"
            );
            return ResultCode::WriteWriteConflict;
        }
        self.guard = Some(guard);
        ResultCode::Succeeded
    }

    /// Writes the prime records; the operation is prepared once they are durable.
    pub(crate) async fn write_primes(&mut self, primes: Vec<(Vec<u8>, Vec<u8>)>) -> ResultCode {
        let code = self
            .txn
            .env()
            .kv
            .multi_put(self.space, self.local_part, primes)
            .await;
        if code.is_ok() {
            self.state = ChainState::Prepared;
        } else {
            warn!(space = self.space, part = self.local_part, code = %code, "chain.prepare.prime_failed");
            self.release();
        }
        self.trace("prepare", code);
        code
    }

    /// Marks a replay prepared; its intents are already on disk.
    pub(crate) fn resume_prepared(&mut self) -> ResultCode {
        self.state = ChainState::Prepared;
        self.trace("prepare", ResultCode::Succeeded);
        ResultCode::Succeeded
    }

    pub(crate) fn ready_for_remote(&self, code: ResultCode) -> bool {
        code.is_ok() && self.state == ChainState::Prepared
    }

    pub(crate) fn retry(&self) -> Retry {
        let config = self.txn.config();
        Retry {
            left: config.rpc_max_retry,
            backoff: config.rpc_retry_backoff(),
        }
    }

    pub(crate) fn remote_done(&mut self, code: ResultCode) -> ResultCode {
        self.state = ChainState::RemoteDone;
        if code == ResultCode::RpcFailure {
            self.txn.metrics().rpc_failure();
            warn!(
                space = self.space,
                part = self.local_part,
                remote_part = self.remote_part,
                key = %self.first_key_hex(),
                "chain.remote.rpc_failure"
            );
        }
        self.trace("remote", code);
        code
    }

    /// Applies the outcome policy once the mirror call resolved.
    ///
    /// `commit` performs the delegate mutation with the given hook spliced
    /// into its batch.
    pub(crate) async fn settle<F, Fut>(
        &mut self,
        remote: ResultCode,
        double_primes: Vec<(Vec<u8>, Vec<u8>)>,
        commit: F,
    ) -> ResultCode
    where
        F: FnOnce(BatchHook) -> Fut + Send,
        Fut: Future<Output = ResultCode> + Send,
    {
        if self.state != ChainState::RemoteDone {
            return remote;
        }
        if !self.term_unchanged() {
            warn!(
                space = self.space,
                part = self.local_part,
                term = self.term,
                key = %self.first_key_hex(),
                "chain.local.outdated_term"
            );
            self.release();
            self.state = ChainState::Aborted;
            return ResultCode::OutdatedTerm;
        }
        let code = if self.mode == ChainMode::Resume(ResumeType::ResumeRemote) {
            self.settle_replayed_remote(remote).await
        } else {
            self.settle_chain(remote, double_primes, commit).await
        };
        self.trace("local", code);
        code
    }

    async fn settle_chain<F, Fut>(
        &mut self,
        remote: ResultCode,
        double_primes: Vec<(Vec<u8>, Vec<u8>)>,
        commit: F,
    ) -> ResultCode
    where
        F: FnOnce(BatchHook) -> Fut + Send,
        Fut: Future<Output = ResultCode> + Send,
    {
        match remote {
            ResultCode::Succeeded => {
                let primes = self.prime_keys();
                let code = commit(Box::new(move |batch: &mut BatchHolder| {
                    for key in primes {
                        batch.remove(key);
                    }
                }))
                .await;
                self.state = ChainState::LocalDone;
                if code.is_ok() {
                    self.resolve_dangling();
                    return ResultCode::Succeeded;
                }
                error!(
                    space = self.space,
                    part = self.local_part,
                    code = %code,
                    key = %self.first_key_hex(),
                    "chain.local.commit_failed"
                );
                self.register(ResumeType::ResumeChain);
                code
            }
            ResultCode::RpcFailure => {
                let primes = self.prime_keys();
                let code = commit(Box::new(move |batch: &mut BatchHolder| {
                    for key in primes {
                        batch.remove(key);
                    }
                    for (key, value) in double_primes {
                        batch.put(key, value);
                    }
                }))
                .await;
                self.state = ChainState::LocalDone;
                if code.is_ok() {
                    self.hand_off_remote();
                    return match self.mode {
                        ChainMode::Normal => ResultCode::Succeeded,
                        ChainMode::Resume(_) => ResultCode::RpcFailure,
                    };
                }
                error!(
                    space = self.space,
                    part = self.local_part,
                    code = %code,
                    key = %self.first_key_hex(),
                    "chain.local.demote_failed"
                );
                self.register(ResumeType::ResumeChain);
                code
            }
            code if self.is_resume() && is_transient(code) => {
                self.release();
                code
            }
            code => {
                self.abort().await;
                code
            }
        }
    }

    /// The local side committed earlier; only the mirror's answer matters.
    async fn settle_replayed_remote(&mut self, remote: ResultCode) -> ResultCode {
        if is_transient(remote) {
            return remote;
        }
        if !remote.is_ok() && remote != ResultCode::OutdatedEdge {
            warn!(
                space = self.space,
                part = self.local_part,
                code = %remote,
                key = %self.first_key_hex(),
                "chain.resume.remote_rejected"
            );
        }
        let erased = self
            .txn
            .env()
            .kv
            .multi_remove(self.space, self.local_part, self.double_prime_keys())
            .await;
        if !erased.is_ok() {
            return erased;
        }
        self.resolve_dangling();
        self.state = ChainState::LocalDone;
        remote
    }

    async fn abort(&mut self) {
        let code = self
            .txn
            .env()
            .kv
            .multi_remove(self.space, self.local_part, self.prime_keys())
            .await;
        if !code.is_ok() {
            warn!(space = self.space, part = self.local_part, code = %code, "chain.abort.erase_failed");
        }
        if self.is_resume() {
            self.resolve_dangling();
        }
        self.release();
        self.state = ChainState::Aborted;
    }

    /// Drops a stale replay: erases its intent record and its dangling entry.
    pub(crate) async fn discard(&mut self) -> ResultCode {
        let keys = match self.mode {
            ChainMode::Resume(ResumeType::ResumeRemote) => self.double_prime_keys(),
            _ => self.prime_keys(),
        };
        let code = self
            .txn
            .env()
            .kv
            .multi_remove(self.space, self.local_part, keys)
            .await;
        if code.is_ok() {
            self.resolve_dangling();
        }
        self.release();
        self.state = ChainState::Aborted;
        code
    }

    fn register(&self, resume: ResumeType) {
        for key in &self.keys {
            self.txn.add_prime(self.space, key.clone(), resume);
        }
    }

    /// Hands the locks over to `RESUME_REMOTE` dangling entries.
    fn hand_off_remote(&mut self) {
        self.register(ResumeType::ResumeRemote);
        if let Some(mut guard) = self.guard.take() {
            guard.set_auto_unlock(false);
        }
    }

    fn resolve_dangling(&self) {
        if self.is_resume() {
            for key in &self.keys {
                self.txn.del_prime(self.space, key);
            }
        }
    }

    pub(crate) fn release(&mut self) {
        drop(self.guard.take());
    }

    pub(crate) fn finish(&mut self, code: ResultCode) -> ResultCode {
        self.release();
        self.trace("finish", code);
        code
    }
}
