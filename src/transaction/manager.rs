use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ChainConfig;
use crate::error::{ChainError, Result};
use crate::metrics::ChainMetrics;
use crate::primitives::concurrency::MemoryLock;
use crate::storage::keys;
use crate::types::{PartitionId, ResultCode, ResumeType, SpaceId, TermId};

use super::chain::{run_chain, ChainTask};
use super::env::StorageEnv;
use super::resume::{ChainResumeProcessor, ResumeSummary};

/// Per-partition memory lock over physical edge keys.
pub type LockCore = MemoryLock<Vec<u8>>;

struct Resumer {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Process-wide owner of chain state on a storage node.
///
/// Schedules chain tasks on the runtime it was created in, and owns the
/// per-partition lock cores, the term cache, and the dangling-edge table the
/// background resumer drains.
pub struct TransactionManager {
    env: StorageEnv,
    config: ChainConfig,
    metrics: Arc<dyn ChainMetrics>,
    handle: Handle,
    lock_cores: DashMap<(SpaceId, PartitionId), Arc<LockCore>>,
    terms: DashMap<(SpaceId, PartitionId), TermId>,
    dangling: DashMap<(SpaceId, Vec<u8>), ResumeType>,
    resume_gate: tokio::sync::Mutex<()>,
    resumer: Mutex<Option<Resumer>>,
}

impl TransactionManager {
    /// Creates a manager bound to the current tokio runtime.
    pub fn new(
        env: StorageEnv,
        config: ChainConfig,
        metrics: Arc<dyn ChainMetrics>,
    ) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(|err| ChainError::InvalidArgument(err.to_string()))?;
        let handle = Handle::try_current().map_err(|_| {
            ChainError::InvalidArgument("transaction manager needs a tokio runtime".into())
        })?;
        Ok(Arc::new(Self {
            env,
            config,
            metrics,
            handle,
            lock_cores: DashMap::new(),
            terms: DashMap::new(),
            dangling: DashMap::new(),
            resume_gate: tokio::sync::Mutex::new(()),
            resumer: Mutex::new(None),
        }))
    }

    /// Collaborators of this node.
    pub fn env(&self) -> &StorageEnv {
        &self.env
    }

    /// Active configuration.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Metrics sink.
    pub fn metrics(&self) -> &Arc<dyn ChainMetrics> {
        &self.metrics
    }

    /// Spawns the three-phase pipeline of `task`. The handle resolves to the
    /// code `finish` produced.
    pub fn add_chain_task(&self, mut task: ChainTask) -> JoinHandle<ResultCode> {
        let metrics = Arc::clone(&self.metrics);
        self.handle.spawn(async move {
            metrics.chain_started();
            let code = run_chain(&mut task).await;
            metrics.chain_finished(code);
            code
        })
    }

    /// Lock core of a partition, created on first use.
    pub fn get_lock_core(&self, space: SpaceId, part: PartitionId) -> Arc<LockCore> {
        self.lock_cores
            .entry((space, part))
            .or_insert_with(|| Arc::new(LockCore::new()))
            .value()
            .clone()
    }

    /// Current term of a partition this node leads; refreshes the cache.
    pub fn get_term(&self, space: SpaceId, part: PartitionId) -> std::result::Result<TermId, ResultCode> {
        if !self.env.leadership.is_leader(space, part) {
            return Err(ResultCode::LeaderChanged);
        }
        let term = self.env.leadership.term(space, part)?;
        self.terms.insert((space, part), term);
        Ok(term)
    }

    /// Whether `term` is the partition's term, consulting the replication
    /// layer once when the cached value disagrees.
    pub fn check_term_from_cache(&self, space: SpaceId, part: PartitionId, term: TermId) -> bool {
        if self.terms.get(&(space, part)).is_some_and(|cached| *cached == term) {
            return true;
        }
        match self.env.leadership.term(space, part) {
            Ok(current) => {
                self.terms.insert((space, part), current);
                current == term
            }
            Err(_) => false,
        }
    }

    /// Fences a mirrored request: this node must lead every target partition
    /// and the initiator's term must be current. The initiator's partition is
    /// derived from `origin_vid`, the source vertex of the original edge.
    pub(crate) fn fence_remote(
        &self,
        space: SpaceId,
        target_parts: impl IntoIterator<Item = PartitionId>,
        origin_vid: &[u8],
        term: TermId,
    ) -> ResultCode {
        for part in target_parts {
            if !self.env.leadership.is_leader(space, part) {
                return ResultCode::LeaderChanged;
            }
        }
        let part_num = match self.env.schema.part_num(space) {
            Ok(n) => n,
            Err(code) => return code,
        };
        let origin = keys::part_of_vid(origin_vid, part_num);
        if !self.check_term_from_cache(space, origin, term) {
            warn!(space, part = origin, term, "chain.remote.outdated_term");
            return ResultCode::OutdatedTerm;
        }
        ResultCode::Succeeded
    }

    /// Leadership callback: caches the new term and recovers the partition's
    /// persisted intents.
    pub async fn on_leader_elected(&self, space: SpaceId, part: PartitionId, term: TermId) -> ResultCode {
        self.terms.insert((space, part), term);
        info!(space, part, term, "chain.leader_elected");
        if self.config.scan_on_leader_elected {
            self.scan_primes(space, part).await
        } else {
            ResultCode::Succeeded
        }
    }

    /// Leadership callback: forgets the term and hands the partition's
    /// dangling edges to the next leader.
    pub fn on_leader_lost(&self, space: SpaceId, part: PartitionId) {
        self.terms.remove(&(space, part));
        let lost: Vec<Vec<u8>> = self
            .dangling
            .iter()
            .filter(|entry| {
                entry.key().0 == space && keys::part_of_key(&entry.key().1).is_ok_and(|p| p == part)
            })
            .map(|entry| entry.key().1.clone())
            .collect();
        for raw in &lost {
            self.del_prime(space, raw);
        }
        info!(space, part, dropped = lost.len(), "chain.leader_lost");
    }

    /// Registers a dangling edge for the resumer.
    pub fn add_prime(&self, space: SpaceId, raw_key: Vec<u8>, resume: ResumeType) {
        debug!(space, key = %hex::encode(&raw_key), resume = %resume, "chain.dangling.add");
        let previous = self.dangling.insert((space, raw_key.clone()), resume);
        if previous == Some(ResumeType::ResumeRemote) && resume == ResumeType::ResumeChain {
            self.unlock_key(space, &raw_key);
        }
        self.metrics.dangling_registered();
    }

    /// Removes a dangling edge. A `RESUME_REMOTE` entry releases the memory
    /// lock it owned.
    pub fn del_prime(&self, space: SpaceId, raw_key: &[u8]) -> Option<ResumeType> {
        let removed = self
            .dangling
            .remove(&(space, raw_key.to_vec()))
            .map(|(_, resume)| resume);
        if removed == Some(ResumeType::ResumeRemote) {
            self.unlock_key(space, raw_key);
        }
        if removed.is_some() {
            debug!(space, key = %hex::encode(raw_key), "chain.dangling.del");
        }
        removed
    }

    fn unlock_key(&self, space: SpaceId, raw_key: &[u8]) {
        match keys::part_of_key(raw_key) {
            Ok(part) => {
                self.get_lock_core(space, part).unlock(&raw_key.to_vec());
            }
            Err(err) => warn!(space, error = %err, "chain.dangling.bad_key"),
        }
    }

    /// Resume type of a dangling edge, if registered.
    pub fn dangling_type(&self, space: SpaceId, raw_key: &[u8]) -> Option<ResumeType> {
        self.dangling.get(&(space, raw_key.to_vec())).map(|entry| *entry)
    }

    /// Number of dangling edges.
    pub fn dangling_len(&self) -> usize {
        self.dangling.len()
    }

    /// Snapshot of the dangling-edge table.
    pub fn dangling_edges(&self) -> Vec<(SpaceId, Vec<u8>, ResumeType)> {
        self.dangling
            .iter()
            .map(|entry| (entry.key().0, entry.key().1.clone(), *entry.value()))
            .collect()
    }

    /// Seeds the dangling table from the partition's prime and double-prime
    /// records. Double-prime edges are locked on behalf of their entry.
    pub async fn scan_primes(&self, space: SpaceId, part: PartitionId) -> ResultCode {
        let mut found = [0usize; 2];
        for (slot, resume) in [ResumeType::ResumeChain, ResumeType::ResumeRemote]
            .into_iter()
            .enumerate()
        {
            let prefix = keys::resume_table(part, resume);
            let records = match self.env.kv.prefix_scan(space, part, &prefix).await {
                Ok(records) => records,
                Err(code) => {
                    warn!(space, part, code = %code, resume = %resume, "chain.scan.failed");
                    return code;
                }
            };
            for (key, _) in records {
                let raw = match keys::strip_table_prefix(&key) {
                    Ok(raw) => raw.to_vec(),
                    Err(err) => {
                        warn!(space, part, key = %hex::encode(&key), error = %err, "chain.scan.bad_key");
                        continue;
                    }
                };
                if resume == ResumeType::ResumeRemote
                    && !self.get_lock_core(space, part).try_lock(raw.clone())
                {
                    debug!(space, part, key = %hex::encode(&raw), "chain.scan.already_locked");
                }
                self.add_prime(space, raw, resume);
                found[slot] += 1;
            }
        }
        info!(space, part, primes = found[0], double_primes = found[1], "chain.scan.done");
        ResultCode::Succeeded
    }

    /// Refreshes the term cache and scans every partition this node leads.
    pub async fn scan_all(&self) -> ResultCode {
        let mut result = ResultCode::Succeeded;
        for (space, part, term) in self.env.leadership.leader_parts() {
            self.terms.insert((space, part), term);
            let code = self.scan_primes(space, part).await;
            if !code.is_ok() {
                result = code;
            }
        }
        result
    }

    /// Recovers persisted intents and, when enabled, starts the resume loop.
    pub async fn start(self: &Arc<Self>) -> ResultCode {
        let code = self.scan_all().await;
        if self.config.enable_resume {
            self.spawn_resumer();
        }
        info!(dangling = self.dangling.len(), code = %code, "chain.manager.started");
        code
    }

    fn spawn_resumer(self: &Arc<Self>) {
        let mut slot = self.resumer.lock();
        if slot.is_some() {
            return;
        }
        let (stop, mut stopped) = watch::channel(false);
        let weak = Arc::downgrade(self);
        let period = self.config.resume_interval();
        let task = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(txn) = weak.upgrade() else {
                            break;
                        };
                        ChainResumeProcessor::new(txn).process().await;
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("chain.resume.loop_stopped");
        });
        *slot = Some(Resumer { stop, task });
    }

    /// Stops the resume loop and waits for the pass in flight.
    pub async fn stop(&self) {
        let resumer = self.resumer.lock().take();
        if let Some(Resumer { stop, task }) = resumer {
            let _ = stop.send(true);
            if let Err(err) = task.await {
                warn!(error = %err, "chain.resume.join_failed");
            }
        }
    }

    /// Runs one resume pass now.
    pub async fn resume_now(self: &Arc<Self>) -> ResumeSummary {
        ChainResumeProcessor::new(Arc::clone(self)).process().await
    }

    pub(crate) fn resume_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.resume_gate
    }
}
