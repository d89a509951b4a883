//! Counters for chain outcomes and resume passes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::ResultCode;

/// Trait for tracking chain operation outcomes.
///
/// Implementations collect statistics about the prepare/remote/commit
/// pipeline and the background resumer, for monitoring and tests.
pub trait ChainMetrics: Send + Sync {
    /// Records a chain task entering the pipeline.
    fn chain_started(&self);

    /// Records the final code of a chain task.
    ///
    /// # Parameters
    /// * `code` - The code reported to the caller.
    fn chain_finished(&self, code: ResultCode);

    /// Records a mirror RPC whose outcome could not be determined.
    fn rpc_failure(&self);

    /// Records a new entry in the dangling-edge table.
    fn dangling_registered(&self);

    /// Records one replay attempt of a dangling edge.
    ///
    /// # Parameters
    /// * `code` - The code of the replayed chain task.
    fn resume_attempted(&self, code: ResultCode);

    /// Records a dangling entry dropped without replay.
    fn resume_dropped(&self);
}

/// A no-op implementation of [`ChainMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl ChainMetrics for NoopMetrics {
    fn chain_started(&self) {}
    fn chain_finished(&self, _code: ResultCode) {}
    fn rpc_failure(&self) {}
    fn dangling_registered(&self) {}
    fn resume_attempted(&self, _code: ResultCode) {}
    fn resume_dropped(&self) {}
}

/// A thread-safe counter-based implementation of [`ChainMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Chain tasks entering the pipeline.
    pub chains_started: AtomicU64,

    /// Chain tasks finishing with `SUCCEEDED`.
    pub chains_succeeded: AtomicU64,

    /// Chain tasks rejected by the memory lock.
    pub write_conflicts: AtomicU64,

    /// Chain tasks fenced by a term change.
    pub outdated_terms: AtomicU64,

    /// Chain tasks finishing with any other error.
    pub chains_failed: AtomicU64,

    /// Mirror RPCs with undetermined outcome.
    pub rpc_failures: AtomicU64,

    /// Entries added to the dangling-edge table.
    pub dangling_registered: AtomicU64,

    /// Replays that converged.
    pub resumes_succeeded: AtomicU64,

    /// Replays that will be retried.
    pub resumes_failed: AtomicU64,

    /// Dangling entries dropped without replay.
    pub resumes_dropped: AtomicU64,
}

impl ChainMetrics for CounterMetrics {
    fn chain_started(&self) {
        self.chains_started.fetch_add(1, Ordering::Relaxed);
    }

    fn chain_finished(&self, code: ResultCode) {
        match code {
            ResultCode::Succeeded => {
                self.chains_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            ResultCode::WriteWriteConflict => {
                self.write_conflicts.fetch_add(1, Ordering::Relaxed);
            }
            ResultCode::OutdatedTerm => {
                self.outdated_terms.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.chains_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn rpc_failure(&self) {
        self.rpc_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn dangling_registered(&self) {
        self.dangling_registered.fetch_add(1, Ordering::Relaxed);
    }

    fn resume_attempted(&self, code: ResultCode) {
        if matches!(code, ResultCode::Succeeded | ResultCode::OutdatedEdge) {
            self.resumes_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.resumes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn resume_dropped(&self) {
        self.resumes_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation (no-op).
pub fn default_metrics() -> Arc<dyn ChainMetrics> {
    Arc::new(NoopMetrics)
}
