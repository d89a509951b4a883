//! Chain transactions: mutations mirrored onto the reverse partition of every
//! edge, with prime/double-prime intent records and a background resumer.
//!
//! A chain task runs `prepare_local`, `process_remote` and `process_local`
//! in order, then `finish`. [`TransactionManager`] schedules tasks, owns the
//! per-partition [`LockCore`]s and the dangling-edge table, and drives
//! [`ChainResumeProcessor`] to replay what a crash or a lost RPC left behind.

mod add_edges;
mod chain;
mod delete_edges;
mod env;
mod manager;
mod resume;
mod update_edge;

pub use add_edges::{
    ChainAddEdgesGroupProcessor, ChainAddEdgesLocalProcessor, ChainAddEdgesRemoteProcessor,
};
pub use chain::{run_chain, ChainMode, ChainProcessor, ChainState, ChainTask};
pub use delete_edges::{
    ChainDeleteEdgesGroupProcessor, ChainDeleteEdgesLocalProcessor,
    ChainDeleteEdgesRemoteProcessor,
};
pub use env::StorageEnv;
pub use manager::{LockCore, TransactionManager};
pub use resume::{ChainProcessorFactory, ChainResumeProcessor, ResumeSummary};
pub use update_edge::{ChainUpdateEdgeLocalProcessor, ChainUpdateEdgeRemoteProcessor};
