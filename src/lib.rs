//! Transactional edge chains for a partitioned graph store.
//!
//! Every edge lives twice: once under its source partition and once, reversed,
//! under its destination partition. This crate keeps the two copies in step
//! without a distributed commit log. An initiator locks the edge in memory,
//! records a durable *prime* intent, mirrors the reversed mutation onto the
//! remote partition, and then commits locally. An RPC whose outcome is unknown
//! leaves a *double-prime* record and a dangling entry that the background
//! resumer replays until both copies agree.
//!
//! The storage engine, replication layer, schema catalog and peer RPC are
//! consumed through the traits in [`storage`] and [`cluster`]; in-memory
//! implementations of each are provided for tests and single-process setups.

#![warn(missing_docs)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod primitives;
pub mod service;
pub mod storage;
pub mod transaction;
pub mod types;

pub use config::{ChainConfig, ConfigError};
pub use error::{ChainError, Result};
pub use metrics::{ChainMetrics, CounterMetrics, NoopMetrics};
pub use service::ChainStorageService;
pub use transaction::{StorageEnv, TransactionManager};
pub use types::{ChainOpKind, EdgeKey, PropValue, ResultCode, ResumeType};
