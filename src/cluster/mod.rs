//! Collaborators owned by other subsystems: replication leadership, the meta
//! service's schema catalog, and the storage-to-storage RPC client.
//!
//! Each is consumed through a trait; the in-memory implementations back tests
//! and single-process deployments.

mod client;
mod leadership;
mod schema;

pub use client::{InternalClient, LoopbackClient};
pub use leadership::{Leadership, MemLeadership};
pub use schema::{ColumnDef, DefaultValue, EdgeSchema, SchemaManager, StaticSchema};
