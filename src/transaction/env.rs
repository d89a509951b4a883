use std::sync::Arc;

use crate::cluster::{InternalClient, Leadership, SchemaManager};
use crate::storage::KvStore;

/// Handles to the collaborators a storage node's chain layer runs against.
#[derive(Clone)]
pub struct StorageEnv {
    /// Local key-value engine.
    pub kv: Arc<dyn KvStore>,
    /// Schema and topology catalog.
    pub schema: Arc<dyn SchemaManager>,
    /// Partition leadership and terms.
    pub leadership: Arc<dyn Leadership>,
    /// RPC client towards mirror partitions.
    pub client: Arc<dyn InternalClient>,
}

impl StorageEnv {
    /// Bundles the collaborators.
    pub fn new(
        kv: Arc<dyn KvStore>,
        schema: Arc<dyn SchemaManager>,
        leadership: Arc<dyn Leadership>,
        client: Arc<dyn InternalClient>,
    ) -> Self {
        Self {
            kv,
            schema,
            leadership,
            client,
        }
    }
}
