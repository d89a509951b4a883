//! Key-value engine contract consumed by the chain layer, plus an in-memory engine.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::types::{PartitionId, ResultCode, SpaceId};

/// One mutation inside a [`BatchHolder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite.
    Put(Vec<u8>, Vec<u8>),
    /// Delete; deleting a missing key is not an error.
    Remove(Vec<u8>),
}

/// Ordered list of puts and removes applied as one atomic write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchHolder {
    ops: Vec<BatchOp>,
}

impl BatchHolder {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    /// Queues a remove.
    pub fn remove(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Remove(key));
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued operations in application order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consumes the batch.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Ordered key-value engine, partitioned by `(space, partition)`.
///
/// Every mutation is asynchronous and reports a [`ResultCode`]; a batch is
/// applied entirely or not at all.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads one key. Missing keys yield `Err(ResultCode::KeyNotFound)`.
    async fn get(&self, space: SpaceId, part: PartitionId, key: &[u8])
        -> Result<Vec<u8>, ResultCode>;

    /// Applies `batch` atomically.
    async fn commit_batch(&self, space: SpaceId, part: PartitionId, batch: BatchHolder)
        -> ResultCode;

    /// Returns every pair whose key starts with `prefix`, in key order.
    async fn prefix_scan(
        &self,
        space: SpaceId,
        part: PartitionId,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ResultCode>;

    /// Writes all pairs in one batch.
    async fn multi_put(
        &self,
        space: SpaceId,
        part: PartitionId,
        kvs: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> ResultCode {
        let mut batch = BatchHolder::new();
        for (key, value) in kvs {
            batch.put(key, value);
        }
        self.commit_batch(space, part, batch).await
    }

    /// Removes all keys in one batch.
    async fn multi_remove(&self, space: SpaceId, part: PartitionId, keys: Vec<Vec<u8>>)
        -> ResultCode {
        let mut batch = BatchHolder::new();
        for key in keys {
            batch.remove(key);
        }
        self.commit_batch(space, part, batch).await
    }
}

#[derive(Clone, Copy, Debug)]
struct Fault {
    skip: usize,
    times: usize,
    code: ResultCode,
}

impl Fault {
    fn fire(&mut self) -> Option<ResultCode> {
        if self.skip > 0 {
            self.skip -= 1;
            return None;
        }
        if self.times == 0 {
            return None;
        }
        self.times -= 1;
        Some(self.code)
    }
}

type PartKey = (SpaceId, PartitionId);

/// In-memory [`KvStore`] with per-partition fault injection.
#[derive(Default)]
pub struct MemKvStore {
    parts: RwLock<HashMap<PartKey, BTreeMap<Vec<u8>, Vec<u8>>>>,
    write_faults: Mutex<HashMap<PartKey, Fault>>,
    read_faults: Mutex<HashMap<PartKey, Fault>>,
}

impl MemKvStore {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails `times` writes to the partition with `code`, after letting `skip` through.
    pub fn inject_write_fault(
        &self,
        space: SpaceId,
        part: PartitionId,
        skip: usize,
        times: usize,
        code: ResultCode,
    ) {
        self.write_faults
            .lock()
            .insert((space, part), Fault { skip, times, code });
    }

    /// Fails the next `times` reads of the partition with `code`.
    pub fn inject_read_fault(&self, space: SpaceId, part: PartitionId, times: usize, code: ResultCode) {
        self.read_faults.lock().insert(
            (space, part),
            Fault {
                skip: 0,
                times,
                code,
            },
        );
    }

    /// Clears every pending fault.
    pub fn clear_faults(&self) {
        self.write_faults.lock().clear();
        self.read_faults.lock().clear();
    }

    /// Synchronous point read, bypassing faults.
    pub fn peek(&self, space: SpaceId, part: PartitionId, key: &[u8]) -> Option<Vec<u8>> {
        self.parts
            .read()
            .get(&(space, part))
            .and_then(|kvs| kvs.get(key).cloned())
    }

    /// Number of keys in the partition starting with `prefix`, bypassing faults.
    pub fn count_prefix(&self, space: SpaceId, part: PartitionId, prefix: &[u8]) -> usize {
        self.parts.read().get(&(space, part)).map_or(0, |kvs| {
            kvs.range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .count()
        })
    }

    fn check_fault(faults: &Mutex<HashMap<PartKey, Fault>>, key: PartKey) -> Option<ResultCode> {
        let mut faults = faults.lock();
        let fault = faults.get_mut(&key)?;
        let fired = fault.fire();
        if fault.times == 0 {
            faults.remove(&key);
        }
        fired
    }
}

#[async_trait]
impl KvStore for MemKvStore {
    async fn get(
        &self,
        space: SpaceId,
        part: PartitionId,
        key: &[u8],
    ) -> Result<Vec<u8>, ResultCode> {
        if let Some(code) = Self::check_fault(&self.read_faults, (space, part)) {
            return Err(code);
        }
        self.peek(space, part, key).ok_or(ResultCode::KeyNotFound)
    }

    async fn commit_batch(
        &self,
        space: SpaceId,
        part: PartitionId,
        batch: BatchHolder,
    ) -> ResultCode {
        if let Some(code) = Self::check_fault(&self.write_faults, (space, part)) {
            return code;
        }
        let mut parts = self.parts.write();
        let kvs = parts.entry((space, part)).or_default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    kvs.insert(key, value);
                }
                BatchOp::Remove(key) => {
                    kvs.remove(&key);
                }
            }
        }
        ResultCode::Succeeded
    }

    async fn prefix_scan(
        &self,
        space: SpaceId,
        part: PartitionId,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ResultCode> {
        if let Some(code) = Self::check_fault(&self.read_faults, (space, part)) {
            return Err(code);
        }
        let parts = self.parts.read();
        Ok(parts.get(&(space, part)).map_or_else(Vec::new, |kvs| {
            kvs.range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }))
    }
}
