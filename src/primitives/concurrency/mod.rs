#![forbid(unsafe_code)]
//! In-process mutual exclusion on edge keys.
//!
//! A [`MemoryLock`] is a concurrent set of "locked" keys. Acquisition never
//! waits: a chain operation that finds its key taken fails fast with a
//! write-write conflict. Single-key operations are atomic; batch operations
//! acquire keys in order and roll back on the first conflict, so two batches
//! sharing keys may both briefly hold a prefix before one of them backs off.
//! Only the end state (no key has two holders) is guaranteed.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashSet;
use smallvec::SmallVec;

/// Concurrent registry of locked keys.
pub struct MemoryLock<K: Eq + Hash> {
    keys: DashSet<K>,
}

impl<K: Eq + Hash> Default for MemoryLock<K> {
    fn default() -> Self {
        Self {
            keys: DashSet::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> MemoryLock<K> {
    /// Creates an empty lock registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks `key` if nobody holds it. Returns true iff the lock was acquired.
    pub fn try_lock(&self, key: K) -> bool {
        self.keys.insert(key)
    }

    /// Locks every key or none.
    ///
    /// Keys are attempted in slice order. On the first conflict every key this
    /// call already acquired is released and the conflicting key is returned.
    pub fn lock_batch<'a>(&self, keys: &'a [K]) -> Result<(), &'a K> {
        for (idx, key) in keys.iter().enumerate() {
            if !self.keys.insert(key.clone()) {
                self.unlock_batch(&keys[..idx]);
                return Err(key);
            }
        }
        Ok(())
    }

    /// Releases `key`. Returns whether it was held. Unlocking a free key is a no-op.
    pub fn unlock(&self, key: &K) -> bool {
        self.keys.remove(key).is_some()
    }

    /// Releases every key in `keys`.
    pub fn unlock_batch(&self, keys: &[K]) {
        for key in keys {
            self.keys.remove(key);
        }
    }

    /// Returns true while `key` is held.
    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    /// Number of keys currently held.
    pub fn size(&self) -> usize {
        self.keys.len()
    }

    /// Snapshot of the held keys, in no particular order.
    pub fn held_keys(&self) -> Vec<K> {
        self.keys.iter().map(|k| k.key().clone()).collect()
    }
}

impl<K: Eq + Hash> fmt::Debug for MemoryLock<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLock")
            .field("held", &self.keys.len())
            .finish()
    }
}

/// Scoped ownership of one or more keys in a shared [`MemoryLock`].
///
/// Acquires on construction and releases on drop while armed. Disarming with
/// [`MemoryLockGuard::set_auto_unlock`]`(false)` keeps the keys locked after the
/// guard is gone; whoever takes over (the dangling-edge table) must unlock them.
pub struct MemoryLockGuard<K: Eq + Hash + Clone> {
    lock: Arc<MemoryLock<K>>,
    keys: SmallVec<[K; 4]>,
    conflict: Option<K>,
    locked: bool,
    auto_unlock: bool,
}

impl<K: Eq + Hash + Clone> MemoryLockGuard<K> {
    /// Tries to lock all `keys` as one batch.
    ///
    /// With `dedup` set, repeated keys are collapsed (first occurrence wins)
    /// so a batch cannot conflict with itself.
    pub fn new(
        lock: Arc<MemoryLock<K>>,
        keys: impl IntoIterator<Item = K>,
        dedup: bool,
        auto_unlock: bool,
    ) -> Self {
        let mut keys: SmallVec<[K; 4]> = keys.into_iter().collect();
        if dedup {
            let mut seen = HashSet::with_capacity(keys.len());
            keys.retain(|k| seen.insert(k.clone()));
        }
        let (locked, conflict) = match lock.lock_batch(&keys) {
            Ok(()) => (true, None),
            Err(conflict) => (false, Some(conflict.clone())),
        };
        Self {
            lock,
            keys,
            conflict,
            locked,
            auto_unlock,
        }
    }

    /// Tries to lock a single key, releasing it on drop.
    pub fn single(lock: Arc<MemoryLock<K>>, key: K) -> Self {
        let locked = lock.try_lock(key.clone());
        let conflict = if locked { None } else { Some(key.clone()) };
        let mut keys = SmallVec::new();
        keys.push(key);
        Self {
            lock,
            keys,
            conflict,
            locked,
            auto_unlock: true,
        }
    }

    /// Whether the guard holds its keys.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// The key that prevented acquisition, if any.
    pub fn conflict_key(&self) -> Option<&K> {
        self.conflict.as_ref()
    }

    /// Keys covered by this guard.
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    /// Arms or disarms release-on-drop.
    pub fn set_auto_unlock(&mut self, auto_unlock: bool) {
        self.auto_unlock = auto_unlock;
    }

    /// Releases the keys now, regardless of the auto-unlock setting.
    pub fn force_unlock(&mut self) {
        if self.locked {
            self.lock.unlock_batch(&self.keys);
            self.locked = false;
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for MemoryLockGuard<K> {
    fn drop(&mut self) {
        if self.locked && self.auto_unlock {
            self.lock.unlock_batch(&self.keys);
        }
    }
}

impl<K: Eq + Hash + Clone> fmt::Debug for MemoryLockGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLockGuard")
            .field("keys", &self.keys.len())
            .field("locked", &self.locked)
            .field("auto_unlock", &self.auto_unlock)
            .finish()
    }
}
