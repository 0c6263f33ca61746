//! Reference-counted read/write locks keyed by session id.
//!
//! Stores use a [`KeyLockTable`] to order file operations on the same id
//! without a store-wide lock. Entries are created on first use and dropped
//! when the last holder releases, so ids that are no longer used do not
//! accumulate.
//!
//! Locks are released by dropping the returned guard.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

#[derive(Debug)]
struct LockEntry {
    lock: Arc<RwLock<()>>,
    usage: usize,
}

/// Lazily populated table of per-key readers-writer locks.
#[derive(Debug, Default)]
pub struct KeyLockTable {
    entries: DashMap<String, LockEntry>,
}

impl KeyLockTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until a shared lock on `key` is held.
    pub fn read(&self, key: &str) -> KeyReadGuard<'_> {
        let lock = self.register(key);
        KeyReadGuard {
            table: self,
            key: key.to_string(),
            guard: Some(lock.read_arc()),
        }
    }

    /// Block until the exclusive lock on `key` is held.
    pub fn write(&self, key: &str) -> KeyWriteGuard<'_> {
        let lock = self.register(key);
        KeyWriteGuard {
            table: self,
            key: key.to_string(),
            guard: Some(lock.write_arc()),
        }
    }

    /// Number of keys with at least one holder or waiter.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key is locked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get-or-create the entry and bump its usage under the shard lock.
    fn register(&self, key: &str) -> Arc<RwLock<()>> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| LockEntry {
                lock: Arc::new(RwLock::new(())),
                usage: 0,
            });
        entry.usage += 1;
        Arc::clone(&entry.lock)
    }

    /// Drop one usage and remove the entry when it reaches zero, in one
    /// step under the shard lock.
    fn release(&self, key: &str) {
        if let Entry::Occupied(mut occupied) = self.entries.entry(key.to_string()) {
            let entry = occupied.get_mut();
            entry.usage -= 1;
            if entry.usage == 0 {
                occupied.remove();
            }
        }
    }
}

/// Shared hold on one key. Releases on drop.
#[must_use = "the lock is released when the guard is dropped"]
pub struct KeyReadGuard<'a> {
    table: &'a KeyLockTable,
    key: String,
    guard: Option<ArcRwLockReadGuard<RawRwLock, ()>>,
}

impl Drop for KeyReadGuard<'_> {
    fn drop(&mut self) {
        // Unlock before giving up the usage count so the entry cannot be
        // replaced while still held.
        drop(self.guard.take());
        self.table.release(&self.key);
    }
}

/// Exclusive hold on one key. Releases on drop.
#[must_use = "the lock is released when the guard is dropped"]
pub struct KeyWriteGuard<'a> {
    table: &'a KeyLockTable,
    key: String,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, ()>>,
}

impl Drop for KeyWriteGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table.release(&self.key);
    }
}
