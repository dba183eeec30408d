//! In-process mutual exclusion per schema.
//!
//! Serializes provisioning and teardown of one schema among the tasks of
//! this process before they contend for the database advisory lock. Entries
//! are removed once no task holds or awaits them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::naming::SchemaName;

type LockMap = HashMap<SchemaName, Arc<AsyncMutex<()>>>;

/// A set of per-schema async locks.
#[derive(Debug, Clone, Default)]
pub struct SchemaLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl SchemaLocks {
    /// Create an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `schema`.
    pub async fn acquire(&self, schema: &SchemaName) -> SchemaLockGuard {
        let lock = {
            let mut map = self.inner.lock();
            map.entry(schema.clone()).or_default().clone()
        };

        let guard = lock.lock_owned().await;
        SchemaLockGuard {
            guard: Some(guard),
            schema: schema.clone(),
            locks: self.inner.clone(),
        }
    }

    /// Whether a task holds or awaits the lock for `schema`.
    pub fn is_locked(&self, schema: &SchemaName) -> bool {
        self.inner.lock().contains_key(schema)
    }

    /// Wait until no task of this process holds the lock for `schema`.
    pub async fn wait_unlocked(&self, schema: &SchemaName) {
        if self.is_locked(schema) {
            drop(self.acquire(schema).await);
        }
    }

    /// Number of schemas currently held or awaited.
    pub fn active(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Exclusive access to one schema; released on drop.
pub struct SchemaLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    schema: SchemaName,
    locks: Arc<Mutex<LockMap>>,
}

impl SchemaLockGuard {
    /// The locked schema.
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }
}

impl Drop for SchemaLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut map = self.locks.lock();
        if let Some(lock) = map.get(&self.schema) {
            // only the map still references it
            if Arc::strong_count(lock) == 1 {
                map.remove(&self.schema);
            }
        }
    }
}
