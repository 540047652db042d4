//! Per-tag async locks
//!
//! Serializes the read-then-write toggle for one tag while leaving other
//! tags independent. Entries are dropped from the table as soon as no task
//! holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::TagCode;

/// Table of async mutexes keyed by tag code
#[derive(Default)]
pub struct TagLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TagLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `tag`
    pub async fn lock(&self, tag: &TagCode) -> TagGuard<'_> {
        let mutex = self
            .table()
            .entry(tag.as_str().to_string())
            .or_default()
            .clone();

        let guard = mutex.lock_owned().await;

        TagGuard {
            owner: self,
            key: tag.as_str().to_string(),
            guard: Some(guard),
        }
    }

    /// Number of tags currently locked or contended
    pub fn active(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive access to one tag, released on drop
pub struct TagGuard<'a> {
    owner: &'a TagLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TagGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut table = self.owner.table();
        // Only the table itself still references the mutex: nobody is waiting.
        if table
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            table.remove(&self.key);
        }
    }
}
