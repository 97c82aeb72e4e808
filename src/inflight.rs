//! Concurrency guards.
//!
//! [`InFlight`] rejects a second action on a row while the first is still
//! running. [`KeyedLock`] queues balance-affecting actions of the same user
//! so a balance check and the append that depends on it are not interleaved.
//! Keys nobody holds or waits on are dropped.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct InFlight {
    keys: Arc<DashMap<String, ()>>,
}

impl InFlight {
    /// Marks `key` busy until the returned guard is dropped.
    pub fn try_begin(&self, key: impl Into<String>) -> Result<InFlightGuard> {
        let key = key.into();
        match self.keys.entry(key.clone()) {
            Entry::Occupied(_) => Err(Error::Conflict(format!(
                "another action on {key} is in progress"
            ))),
            Entry::Vacant(entry) => {
                entry.insert(());
                Ok(InFlightGuard {
                    keys: Arc::clone(&self.keys),
                    key,
                })
            },
        }
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    keys: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

#[derive(Clone, Debug, Default)]
pub struct KeyedLock {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLock {
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = Arc::clone(self.locks.entry(key.to_owned()).or_default().value());
        KeyedGuard {
            guard: Some(mutex.lock_owned().await),
            locks: Arc::clone(&self.locks),
            key: key.to_owned(),
        }
    }
}

/// Releases the key on drop and forgets it once nobody else waits on it.
#[derive(Debug)]
pub struct KeyedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    key: String,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
