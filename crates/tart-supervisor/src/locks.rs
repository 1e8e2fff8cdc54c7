//! Per-tart mutual exclusion.
//!
//! Start, stop, deploy and the sentry's action for one tart serialize on
//! the same async mutex. Different tarts never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

#[derive(Clone, Default)]
pub struct LockRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

/// Proof that the caller holds a tart's lock. Released on drop.
pub struct TartLock {
    push_url: String,
    _guard: OwnedMutexGuard<()>,
}

impl TartLock {
    pub fn push_url(&self) -> &str {
        &self.push_url
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for `push_url`.
    pub async fn acquire(&self, push_url: &str) -> TartLock {
        let mutex = self.mutex_for(push_url);
        TartLock {
            push_url: push_url.to_string(),
            _guard: mutex.lock_owned().await,
        }
    }

    /// Take the lock for `push_url` only if nobody holds it right now.
    pub fn try_acquire(&self, push_url: &str) -> Option<TartLock> {
        let guard = self.mutex_for(push_url).try_lock_owned().ok()?;
        Some(TartLock {
            push_url: push_url.to_string(),
            _guard: guard,
        })
    }

    /// Release `lock` and drop its entry unless another task is waiting on it.
    ///
    /// The guard is dropped while the map is locked, so a later `acquire`
    /// can never hold a fresh mutex while the old guard is still alive.
    pub fn retire(&self, lock: TartLock) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in the guard.
        if Arc::strong_count(OwnedMutexGuard::mutex(&lock._guard)) == 2 {
            locks.remove(&lock.push_url);
        }
        drop(lock);
    }

    fn mutex_for(&self, push_url: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(push_url.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
