use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-resource async mutexes. A guard is held for the whole transition,
/// runtime call included.
#[derive(Default)]
pub struct ResourceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        self.entry(id).lock_owned().await
    }

    /// Background jobs skip resources that are busy.
    pub fn try_lock(&self, id: &str) -> Option<OwnedMutexGuard<()>> {
        self.entry(id).try_lock_owned().ok()
    }

    /// Drop the mutex of a resource that no longer exists.
    pub fn forget(&self, id: &str) {
        self.locks.remove_if(id, |_, m| Arc::strong_count(m) == 1);
    }
}
