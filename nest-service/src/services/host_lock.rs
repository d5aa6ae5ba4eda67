use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Async mutual exclusion keyed by hostname.
///
/// Holders of the same hostname run one at a time; different hostnames never
/// contend. An entry lives only while some task holds or waits for it.
#[derive(Clone, Default)]
pub struct HostLocks {
    locks: Arc<Mutex<LockMap>>,
}

pub struct HostGuard {
    hostname: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl HostLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `hostname`, then hold it until the guard drops.
    pub async fn lock(&self, hostname: &str) -> HostGuard {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(hostname.to_string()).or_default().clone()
        };

        let guard = lock.lock_owned().await;

        HostGuard {
            hostname: hostname.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        // Release under the map lock so no new waiter can clone the entry
        // between the count check and the removal.
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();

        if let Some(lock) = map.get(&self.hostname) {
            if Arc::strong_count(lock) == 1 {
                map.remove(&self.hostname);
            }
        }
    }
}
