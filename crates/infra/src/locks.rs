//! Per-key async mutual exclusion.
//!
//! Services hold the lock of the record they mutate for the whole
//! load → decide → commit sequence, so two requests against the same account
//! (or reset request) never interleave their check-then-act. Requests against
//! different keys do not contend.
//!
//! Lock order when both are needed: reset request first, then account.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Entries beyond this count trigger a sweep of idle keys.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug)]
pub struct KeyedLocks<K> {
    inner: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let slot = {
            // A poisoned map is still structurally valid; keep serving locks.
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if map.len() >= SWEEP_THRESHOLD {
                map.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            Arc::clone(map.entry(key).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or_else(|e| e.into_inner().len())
    }
}
