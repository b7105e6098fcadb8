//! Keyed single-flight locks.
//!
//! Two layers keep one indexing run per repository:
//!
//! - [`KeyedLocks`]: one async mutex per key inside this process, created
//!   on demand and dropped once nobody holds or waits on it. Guards are
//!   owned so they can live across `.await`.
//! - [`StoreLease`]: a lease row in the [`RecordStore`], which every process
//!   sharing the store respects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

use crate::store::RecordStore;

/// A table of per-key async mutexes.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

/// Held while the keyed operation runs; releases on drop.
pub type KeyGuard = OwnedMutexGuard<()>;

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free, then hold it.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        self.slot(key).lock_owned().await
    }

    /// Hold `key` if it is free right now.
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        self.slot(key).try_lock_owned().ok()
    }

    /// Whether some caller currently holds `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(key)
            .and_then(Weak::upgrade)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slots.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        slots.retain(|_, weak| weak.strong_count() > 0);
        let fresh = Arc::new(AsyncMutex::new(()));
        slots.insert(key.to_string(), Arc::downgrade(&fresh));
        fresh
    }
}

/// A lease holder name unique to this process and call.
pub fn unique_holder() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!("pid{}-{}", std::process::id(), NEXT.fetch_add(1, Ordering::Relaxed))
}

/// An indexing lease held in a [`RecordStore`].
///
/// Give it back with [`release`](Self::release). Dropping it unreleased,
/// as a cancelled run does, releases it from a background task, and the
/// TTL covers a process that dies outright.
pub struct StoreLease {
    store: Arc<dyn RecordStore>,
    key: String,
    holder: String,
    ttl: Duration,
    released: bool,
}

impl StoreLease {
    /// Claim the lease on `key`, or `None` while another holder has it.
    pub async fn try_acquire(
        store: Arc<dyn RecordStore>,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> anyhow::Result<Option<Self>> {
        if !store.try_acquire_lease(key, holder, ttl).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            store,
            key: key.to_string(),
            holder: holder.to_string(),
            ttl,
            released: false,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Push the expiry out by another TTL. `false` means the lease expired
    /// and someone else took it.
    pub async fn renew(&self) -> anyhow::Result<bool> {
        self.store
            .try_acquire_lease(&self.key, &self.holder, self.ttl)
            .await
    }

    pub async fn release(mut self) {
        self.released = true;
        if let Err(err) = self.store.release_lease(&self.key, &self.holder).await {
            warn!(repository = %self.key, error = %err, "failed to release indexing lease");
        }
    }
}

impl Drop for StoreLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(repository = %self.key, "indexing lease left to expire");
            return;
        };
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let holder = std::mem::take(&mut self.holder);
        handle.spawn(async move {
            if let Err(err) = store.release_lease(&key, &holder).await {
                warn!(repository = %key, error = %err, "failed to release indexing lease");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("a/b").await;
        assert!(locks.is_locked("a/b"));
        assert!(locks.try_lock("a/b").is_none());
        drop(guard);
        assert!(!locks.is_locked("a/b"));
        assert!(locks.try_lock("a/b").is_some());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a/b").await;
        assert!(locks.try_lock("c/d").is_some());
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("a/b").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock("a/b").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn released_slots_are_pruned() {
        let locks = KeyedLocks::new();
        for i in 0..10 {
            let _g = locks.lock(&format!("k/{}", i)).await;
        }
        let _g = locks.lock("last/one").await;
        let slots = locks.slots.lock().unwrap();
        assert!(slots.len() <= 2);
    }

    #[test]
    fn holders_are_unique() {
        assert_ne!(unique_holder(), unique_holder());
    }

    #[tokio::test]
    async fn lease_excludes_other_holders_until_released() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let ttl = Duration::from_secs(60);

        let lease = StoreLease::try_acquire(Arc::clone(&store), "a/b", "one", ttl)
            .await
            .unwrap()
            .unwrap();
        assert!(StoreLease::try_acquire(Arc::clone(&store), "a/b", "two", ttl)
            .await
            .unwrap()
            .is_none());
        assert!(lease.renew().await.unwrap());

        lease.release().await;
        assert!(StoreLease::try_acquire(Arc::clone(&store), "a/b", "two", ttl)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn dropped_lease_is_released_in_the_background() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let ttl = Duration::from_secs(60);

        let lease = StoreLease::try_acquire(Arc::clone(&store), "a/b", "one", ttl)
            .await
            .unwrap();
        drop(lease);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(store.try_acquire_lease("a/b", "two", ttl).await.unwrap());
    }
}
