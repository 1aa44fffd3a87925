//! Per-key locking for stores that only expose primitive operations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use super::{AtomicWindowStore, CounterStore, ExpiryOutcome, Increment, StoreError, StoreResult};

/// Wraps a [`CounterStore`] and serialises `increment_and_arm` per key with
/// an async mutex.
///
/// Each locked increment-and-arm runs on its own task, so dropping the
/// caller's future cannot stop it between the increment and the expiry-set.
/// Only invocations that go through this wrapper are serialised; anything
/// writing to the inner store directly bypasses the lock.
#[derive(Debug)]
pub struct KeyLocked<S> {
    shared: Arc<Shared<S>>,
}

#[derive(Debug)]
struct Shared<S> {
    inner: S,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: CounterStore> KeyLocked<S> {
    pub fn new(inner: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner,
                locks: DashMap::new(),
            }),
        }
    }

    /// Access the wrapped store.
    pub fn inner(&self) -> &S {
        &self.shared.inner
    }

    /// Number of keys with a live lock entry.
    pub fn held_locks(&self) -> usize {
        self.shared.locks.len()
    }
}

impl<S: CounterStore> Shared<S> {
    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once nobody else holds a handle to it.
    fn release(&self, key: &str) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn increment_and_arm(&self, key: &str, window: Duration) -> StoreResult<Increment> {
        let lock = self.lock_for(key);
        let result = {
            let _guard = lock.lock().await;
            self.arm_locked(key, window).await
        };
        drop(lock);
        self.release(key);
        result
    }

    async fn arm_locked(&self, key: &str, window: Duration) -> StoreResult<Increment> {
        let count = self.inner.increment(key).await?;
        if count != 1 {
            return Ok(Increment {
                count,
                expiry: ExpiryOutcome::Untouched,
            });
        }

        let expiry = match self.inner.set_expiry(key, window).await {
            Ok(()) => ExpiryOutcome::Armed,
            Err(e) => {
                warn!(key = %key, error = %e, "Counter created without expiry");
                ExpiryOutcome::Failed(e.to_string())
            }
        };
        Ok(Increment { count, expiry })
    }
}

#[async_trait]
impl<S: CounterStore> CounterStore for KeyLocked<S> {
    async fn increment(&self, key: &str) -> StoreResult<u64> {
        self.shared.inner.increment(key).await
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.shared.inner.set_expiry(key, ttl).await
    }

    async fn count(&self, key: &str) -> StoreResult<Option<u64>> {
        self.shared.inner.count(key).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.shared.inner.ttl(key).await
    }
}

#[async_trait]
impl<S: CounterStore + 'static> AtomicWindowStore for KeyLocked<S> {
    async fn increment_and_arm(&self, key: &str, window: Duration) -> StoreResult<Increment> {
        let shared = self.shared.clone();
        let key = key.to_string();
        tokio::spawn(async move { shared.increment_and_arm(&key, window).await })
            .await
            .map_err(|e| StoreError::Backend(format!("increment task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use futures::future::join_all;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Primitive-only store that yields between operations and records how
    /// often the expiry was set.
    #[derive(Default)]
    struct RecordingStore {
        counters: SyncMutex<HashMap<String, u64>>,
        expiries: SyncMutex<HashMap<String, Duration>>,
        expiry_calls: AtomicUsize,
        fail_expiry: bool,
    }

    #[async_trait]
    impl CounterStore for RecordingStore {
        async fn increment(&self, key: &str) -> StoreResult<u64> {
            tokio::task::yield_now().await;
            let mut counters = self.counters.lock();
            let count = counters.entry(key.to_string()).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.expiry_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_expiry {
                return Err(StoreError::Backend("expire refused".to_string()));
            }
            self.expiries.lock().insert(key.to_string(), ttl);
            Ok(())
        }

        async fn count(&self, key: &str) -> StoreResult<Option<u64>> {
            Ok(self.counters.lock().get(key).copied())
        }

        async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
            Ok(self.expiries.lock().get(key).copied())
        }
    }

    #[tokio::test]
    async fn test_first_increment_arms_window() {
        let store = KeyLocked::new(RecordingStore::default());

        let first = store
            .increment_and_arm("k", Duration::from_secs(30))
            .await
            .unwrap();
        let second = store
            .increment_and_arm("k", Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(first.expiry, ExpiryOutcome::Armed);
        assert_eq!(second.expiry, ExpiryOutcome::Untouched);
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(store.inner().expiry_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_arrivals_set_expiry_once() {
        let store = Arc::new(KeyLocked::new(RecordingStore::default()));

        let tasks = (0..64).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .increment_and_arm("hot", Duration::from_secs(10))
                    .await
                    .unwrap()
            })
        });
        let results: Vec<Increment> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let armed = results
            .iter()
            .filter(|r| r.expiry == ExpiryOutcome::Armed)
            .count();
        assert_eq!(armed, 1);
        assert_eq!(store.inner().expiry_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.count("hot").await.unwrap(), Some(64));
    }

    #[tokio::test]
    async fn test_failed_expiry_is_reported() {
        let store = KeyLocked::new(RecordingStore {
            fail_expiry: true,
            ..Default::default()
        });

        let result = store
            .increment_and_arm("k", Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(result.count, 1);
        assert!(matches!(result.expiry, ExpiryOutcome::Failed(_)));
        assert_eq!(store.ttl("k").await.unwrap(), None);
    }

    /// Memory-backed primitives whose `set_expiry` takes a while.
    struct SlowExpiryStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl CounterStore for SlowExpiryStore {
        async fn increment(&self, key: &str) -> StoreResult<u64> {
            self.inner.increment(key).await
        }

        async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.set_expiry(key, ttl).await
        }

        async fn count(&self, key: &str) -> StoreResult<Option<u64>> {
            self.inner.count(key).await
        }

        async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
            self.inner.ttl(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_still_arms_window() {
        let store = KeyLocked::new(SlowExpiryStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(50),
        });

        let first = tokio::time::timeout(
            Duration::from_millis(5),
            store.increment_and_arm("k", Duration::from_secs(1)),
        )
        .await;
        assert!(first.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.ttl("k").await.unwrap().is_some());

        let second = store
            .increment_and_arm("k", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.expiry, ExpiryOutcome::Untouched);
        assert_eq!(store.held_locks(), 0);
    }

    #[tokio::test]
    async fn test_lock_entries_are_released() {
        let store = KeyLocked::new(RecordingStore::default());

        for key in ["a", "b", "c"] {
            store
                .increment_and_arm(key, Duration::from_secs(1))
                .await
                .unwrap();
        }

        assert_eq!(store.held_locks(), 0);
    }
}
