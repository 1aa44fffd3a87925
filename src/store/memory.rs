//! In-process counter store with lazy expiry.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use super::{AtomicWindowStore, CounterStore, ExpiryOutcome, Increment, StoreError, StoreResult};

/// A counter and its optional deadline.
#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// Counter store kept in process memory.
///
/// Expired keys are treated as absent the moment they are touched and are
/// physically removed by [`MemoryStore::purge_expired`]. Every operation on a
/// key runs under that key's shard lock, so `increment_and_arm` is atomic per
/// key without any extra locking.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired key and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(self.slots.len());
        if removed > 0 {
            trace!(removed, "Purged expired counters");
        }
        removed
    }

    /// Number of keys currently held, expired or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Increment under the entry lock and return the slot after the update.
    fn bump(entry: Entry<'_, String, Slot>, now: Instant) -> Slot {
        match entry {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.is_expired(now) {
                    *slot = Slot {
                        count: 1,
                        expires_at: None,
                    };
                } else {
                    slot.count += 1;
                }
                *slot
            }
            Entry::Vacant(vacant) => *vacant.insert(Slot {
                count: 1,
                expires_at: None,
            }),
        }
    }

    fn live_slot(&self, key: &str) -> Option<Slot> {
        let now = Instant::now();
        self.slots
            .get(key)
            .map(|slot| *slot)
            .filter(|slot| !slot.is_expired(now))
    }
}

fn deadline_after(now: Instant, ttl: Duration) -> StoreResult<Instant> {
    now.checked_add(ttl)
        .ok_or_else(|| StoreError::Backend(format!("expiry of {:?} is out of range", ttl)))
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str) -> StoreResult<u64> {
        let now = Instant::now();
        Ok(Self::bump(self.slots.entry(key.to_string()), now).count)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let now = Instant::now();
        let deadline = deadline_after(now, ttl)?;
        match self.slots.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                slot.expires_at = Some(deadline);
                Ok(())
            }
            _ => Err(StoreError::Backend(format!("no such key: {}", key))),
        }
    }

    async fn count(&self, key: &str) -> StoreResult<Option<u64>> {
        Ok(self.live_slot(key).map(|slot| slot.count))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .live_slot(key)
            .and_then(|slot| slot.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now)))
    }
}

#[async_trait]
impl AtomicWindowStore for MemoryStore {
    async fn increment_and_arm(&self, key: &str, window: Duration) -> StoreResult<Increment> {
        let now = Instant::now();
        // Fails before the key is touched.
        let deadline = deadline_after(now, window)?;
        // The entry guard holds the shard lock for the whole read-modify-arm.
        let mut entry = self.slots.entry(key.to_string()).or_insert(Slot {
            count: 0,
            expires_at: None,
        });
        let slot = entry.value_mut();
        if slot.is_expired(now) {
            slot.count = 0;
            slot.expires_at = None;
        }
        slot.count += 1;

        let expiry = if slot.count == 1 {
            slot.expires_at = Some(deadline);
            ExpiryOutcome::Armed
        } else {
            ExpiryOutcome::Untouched
        };

        Ok(Increment {
            count: slot.count,
            expiry,
        })
    }
}
