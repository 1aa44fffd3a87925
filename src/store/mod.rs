//! Counter storage backends.
//!
//! A store owns every counter and its expiry. The limiter only ever talks to
//! it through [`AtomicWindowStore::increment_and_arm`], which must run the
//! increment and the optional expiry-set as one unit per key.

mod locked;
mod memory;
mod redis;
mod scripts;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use locked::KeyLocked;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors raised by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis connection or command failure
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What happened to the key's TTL during one atomic increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// This invocation created the counter and set its TTL.
    Armed,
    /// The counter already existed; the TTL was left alone.
    Untouched,
    /// This invocation created the counter but setting the TTL failed.
    Failed(String),
}

/// Result of one atomic increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    /// Counter value after the increment
    pub count: u64,
    /// Expiry handling for this invocation
    pub expiry: ExpiryOutcome,
}

impl Increment {
    /// Whether this increment opened a new window.
    pub fn opened_window(&self) -> bool {
        self.count == 1
    }
}

/// Primitive single-key operations of a key-value store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it at 1 if absent, and return
    /// the new value.
    async fn increment(&self, key: &str) -> StoreResult<u64>;

    /// Set the time-to-live of an existing key.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Current counter value, or `None` if the key is absent or expired.
    async fn count(&self, key: &str) -> StoreResult<Option<u64>>;

    /// Remaining time-to-live, or `None` if the key is absent or has none.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;
}

/// A store that can run "increment, then arm the TTL if the result is 1" as
/// one indivisible unit per key.
#[async_trait]
pub trait AtomicWindowStore: CounterStore {
    async fn increment_and_arm(&self, key: &str, window: Duration) -> StoreResult<Increment>;
}
