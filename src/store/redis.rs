//! Redis-backed counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::scripts::INCREMENT_AND_ARM_SCRIPT;
use super::{AtomicWindowStore, CounterStore, ExpiryOutcome, Increment, StoreError, StoreResult};

/// Counter store backed by a Redis server.
///
/// Atomicity of `increment_and_arm` comes from Redis running the whole Lua
/// script without interleaving other commands.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        debug!(url = %url, "Connected to Redis");
        Ok(Self { connection })
    }

    /// Build a store from an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

/// Redis expiries are whole seconds; never round a non-zero window down to 0.
fn expiry_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str) -> StoreResult<u64> {
        let mut con = self.connection.clone();
        let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut con).await?;
        Ok(count)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut con = self.connection.clone();
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(expiry_secs(ttl))
            .query_async(&mut con)
            .await?;
        if applied == 1 {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("no such key: {}", key)))
        }
    }

    async fn count(&self, key: &str) -> StoreResult<Option<u64>> {
        let mut con = self.connection.clone();
        let count: Option<u64> = redis::cmd("GET").arg(key).query_async(&mut con).await?;
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut con = self.connection.clone();
        // -2: key absent, -1: key has no expiry
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut con).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }
}

#[async_trait]
impl AtomicWindowStore for RedisStore {
    async fn increment_and_arm(&self, key: &str, window: Duration) -> StoreResult<Increment> {
        let mut con = self.connection.clone();
        let (count, armed, error): (u64, i64, String) = INCREMENT_AND_ARM_SCRIPT
            .key(key)
            .arg(expiry_secs(window))
            .invoke_async(&mut con)
            .await?;

        let expiry = if armed == 1 {
            ExpiryOutcome::Armed
        } else if count == 1 {
            warn!(key = %key, error = %error, "Redis counter created without expiry");
            ExpiryOutcome::Failed(error)
        } else {
            ExpiryOutcome::Untouched
        };

        Ok(Increment { count, expiry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REDIS_URL: &str = "redis://127.0.0.1/";

    #[test]
    fn test_expiry_secs_rounds_up() {
        assert_eq!(expiry_secs(Duration::from_secs(60)), 60);
        assert_eq!(expiry_secs(Duration::from_millis(1500)), 2);
        assert_eq!(expiry_secs(Duration::from_millis(1)), 1);
    }

    async fn fresh_store(key: &str) -> RedisStore {
        let store = RedisStore::connect(REDIS_URL).await.unwrap();
        let mut con = store.connection.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut con).await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_increment_and_arm() {
        let key = "tollgate-test:arm";
        let store = fresh_store(key).await;

        let first = store
            .increment_and_arm(key, Duration::from_secs(20))
            .await
            .unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.expiry, ExpiryOutcome::Armed);

        let second = store
            .increment_and_arm(key, Duration::from_secs(20))
            .await
            .unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.expiry, ExpiryOutcome::Untouched);

        let ttl = store.ttl(key).await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(20));
        assert_eq!(store.count(key).await.unwrap(), Some(2));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_primitives() {
        let key = "tollgate-test:primitives";
        let store = fresh_store(key).await;

        assert_eq!(store.count(key).await.unwrap(), None);
        assert_eq!(store.increment(key).await.unwrap(), 1);
        assert_eq!(store.ttl(key).await.unwrap(), None);

        store.set_expiry(key, Duration::from_secs(5)).await.unwrap();
        assert!(store.ttl(key).await.unwrap().is_some());
    }
}
