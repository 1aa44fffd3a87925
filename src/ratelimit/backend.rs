//! Rate limiter trait for abstracting over limiter implementations.

use async_trait::async_trait;

use super::window::Verdict;
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// The HTTP layer is generic over this so it can run against any store, or
/// against a stub limiter in tests.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Count one request for `identity` and decide on it.
    async fn check(&self, identity: &str, limit: i64, window_secs: i64) -> Result<Verdict>;

    /// Set the window expiry for `identity` without counting a request.
    async fn repair_expiry(&self, identity: &str, window_secs: i64) -> Result<()>;
}
