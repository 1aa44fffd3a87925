//! Fixed-window rate limiter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::backend::RateLimiterBackend;
use super::key::{KeyNamespace, RateLimitKey};
use super::window::{Decision, Limit, Verdict, Window, WindowState};
use crate::error::{Result, TollgateError};
use crate::store::{AtomicWindowStore, ExpiryOutcome, Increment};

/// Fixed-window rate limiter over an injected store.
///
/// The limiter holds no counter state of its own: every call increments the
/// identity's counter in the store and, when that increment created the
/// counter, arms its expiry, all in one atomic store operation. Arguments are
/// validated before the store is touched.
pub struct FixedWindowLimiter<S: ?Sized> {
    store: Arc<S>,
    namespace: KeyNamespace,
}

impl<S: AtomicWindowStore + ?Sized> FixedWindowLimiter<S> {
    /// Create a limiter using the default `rate:` namespace.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_namespace(store, KeyNamespace::default())
    }

    pub fn with_namespace(store: Arc<S>, namespace: KeyNamespace) -> Self {
        Self { store, namespace }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    /// Count one request for `identity` and return whether it is admitted.
    pub async fn evaluate(&self, identity: &str, limit: i64, window_secs: i64) -> Result<Decision> {
        self.check(identity, limit, window_secs)
            .await
            .map(|verdict| verdict.decision)
    }

    /// Like [`evaluate`](Self::evaluate), but also reports the counter.
    ///
    /// A `window_secs` that differs from the one the current window was
    /// opened with has no effect until that window expires.
    pub async fn check(&self, identity: &str, limit: i64, window_secs: i64) -> Result<Verdict> {
        let limit = Limit::new(limit)?;
        let window = Window::from_secs(window_secs)?;
        let key = self.namespace.key_for(identity)?;

        trace!(key = %key, limit = limit.get(), "Checking rate limit");

        let increment = self
            .store
            .increment_and_arm(key.as_str(), window.duration())
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Rate limit store unavailable");
                TollgateError::StoreUnavailable(e)
            })?;
        let opened_window = increment.opened_window();
        let Increment { count, expiry } = increment;

        match expiry {
            ExpiryOutcome::Armed => {
                debug!(
                    key = %key,
                    window_secs = window.duration().as_secs(),
                    "Opened rate limit window"
                );
            }
            ExpiryOutcome::Untouched => {}
            ExpiryOutcome::Failed(reason) => {
                warn!(
                    key = %key,
                    count,
                    reason = %reason,
                    "Rate limit window opened without expiry"
                );
                return Err(TollgateError::PartialFailure {
                    key: key.into_string(),
                    count,
                    reason,
                });
            }
        }

        let decision = limit.decide(count);
        if decision == Decision::Deny {
            debug!(
                key = %key,
                count,
                limit = limit.get(),
                "Rate limit exceeded"
            );
        }

        Ok(Verdict {
            decision,
            count,
            limit: limit.get(),
            opened_window,
        })
    }

    /// Set the expiry on an identity's counter without counting a request.
    ///
    /// Recovery path for [`TollgateError::PartialFailure`].
    pub async fn repair_expiry(&self, identity: &str, window_secs: i64) -> Result<()> {
        let window = Window::from_secs(window_secs)?;
        let key = self.namespace.key_for(identity)?;

        self.store
            .set_expiry(key.as_str(), window.duration())
            .await
            .map_err(TollgateError::StoreUnavailable)?;

        debug!(key = %key, "Re-armed rate limit window");
        Ok(())
    }

    /// Current window for `identity`, or `None` if it has none.
    pub async fn peek(&self, identity: &str) -> Result<Option<WindowState>> {
        let key = self.namespace.key_for(identity)?;
        self.peek_key(&key).await
    }

    async fn peek_key(&self, key: &RateLimitKey) -> Result<Option<WindowState>> {
        let Some(count) = self.store.count(key.as_str()).await? else {
            return Ok(None);
        };
        let resets_in = self.store.ttl(key.as_str()).await?;
        Ok(Some(WindowState { count, resets_in }))
    }
}

#[async_trait]
impl<S: AtomicWindowStore + ?Sized> RateLimiterBackend for FixedWindowLimiter<S> {
    async fn check(&self, identity: &str, limit: i64, window_secs: i64) -> Result<Verdict> {
        FixedWindowLimiter::check(self, identity, limit, window_secs).await
    }

    async fn repair_expiry(&self, identity: &str, window_secs: i64) -> Result<()> {
        FixedWindowLimiter::repair_expiry(self, identity, window_secs).await
    }
}
