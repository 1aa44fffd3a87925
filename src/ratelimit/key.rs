//! Rate limit key derivation.

use crate::error::{Result, TollgateError};

/// Namespace prepended to every identity before it reaches the store.
pub const DEFAULT_NAMESPACE: &str = "rate:";

/// The prefix that keeps limiter keys apart from unrelated keys in the same
/// store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace(String);

impl KeyNamespace {
    /// Create a namespace. An empty prefix is rejected.
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(TollgateError::InvalidArgument(
                "key namespace must not be empty".to_string(),
            ));
        }
        Ok(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the key for `identity`.
    pub fn key_for(&self, identity: &str) -> Result<RateLimitKey> {
        if identity.is_empty() {
            return Err(TollgateError::InvalidArgument(
                "identity must not be empty".to_string(),
            ));
        }
        Ok(RateLimitKey(format!("{}{}", self.0, identity)))
    }
}

impl Default for KeyNamespace {
    fn default() -> Self {
        Self(DEFAULT_NAMESPACE.to_string())
    }
}

/// A key that uniquely identifies one identity's fixed-window counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
