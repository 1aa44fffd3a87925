//! Validated limit parameters and the admission decision.

use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Longest accepted window: one year.
pub const MAX_WINDOW_SECS: i64 = 365 * 24 * 60 * 60;

/// Length of a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window(Duration);

impl Window {
    /// Create a window of `secs` seconds. Lengths outside
    /// `1..=MAX_WINDOW_SECS` are rejected.
    pub fn from_secs(secs: i64) -> Result<Self> {
        if secs <= 0 {
            return Err(TollgateError::InvalidArgument(format!(
                "window must be positive, got {}s",
                secs
            )));
        }
        if secs > MAX_WINDOW_SECS {
            return Err(TollgateError::InvalidArgument(format!(
                "window must be at most {}s, got {}s",
                MAX_WINDOW_SECS, secs
            )));
        }
        Ok(Self(Duration::from_secs(secs as u64)))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }
}

/// Maximum number of admitted requests per window.
///
/// A limit of zero is valid and denies every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(u64);

impl Limit {
    pub fn new(limit: i64) -> Result<Self> {
        u64::try_from(limit).map(Self).map_err(|_| {
            TollgateError::InvalidArgument(format!("limit must not be negative, got {}", limit))
        })
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Decide on a request given the post-increment counter.
    pub fn decide(&self, count: u64) -> Decision {
        if count > self.0 {
            Decision::Deny
        } else {
            Decision::Admit
        }
    }
}

/// Outcome of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Admit,
    Deny,
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Admit => "admit",
            Decision::Deny => "deny",
        }
    }
}

/// A decision together with the counter it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    /// Counter value after this request was counted
    pub count: u64,
    pub limit: u64,
    /// Whether this request opened a new window
    pub opened_window: bool,
}

impl Verdict {
    /// Admissions left in the current window.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

/// Read-only snapshot of an identity's current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowState {
    pub count: u64,
    /// Time until the window resets; `None` means the key carries no TTL
    pub resets_in: Option<Duration>,
}
