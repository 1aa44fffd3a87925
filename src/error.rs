//! Error types for Tollgate.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Rejected input; nothing was written to the store
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store could not perform the increment or the expiry-set
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The counter was incremented but its window could not be armed.
    ///
    /// The key is left without a TTL until `repair_expiry` succeeds.
    #[error("Window for {key} was counted ({count}) but not armed: {reason}")]
    PartialFailure {
        key: String,
        count: u64,
        reason: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
