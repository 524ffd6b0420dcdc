//! Error types for ge_tracker

use thiserror::Error;

/// Unified error type for ge_tracker operations
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Every attempt against the upstream API failed (network error, timeout or bad status)
    #[error("Upstream unavailable after {attempts} attempt(s): {reason}")]
    UpstreamUnavailable { attempts: u32, reason: String },

    /// Upstream answered, but the payload did not match the expected schema
    #[error("Invalid response shape: {0}")]
    InvalidResponseShape(String),

    /// A price point with the same (item, timestamp) key is already stored
    #[error("Duplicate price point for item {item_id} at {timestamp}")]
    DuplicateKey { item_id: i64, timestamp: i64 },

    /// Any other database failure
    #[error("Database error: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    /// The store connection was already released
    #[error("Database connection is closed")]
    StoreClosed,

    /// Unknown item name, or no price data even after a forced refresh
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    /// True for the expected duplicate-insert race
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, TrackerError::DuplicateKey { .. })
    }

    /// True for errors raised by the fetch step of a refresh
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            TrackerError::UpstreamUnavailable { .. } | TrackerError::InvalidResponseShape(_)
        )
    }
}

/// Result alias for ge_tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
