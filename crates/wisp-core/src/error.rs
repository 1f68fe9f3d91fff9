use thiserror::Error;

use wisp_store::StoreError;

/// Errors produced by the lifecycle and streak components.
///
/// `Gone` is deliberately distinct from `NotFound` so callers can tell
/// "never existed (or already purged)" apart from "existed, but you were
/// too slow".
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity absent or already purged.
    #[error("not found")]
    NotFound,

    /// Entity existed but is now expired or consumed.
    #[error("gone: expired or already consumed")]
    Gone,

    /// Requested expiry is outside policy bounds.
    #[error("invalid TTL: {requested} hours (allowed 1..={max})")]
    InvalidTtl { requested: i64, max: i64 },

    /// Lost a concurrent race (duplicate pair creation, stale update).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed request data (empty message, oversized caption, ...).
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Payload backend failure.  Transient: creates surface it to the
    /// caller, the sweep retries deletions on the next tick.
    #[error("payload storage failure: {0}")]
    Storage(String),

    /// Record store failure.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => CoreError::NotFound,
            other => CoreError::Store(other),
        }
    }
}
