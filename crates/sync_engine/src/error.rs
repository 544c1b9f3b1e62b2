//! Sync engine errors

use thiserror::Error;

/// Clock sync failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Reply looked like `sync_ts:` but did not carry a number
    #[error("malformed sync reply: {frame:?}")]
    MalformedReply { frame: String },

    /// Every allowed `sync` was spent
    #[error("sync attempts exhausted after {attempts} tries")]
    AttemptsExhausted { attempts: u32 },

    /// Reply handled before any `sync` was sent
    #[error("sync reply received before sync was sent")]
    NotStarted,
}
