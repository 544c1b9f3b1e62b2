//! Session error types

use contracts::RunState;
use dispatcher::DispatcherError;
use sync_engine::SyncError;
use thiserror::Error;
use transport::TransportError;

/// Session-level errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Link to the Node is gone
    #[error("connection lost: {message}")]
    ConnectionLost { message: String },

    /// Illegal handshake transition
    #[error("invalid transition {from} -> {to} in run {run_index}")]
    InvalidTransition {
        run_index: u32,
        from: RunState,
        to: RunState,
    },

    /// Run output could not be opened
    #[error("output error: {0}")]
    Output(#[from] DispatcherError),

    /// Clock sync misuse (not a sync timeout or rejection)
    #[error("clock sync error: {0}")]
    Sync(#[from] SyncError),

    /// Transport failure other than connection loss
    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionLost { reason } => Self::ConnectionLost { message: reason },
            other => Self::Transport(other),
        }
    }
}

impl SessionError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

/// Session Result type alias
pub type Result<T> = std::result::Result<T, SessionError>;
