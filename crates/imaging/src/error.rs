//! Imaging error types

use std::path::PathBuf;

use contracts::ContractError;
use thiserror::Error;

/// Imaging specific error
#[derive(Debug, Error)]
pub enum ImagingError {
    /// Replay file could not be read
    #[error("failed to load replay '{path}': {message}")]
    ReplayLoad { path: PathBuf, message: String },

    /// Replay file holds no samples
    #[error("replay '{path}' contains no samples")]
    EmptyReplay { path: PathBuf },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// Imaging Result type alias
pub type Result<T> = std::result::Result<T, ImagingError>;
