//! Error types for transfer sessions

use ferry_files::FilesError;
use thiserror::Error;

/// Errors that end a transfer session
#[derive(Debug, Error)]
pub enum TransferError {
    /// Malformed or out-of-order framing
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport failure or premature close
    #[error("Channel error: {0}")]
    Channel(String),

    /// Chunking or reassembly failure on the local side
    #[error("File error: {0}")]
    Files(#[from] FilesError),

    /// Control message could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Operation not valid in the current session state
    #[error("Invalid state transition: {0}")]
    InvalidState(String),
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Files(FilesError::Io(err))
    }
}

impl TransferError {
    /// True for errors caused by the remote side's framing
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, TransferError::Protocol(_))
    }
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;
