use std::io;
use std::result;

/// Custom result type for preference store operations
pub type Result<T> = result::Result<T, Error>;

/// Preference store errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The flushed snapshot went stale while it was being written; the flush
    /// has to run again against the current state. Never reaches callers of
    /// the read/write API.
    #[error("snapshot changed during flush, reschedule required")]
    Reschedule,
    /// File system failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Table backend failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Value type tag outside the supported set
    #[error("unsupported value type tag: {0:#x}")]
    UnsupportedType(u32),
    /// Encoded payload could not be decoded
    #[error("corrupted data: {0}")]
    Corrupted(String),
    /// Store name cannot be mapped to a persisted file
    #[error("invalid store name: {0:?}")]
    InvalidName(String),
    /// Write-back pool is no longer accepting work
    #[error("write-back scheduler is shut down")]
    Shutdown,
}

impl Error {
    /// True for the stale-snapshot control signal
    pub fn is_reschedule(&self) -> bool {
        matches!(self, Error::Reschedule)
    }

    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        Error::Corrupted(msg.into())
    }
}
