//! Error types for the record stores.

use profile_mirror_core::Error as CoreError;
use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record key unusable as a file name
    #[error("Invalid record key '{0}'")]
    InvalidKey(String),

    /// A previous writer panicked while holding the connection
    #[error("Connection lock poisoned")]
    Poisoned,
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        CoreError::persistence(err.to_string())
    }
}
