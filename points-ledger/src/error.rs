//! Error types for the points ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range input, rejected before any storage access
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Write conflict or lock wait timeout; the transaction was rolled back
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Stored data failed an integrity check
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Operation was cancelled before commit
    #[error("Operation cancelled before commit")]
    Cancelled,

    /// Blocking task failed to complete
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is the retryable write-race kind
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Whether this error belongs to the storage class.
    ///
    /// Storage-class failures always leave the transaction rolled back, so
    /// the operation is safe to retry.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::Conflict(_)
                | Error::Corruption(_)
                | Error::Serialization(_)
                | Error::Io(_)
        )
    }

    /// Whether this error was caused by caller input
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;

        match err.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
                Error::Conflict(err.to_string())
            }
            ErrorKind::Corruption => Error::Corruption(err.to_string()),
            _ => Error::Storage(err.to_string()),
        }
    }
}
