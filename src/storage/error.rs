//! Storage layer error types
//!
//! Defines all errors that can occur while reading or writing index items.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite backend failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Data corruption detected (truncated item, bad tail length, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Values codec failed to marshal or unmarshal
    #[error("Codec error: {0}")]
    Codec(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
