//! Index search error types
//!
//! Defines all error conditions that can occur while compiling tag filters
//! and evaluating them against the index.

use crate::storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during index search
#[derive(Error, Debug)]
pub enum SearchError {
    /// The filter set cannot be searched (empty, or no positive filter)
    #[error("Invalid filter set: {0}")]
    InvalidFilterSet(String),

    /// A single tag filter could not be compiled
    #[error("Invalid tag filter: {0}")]
    InvalidFilter(String),

    /// The storage cursor failed while a filter was being evaluated
    #[error("Cursor error while {context}: {source}")]
    CursorIo {
        context: String,
        #[source]
        source: StorageError,
    },

    /// The cooperative deadline fired
    #[error("Search deadline of {timeout:?} exceeded")]
    DeadlineExceeded { timeout: Duration },

    /// A filter has no or-suffixes to evaluate
    #[error("Unsupported filter shape: {0}")]
    UnsupportedFilterShape(String),

    /// An internal invariant was violated (a bug, not a bad query)
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    /// Storage layer error outside of a filter scan
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SearchError {
    /// Whether this error is the deadline firing
    pub fn is_deadline(&self) -> bool {
        matches!(self, SearchError::DeadlineExceeded { .. })
    }
}

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SearchError::InvalidFilterSet("no positive filter".to_string());
        assert_eq!(err.to_string(), "Invalid filter set: no positive filter");

        let err = SearchError::DeadlineExceeded {
            timeout: Duration::from_millis(50),
        };
        assert!(err.is_deadline());
        assert_eq!(err.to_string(), "Search deadline of 50ms exceeded");
    }

    #[test]
    fn test_cursor_error_keeps_source() {
        let err = SearchError::CursorIo {
            context: "scanning job=\"api\"".to_string(),
            source: StorageError::Corruption("bad item".to_string()),
        };
        assert!(!err.is_deadline());
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("bad item"));
    }
}
