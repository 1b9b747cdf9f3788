//! Query error types
//!
//! Defines the error conditions of selector and time-bound parsing.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Selector parsing failed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Selector contains no matchers
    #[error("Empty selector")]
    EmptySelector,

    /// Selector parsed but cannot be searched
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// Invalid time range specified
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
