//! Importer parse errors

use thiserror::Error;

/// Errors that can occur while parsing one importer line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line has a metric but nothing after it
    #[error("missing value")]
    MissingValue,

    /// Metric name is empty
    #[error("metric cannot be empty")]
    EmptyMetric,

    /// Label block is malformed
    #[error("cannot unmarshal labels: {0}")]
    InvalidLabels(String),

    /// Value is not a valid quoted string
    #[error("unexpected value {0:?}")]
    InvalidValue(String),

    /// Trailing timestamp is not a non-negative integer
    #[error("cannot parse timestamp {0:?}")]
    InvalidTimestamp(String),

    /// Quoted string contains an unsupported escape sequence
    #[error("cannot unescape {0:?}")]
    InvalidEscape(String),
}

/// Result type for importer parsing
pub type ParseResult<T> = Result<T, ParseError>;
