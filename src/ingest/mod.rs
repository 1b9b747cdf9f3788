//! Tagsieve Ingestion Boundary
//!
//! Row types and the importer line format that feed
//! [`IndexWriter`](crate::index::IndexWriter):
//!
//! ```text
//! importer text ──parse_rows──▶ Vec<Row> ──IndexWriter::index_rows──▶ postings
//! ```

mod error;
mod parser;
mod row;

pub use error::{ParseError, ParseResult};
pub use parser::{parse_line, parse_rows, ParsedRows};
pub use row::{now_millis, Label, Row, TimeRange};
