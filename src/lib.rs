//! # Tagsieve
//!
//! Label-indexed series search: resolves a set of label filters and a time
//! range into the identifiers of matching series, using an inverted index of
//! date-bucketed postings stored in a sorted key-value table.
//!
//! ## Features
//!
//! - **Cost-ordered planning**: filters run cheapest-first, using match counts
//!   observed by earlier searches
//! - **Short-circuit evaluation**: later filters only look up surviving series,
//!   and the search stops once nothing survives
//! - **Regex filters**: literal alternations expand into exact lookups; other
//!   patterns fall back to a prefix scan
//! - **Bounded work**: per-search deadlines checked cooperatively during scans
//!
//! ## Modules
//!
//! - [`storage`]: sorted key-value table and index key layout
//! - [`index`]: identifier sets, tag filters, cost cache and search
//! - [`ingest`]: rows, labels and the importer line parser
//! - [`query`]: series selector parser
//! - [`engine`]: async facade used by the CLI
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tagsieve::{Config, IndexEngine, Row, Tenant, TimeRange, parse_selector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = IndexEngine::open(&Config::default())?;
//!     let tenant = Tenant::new(1, 0);
//!
//!     engine
//!         .ingest(tenant, vec![Row::new("app", "started").label("level", "info")])
//!         .await?;
//!
//!     let selector = parse_selector(r#"app{level=~"info|warn"}"#)?;
//!     let outcome = engine
//!         .search(tenant, &selector.matchers, TimeRange::last_hours(1), true)
//!         .await?;
//!
//!     println!("Found {} series", outcome.ids.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod index;
pub mod ingest;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use config::{Backend, Config, ConfigError};

pub use engine::{EngineError, EngineResult, ImportSummary, IndexEngine, SearchOutcome, SeriesEntry};

pub use index::{
    DateFilterCostCache, IdentifierSet, IndexSearch, SearchDeadline, SearchError, SearchResult,
    TagFilter, TagFilterSet,
};

pub use ingest::{Label, Row, TimeRange};

pub use query::{parse_selector, LabelMatcher, MatchOp, QueryError, Selector};

pub use storage::{IndexTable, KeyRangeCursor, StorageError, StorageResult, Tenant};
