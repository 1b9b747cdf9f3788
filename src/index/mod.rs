//! Tagsieve Index Search
//!
//! Finds the series matching a label selector within a time range:
//!
//! - **IdentifierSet**: compressed set of series identifiers (roaring treemap)
//! - **TagFilter / TagFilterSet**: label matchers compiled into key prefixes
//! - **DateFilterCostCache**: per-date match counts that order filters cheapest first
//! - **IndexSearch**: plans, evaluates and folds filters over an `IndexTable`
//! - **IndexWriter**: assigns identifiers and writes postings on ingestion
//!
//! # Architecture
//!
//! ```text
//! Query: {__name__="http_requests", job=~"api|web", env!="dev"} over [t0, t1)
//!        ↓
//! TagFilterSet: three filters under the tenant prefix
//!        ↓
//! DateFilterCostCache: order by last observed count → [job, __name__, env]
//!        ↓
//! IndexSearch: seed with job, intersect __name__, subtract env
//!        ↓
//! IdentifierSet {id, id, ...}
//! ```

mod buffer_pool;
mod cost_cache;
mod deadline;
mod error;
mod id_set;
mod search;
mod tag_filter;
mod writer;

pub use buffer_pool::{KeyBufferPool, PooledBuffer};
pub use cost_cache::{
    CostCacheStats, CostStore, CostStoreError, DateFilterCostCache, LruCostStore,
    DEFAULT_COST_CACHE_CAPACITY,
};
pub use deadline::{PaceLimiter, SearchDeadline, DEFAULT_CHECK_INTERVAL};
pub use error::{SearchError, SearchResult};
pub use id_set::IdentifierSet;
pub use search::{FilterEvaluation, IndexSearch};
pub use tag_filter::{TagFilter, TagFilterSet, FULL_SCAN_COST, MAX_OR_VALUES, OR_SUFFIX_COST};
pub use writer::{IndexWriter, DEFAULT_RECENT_SERIES_CAPACITY};
