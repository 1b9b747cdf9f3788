//! Index Engine
//!
//! Owns the index table and the state shared by every search: the posting
//! writer, the filter cost cache and the key-buffer pool. Callers on the async
//! runtime use [`IndexEngine::ingest`] and [`IndexEngine::search`]; the
//! blocking index work runs on `spawn_blocking`.
//!
//! # Architecture
//!
//! ```text
//! ingest(tenant, rows) ──spawn_blocking──► IndexWriter ──► IndexTable
//!
//! search(tenant, selector, range)
//!   └─spawn_blocking─► TagFilterSet::from_matchers
//!                      IndexSearch::new(table, cost_cache, pool, deadline)
//!                        .range_query(tfs, start, end, scan_limit)
//!                      series_labels(id) for each result (optional)
//! ```
//!
//! The engine is cheap to clone; clones share the table and caches.

use crate::config::{Backend, Config, SearchConfig};
use crate::index::{
    CostCacheStats, DateFilterCostCache, FilterEvaluation, IndexSearch, IndexWriter,
    KeyBufferPool, LruCostStore, SearchDeadline, SearchError, TagFilterSet,
};
use crate::ingest::{parse_rows, Label, Row, TimeRange};
use crate::query::LabelMatcher;
use crate::storage::{IndexTable, MemoryTable, SqliteTable, StorageError, Tenant};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors returned by the engine facade
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// The blocking task panicked or was cancelled
    #[error("Index task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Task(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// One series in a search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesEntry {
    pub id: u64,
    pub labels: Vec<Label>,
}

/// Result of [`IndexEngine::search`]
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    /// Matching identifiers in ascending order, at most `max_series`
    pub ids: Vec<u64>,
    /// Whether more than `max_series` identifiers matched
    pub truncated: bool,
    /// Label sets of `ids`, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<Vec<SeriesEntry>>,
    #[serde(skip)]
    pub evaluations: Vec<FilterEvaluation>,
}

/// Summary of [`IndexEngine::import`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows_indexed: usize,
    pub invalid_lines: usize,
}

/// Shared index state
#[derive(Clone)]
pub struct IndexEngine {
    table: Arc<dyn IndexTable>,
    writer: Arc<IndexWriter>,
    cost_store: Arc<LruCostStore>,
    cost_cache: DateFilterCostCache,
    pool: KeyBufferPool,
    search: SearchConfig,
    bucket_width_ms: u64,
}

impl IndexEngine {
    /// Open the table selected by `config.storage.backend`
    pub fn open(config: &Config) -> EngineResult<Self> {
        let table: Arc<dyn IndexTable> = match config.storage.backend {
            Backend::Sqlite => {
                let dir = expand_home(&config.storage.data_dir);
                info!("Opening SQLite index table in {:?}", dir);
                Arc::new(SqliteTable::open(&dir)?)
            }
            Backend::Memory => {
                info!("Using in-memory index table");
                Arc::new(MemoryTable::new())
            }
        };
        Ok(Self::with_table(table, config))
    }

    /// Engine over an existing table
    pub fn with_table(table: Arc<dyn IndexTable>, config: &Config) -> Self {
        let bucket_width_ms = config.index.bucket_width_ms.max(1);
        let writer = IndexWriter::new(
            Arc::clone(&table),
            bucket_width_ms,
            config.index.recent_series_capacity,
        );
        let cost_store = Arc::new(LruCostStore::new(config.cache.cost_cache_capacity));
        let cost_cache = DateFilterCostCache::new(cost_store.clone());

        Self {
            table,
            writer: Arc::new(writer),
            cost_store,
            cost_cache,
            pool: KeyBufferPool::default(),
            search: config.search.clone(),
            bucket_width_ms,
        }
    }

    /// Index `rows` for `tenant`; returns the number of rows indexed
    pub async fn ingest(&self, tenant: Tenant, rows: Vec<Row>) -> EngineResult<usize> {
        let writer = Arc::clone(&self.writer);
        let indexed =
            tokio::task::spawn_blocking(move || writer.index_rows(tenant, &rows)).await??;
        debug!(tenant = %tenant, rows = indexed, "Ingested rows");
        Ok(indexed)
    }

    /// Parse importer lines and index the valid ones
    pub async fn import(
        &self,
        tenant: Tenant,
        input: &str,
        default_timestamp: u64,
    ) -> EngineResult<ImportSummary> {
        let parsed = parse_rows(input, default_timestamp);
        let invalid_lines = parsed.invalid_lines;
        let rows_indexed = self.ingest(tenant, parsed.rows).await?;
        info!(
            tenant = %tenant,
            rows = rows_indexed,
            invalid = invalid_lines,
            "Import finished"
        );
        Ok(ImportSummary {
            rows_indexed,
            invalid_lines,
        })
    }

    /// Series of `tenant` matching every matcher with postings in `range`
    ///
    /// Each call runs its own [`IndexSearch`] with a fresh deadline.
    pub async fn search(
        &self,
        tenant: Tenant,
        matchers: &[LabelMatcher],
        range: TimeRange,
        resolve_labels: bool,
    ) -> EngineResult<SearchOutcome> {
        let tfs = TagFilterSet::from_matchers(tenant, matchers)?;
        let engine = self.clone();
        let outcome =
            tokio::task::spawn_blocking(move || engine.search_blocking(&tfs, range, resolve_labels))
                .await??;
        Ok(outcome)
    }

    /// Cost cache hit/miss counters
    pub fn cost_cache_stats(&self) -> CostCacheStats {
        self.cost_store.stats()
    }

    pub fn bucket_width_ms(&self) -> u64 {
        self.bucket_width_ms
    }

    fn search_blocking(
        &self,
        tfs: &TagFilterSet,
        range: TimeRange,
        resolve_labels: bool,
    ) -> EngineResult<SearchOutcome> {
        let deadline = SearchDeadline::after(self.search.deadline());
        let mut search = IndexSearch::new(
            self.table.as_ref(),
            &self.cost_cache,
            self.pool.clone(),
            deadline,
        )
        .with_bucket_width(self.bucket_width_ms)
        .with_check_interval(self.search.deadline_check_interval);

        let mut ids = search.range_query(tfs, range.start, range.end, self.search.scan_limit())?;
        let truncated = ids.len() > self.search.max_series;
        ids.truncate(self.search.max_series);
        let ids = ids.into_vec();

        let series = if resolve_labels {
            let mut entries = Vec::with_capacity(ids.len());
            for &id in &ids {
                if let Some(labels) = search.series_labels(tfs.tenant(), id)? {
                    entries.push(SeriesEntry { id, labels });
                }
            }
            Some(entries)
        } else {
            None
        };

        info!(
            tenant = %tfs.tenant(),
            filters = %tfs,
            matched = ids.len(),
            truncated,
            "Search finished"
        );

        Ok(SearchOutcome {
            ids,
            truncated,
            series,
            evaluations: search.evaluations().to_vec(),
        })
    }
}

impl std::fmt::Debug for IndexEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexEngine")
            .field("bucket_width_ms", &self.bucket_width_ms)
            .field("search", &self.search)
            .finish()
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Label;

    const DAY: u64 = 86_400_000;
    const T0: u64 = 1_700_006_400_000;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.storage.backend = Backend::Memory;
        config
    }

    fn row(metric: &str, labels: &[(&str, &str)], ts: u64) -> Row {
        let mut row = Row::new(metric, "line").timestamp(ts);
        for (k, v) in labels {
            row = row.label(*k, *v);
        }
        row
    }

    fn range() -> TimeRange {
        TimeRange::try_new(T0, T0 + DAY).unwrap()
    }

    async fn seeded_engine(tenant: Tenant) -> IndexEngine {
        let engine = IndexEngine::open(&memory_config()).unwrap();
        let rows = vec![
            row("http", &[("job", "api"), ("code", "200")], T0),
            row("http", &[("job", "api"), ("code", "500")], T0),
            row("http", &[("job", "web"), ("code", "200")], T0),
            row("cpu", &[("host", "a")], T0),
        ];
        assert_eq!(engine.ingest(tenant, rows).await.unwrap(), 4);
        engine
    }

    #[tokio::test]
    async fn test_ingest_and_search() {
        let tenant = Tenant::new(1, 0);
        let engine = seeded_engine(tenant).await;

        let matchers = vec![
            LabelMatcher::metric("http"),
            LabelMatcher::equal("job", "api"),
            LabelMatcher::not_equal("code", "500"),
        ];
        let outcome = engine.search(tenant, &matchers, range(), true).await.unwrap();
        assert_eq!(outcome.ids.len(), 1);
        assert!(!outcome.truncated);

        let series = outcome.series.unwrap();
        assert_eq!(series.len(), 1);
        assert!(series[0].labels.contains(&Label::new("code", "200")));
        assert!(series[0].labels.contains(&Label::new("job", "api")));
        assert!(!outcome.evaluations.is_empty());
    }

    #[tokio::test]
    async fn test_search_without_labels() {
        let tenant = Tenant::new(1, 0);
        let engine = seeded_engine(tenant).await;

        let outcome = engine
            .search(tenant, &[LabelMatcher::metric("http")], range(), false)
            .await
            .unwrap();
        assert_eq!(outcome.ids.len(), 3);
        assert!(outcome.series.is_none());
    }

    #[tokio::test]
    async fn test_search_other_tenant_is_empty() {
        let engine = seeded_engine(Tenant::new(1, 0)).await;
        let outcome = engine
            .search(Tenant::new(2, 0), &[LabelMatcher::metric("http")], range(), false)
            .await
            .unwrap();
        assert!(outcome.ids.is_empty());
    }

    #[tokio::test]
    async fn test_max_series_truncates() {
        let tenant = Tenant::new(1, 0);
        let mut config = memory_config();
        config.search.max_series = 2;
        let engine = IndexEngine::open(&config).unwrap();
        let rows: Vec<Row> = (0..5)
            .map(|i| row("log", &[("pod", &format!("p{}", i))], T0))
            .collect();
        engine.ingest(tenant, rows).await.unwrap();

        let outcome = engine
            .search(tenant, &[LabelMatcher::metric("log")], range(), false)
            .await
            .unwrap();
        assert_eq!(outcome.ids.len(), 2);
        assert!(outcome.truncated);
        assert!(outcome.ids[0] < outcome.ids[1]);
    }

    #[tokio::test]
    async fn test_invalid_filter_set_rejected() {
        let tenant = Tenant::new(1, 0);
        let engine = seeded_engine(tenant).await;

        let err = engine
            .search(tenant, &[LabelMatcher::not_equal("job", "api")], range(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Search(SearchError::InvalidFilterSet(_))
        ));
    }

    #[tokio::test]
    async fn test_import_counts_invalid_lines() {
        let tenant = Tenant::new(3, 4);
        let engine = IndexEngine::open(&memory_config()).unwrap();

        let input = format!(
            "app{{level=\"info\"}} \"started\" {ts}\nnot a valid line\napp{{level=\"warn\"}} \"slow disk\" {ts}\n",
            ts = T0
        );
        let summary = engine.import(tenant, &input, T0).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                rows_indexed: 2,
                invalid_lines: 1
            }
        );

        let outcome = engine
            .search(
                tenant,
                &[LabelMatcher::metric("app"), LabelMatcher::regex("level", "warn|error")],
                range(),
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.ids.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_searches_share_cost_cache() {
        let tenant = Tenant::new(1, 0);
        let engine = seeded_engine(tenant).await;

        // Warm the cost cache so concurrent searches read recorded counts
        let warm = vec![LabelMatcher::metric("http"), LabelMatcher::equal("job", "api")];
        engine.search(tenant, &warm, range(), false).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let job = if i % 2 == 0 { "api" } else { "web" };
                let matchers = vec![LabelMatcher::metric("http"), LabelMatcher::equal("job", job)];
                let outcome = engine.search(tenant, &matchers, range(), false).await.unwrap();
                (job, outcome.ids.len())
            }));
        }

        for handle in handles {
            let (job, n) = handle.await.unwrap();
            let expected = if job == "api" { 2 } else { 1 };
            assert_eq!(n, expected);
        }

        let stats = engine.cost_cache_stats();
        assert!(stats.size > 0);
        assert!(stats.hit_count > 0);
    }

    #[tokio::test]
    async fn test_sqlite_backend_persists() {
        let dir = tempfile::tempdir().unwrap();
        let tenant = Tenant::new(1, 0);
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_string_lossy().to_string();

        {
            let engine = IndexEngine::open(&config).unwrap();
            engine
                .ingest(tenant, vec![row("disk", &[("dev", "sda")], T0)])
                .await
                .unwrap();
        }

        let engine = IndexEngine::open(&config).unwrap();
        let outcome = engine
            .search(tenant, &[LabelMatcher::equal("dev", "sda")], range(), true)
            .await
            .unwrap();
        assert_eq!(outcome.ids.len(), 1);
        assert_eq!(outcome.series.unwrap()[0].labels[0], Label::new("__name__", "disk"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/lib/x"), PathBuf::from("/var/lib/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/data"), home.join("data"));
        }
    }
}
