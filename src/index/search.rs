//! Index search
//!
//! Resolves a [`TagFilterSet`] and a time range into the set of matching
//! series identifiers.
//!
//! # Architecture
//!
//! ```text
//! range_query(tfs, min_ts, max_ts, limit)
//!   │
//!   ├─ 1. cost = DateFilterCostCache::estimated_cost(date(min_ts), tf)
//!   │     sort by (cost, signature)
//!   ├─ 2. seed = first positive filter, evaluated over the whole range
//!   ├─ 3. fold the rest in order:
//!   │       positive → evaluate restricted to the accumulator, intersect
//!   │       negative → evaluate unrestricted, subtract
//!   │     stop as soon as the accumulator is empty
//!   └─ 4. record match counts of unrestricted evaluations
//!
//! evaluate(tf):
//!   for suffix in tf.or_suffixes:
//!     seek(prefix ‖ suffix ‖ 0x01 ‖ bucket(min_ts))
//!     next() until item > prefix ‖ suffix ‖ 0x01 ‖ max_ts, limit, or exhaustion
//! ```
//!
//! Every cursor step ticks a [`PaceLimiter`], so a slow scan ends with
//! `DeadlineExceeded` instead of running unbounded.

use crate::index::buffer_pool::KeyBufferPool;
use crate::index::cost_cache::DateFilterCostCache;
use crate::index::deadline::{PaceLimiter, SearchDeadline, DEFAULT_CHECK_INTERVAL};
use crate::index::error::{SearchError, SearchResult};
use crate::index::id_set::IdentifierSet;
use crate::index::tag_filter::{TagFilter, TagFilterSet};
use crate::index::writer::decode_label_set;
use crate::ingest::Label;
use crate::storage::keys::{
    bucket_start, marshal_id_prefix, marshal_u64, unmarshal_until, MSEC_PER_DAY, TAG_SEPARATOR,
};
use crate::storage::{first_item_with_prefix, IndexTable, PostingParser, StorageError, Tenant};
use tracing::debug;

/// Record of one filter evaluation within a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterEvaluation {
    /// Filter in selector syntax
    pub filter: String,
    pub is_negative: bool,
    /// Whether the scan was restricted to the accumulator
    pub restricted: bool,
    /// Identifiers the evaluation returned
    pub matched: usize,
    /// Accumulator size after folding this evaluation in
    pub accumulator: usize,
}

/// One search over an index table
///
/// Not shared between concurrent searches; every search builds its own
/// `IndexSearch` with its own deadline.
pub struct IndexSearch<'a> {
    table: &'a dyn IndexTable,
    cost_cache: &'a DateFilterCostCache,
    pool: KeyBufferPool,
    deadline: SearchDeadline,
    bucket_width_ms: u64,
    check_interval: u32,
    parser: PostingParser,
    evaluations: Vec<FilterEvaluation>,
}

impl<'a> IndexSearch<'a> {
    pub fn new(
        table: &'a dyn IndexTable,
        cost_cache: &'a DateFilterCostCache,
        pool: KeyBufferPool,
        deadline: SearchDeadline,
    ) -> Self {
        Self {
            table,
            cost_cache,
            pool,
            deadline,
            bucket_width_ms: MSEC_PER_DAY,
            check_interval: DEFAULT_CHECK_INTERVAL,
            parser: PostingParser::new(),
            evaluations: Vec::new(),
        }
    }

    /// Width of the date buckets postings were written with
    pub fn with_bucket_width(mut self, bucket_width_ms: u64) -> Self {
        self.bucket_width_ms = bucket_width_ms.max(1);
        self
    }

    /// Cursor steps between deadline checks
    pub fn with_check_interval(mut self, check_interval: u32) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Filter evaluations performed by the last [`IndexSearch::range_query`],
    /// in evaluation order
    pub fn evaluations(&self) -> &[FilterEvaluation] {
        &self.evaluations
    }

    /// Identifiers of series matching every filter of `tfs` with postings in
    /// `[min_ts, max_ts)`
    ///
    /// `limit` caps the identifiers collected per filter evaluation. No
    /// partial result is returned on error.
    pub fn range_query(
        &mut self,
        tfs: &TagFilterSet,
        min_ts: u64,
        max_ts: u64,
        limit: usize,
    ) -> SearchResult<IdentifierSet> {
        self.evaluations.clear();
        tfs.validate()?;
        for tf in tfs.filters() {
            if !tf.prefix().starts_with(tfs.common_prefix()) {
                return Err(SearchError::InternalInvariant(format!(
                    "prefix of filter {} lies outside the tenant prefix of its set",
                    tf
                )));
            }
        }
        if min_ts > max_ts {
            debug!(min_ts, max_ts, "Empty time range");
            return Ok(IdentifierSet::new());
        }

        let tenant = tfs.tenant();
        let date = min_ts / self.bucket_width_ms;

        let mut planned: Vec<(&TagFilter, u64)> = tfs
            .filters()
            .iter()
            .map(|tf| (tf, self.cost_cache.estimated_cost(date, tenant, tf)))
            .collect();
        planned.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp_signature(b.0)));
        debug!(
            tenant = %tenant,
            date,
            plan = ?planned.iter().map(|(tf, cost)| format!("{}:{}", tf, cost)).collect::<Vec<_>>(),
            "Planned filter order"
        );

        let seed_pos = planned
            .iter()
            .position(|(tf, _)| !tf.is_negative())
            .ok_or_else(|| {
                SearchError::InvalidFilterSet(format!("{} has no positive filter", tfs))
            })?;

        let seed = planned[seed_pos].0;
        let mut acc = self.evaluate_unrestricted(seed, date, tenant, min_ts, max_ts, limit)?;
        self.trace(seed, false, acc.len(), acc.len());
        if acc.is_empty() {
            debug!(filter = %seed, "Seed filter matched nothing");
            return Ok(acc);
        }

        let remaining = planned[..seed_pos]
            .iter()
            .chain(planned[seed_pos + 1..].iter());
        for &(tf, _) in remaining {
            if tf.is_negative() {
                let matched =
                    self.evaluate_unrestricted(tf, date, tenant, min_ts, max_ts, limit)?;
                acc.subtract(&matched);
                self.trace(tf, false, matched.len(), acc.len());
            } else {
                let matched = self.evaluate(tf, min_ts, max_ts, Some(&acc), limit)?;
                acc.intersect(&matched);
                self.trace(tf, true, matched.len(), acc.len());
            }
            if acc.is_empty() {
                debug!(filter = %tf, "Accumulator empty; skipping remaining filters");
                return Ok(acc);
            }
        }

        debug!(tenant = %tenant, matched = acc.len(), "Range query finished");
        Ok(acc)
    }

    /// Label set stored for `id`, if the series exists
    pub fn series_labels(&self, tenant: Tenant, id: u64) -> SearchResult<Option<Vec<Label>>> {
        let mut prefix = self.pool.get();
        marshal_id_prefix(&mut prefix, tenant, id);
        let item = match first_item_with_prefix(self.table, &prefix)? {
            Some(item) => item,
            None => return Ok(None),
        };
        Ok(Some(decode_label_set(&item[prefix.len()..])?))
    }

    fn trace(&mut self, tf: &TagFilter, restricted: bool, matched: usize, accumulator: usize) {
        self.evaluations.push(FilterEvaluation {
            filter: tf.to_string(),
            is_negative: tf.is_negative(),
            restricted,
            matched,
            accumulator,
        });
    }

    /// Evaluate over the whole range and record the match count for `date`
    ///
    /// A failed evaluation records `limit` so the filter sorts last next time.
    fn evaluate_unrestricted(
        &mut self,
        tf: &TagFilter,
        date: u64,
        tenant: Tenant,
        min_ts: u64,
        max_ts: u64,
        limit: usize,
    ) -> SearchResult<IdentifierSet> {
        let result = self.evaluate(tf, min_ts, max_ts, None, limit);
        let count = match &result {
            Ok(ids) => ids.len() as u64,
            Err(_) => limit as u64,
        };
        self.cost_cache.record(date, tenant, tf, count);
        result
    }

    /// Union of the postings of every or-suffix of `tf` in range
    ///
    /// With `restrict`, only identifiers present in it are collected.
    fn evaluate(
        &mut self,
        tf: &TagFilter,
        min_ts: u64,
        max_ts: u64,
        restrict: Option<&IdentifierSet>,
        limit: usize,
    ) -> SearchResult<IdentifierSet> {
        if tf.or_suffixes().is_empty() {
            return Err(SearchError::UnsupportedFilterShape(format!(
                "filter {} has no or-suffixes",
                tf
            )));
        }

        let mut out = IdentifierSet::new();
        if tf.is_full_scan() {
            self.scan_values(tf, min_ts, max_ts, restrict, limit, &mut out)?;
            return Ok(out);
        }

        let min_bucket = bucket_start(min_ts, self.bucket_width_ms);
        let mut start = self.pool.get();
        let mut end = self.pool.get();
        for suffix in tf.or_suffixes() {
            start.clear();
            start.extend_from_slice(tf.prefix());
            start.extend_from_slice(suffix);
            start.push(TAG_SEPARATOR);
            end.clear();
            end.extend_from_slice(start.as_slice());
            marshal_u64(&mut start, min_bucket);
            marshal_u64(&mut end, max_ts);

            self.scan_range(tf, &start, &end, restrict, limit, &mut out)?;
            if is_saturated(&out, restrict, limit) {
                break;
            }
        }
        Ok(out)
    }

    /// Collect identifiers of items in `[start, end]`
    fn scan_range(
        &mut self,
        tf: &TagFilter,
        start: &[u8],
        end: &[u8],
        restrict: Option<&IdentifierSet>,
        limit: usize,
        out: &mut IdentifierSet,
    ) -> SearchResult<()> {
        let deadline = self.deadline;
        let mut pace = PaceLimiter::new(&deadline, self.check_interval);
        let table = self.table;
        let tail_offset = start.len() - 8;

        let mut cursor = table.cursor();
        cursor.seek(start);
        while out.len() < limit && cursor.next() {
            pace.tick()?;
            let item = cursor.current_key();
            if item > end {
                return Ok(());
            }
            let (_, ids) = self
                .parser
                .parse_bucket_and_ids(&item[tail_offset..])
                .map_err(|e| cursor_error(tf, "decoding posting", e))?;
            if add_ids(out, ids, restrict, limit) {
                return Ok(());
            }
        }

        match cursor.take_error() {
            Some(e) => Err(cursor_error(tf, "scanning postings", e)),
            None => Ok(()),
        }
    }

    /// Visit every value under the filter prefix, keeping items whose value
    /// matches the filter regex (or fails it, for inverted filters) and whose
    /// bucket lies in range
    fn scan_values(
        &mut self,
        tf: &TagFilter,
        min_ts: u64,
        max_ts: u64,
        restrict: Option<&IdentifierSet>,
        limit: usize,
        out: &mut IdentifierSet,
    ) -> SearchResult<()> {
        let deadline = self.deadline;
        let mut pace = PaceLimiter::new(&deadline, self.check_interval);
        let table = self.table;
        let min_bucket = bucket_start(min_ts, self.bucket_width_ms);
        let mut value = self.pool.get();

        let mut cursor = table.cursor();
        cursor.seek(tf.prefix());
        while out.len() < limit && cursor.next() {
            pace.tick()?;
            let item = cursor.current_key();
            if !item.starts_with(tf.prefix()) {
                break;
            }

            value.clear();
            let tail = unmarshal_until(&mut value, &item[tf.key_prefix_len()..], TAG_SEPARATOR)
                .map_err(|e| cursor_error(tf, "decoding tag value", e))?;
            let (bucket, ids) = self
                .parser
                .parse_bucket_and_ids(tail)
                .map_err(|e| cursor_error(tf, "decoding posting", e))?;

            if bucket < min_bucket || bucket >= max_ts {
                continue;
            }
            if let Some(re) = tf.value_matcher() {
                if re.is_match(value.as_slice()) == tf.is_inverted() {
                    continue;
                }
            }
            if add_ids(out, ids, restrict, limit) {
                break;
            }
        }

        match cursor.take_error() {
            Some(e) => Err(cursor_error(tf, "scanning tag values", e)),
            None => Ok(()),
        }
    }
}

fn cursor_error(tf: &TagFilter, action: &str, source: StorageError) -> SearchError {
    SearchError::CursorIo {
        context: format!("{} for filter {}", action, tf),
        source,
    }
}

fn is_saturated(out: &IdentifierSet, restrict: Option<&IdentifierSet>, limit: usize) -> bool {
    out.len() >= limit || restrict.map_or(false, |r| out.len() >= r.len())
}

/// Add `ids` to `out`; returns true once `out` cannot grow any further
fn add_ids(
    out: &mut IdentifierSet,
    ids: &[u64],
    restrict: Option<&IdentifierSet>,
    limit: usize,
) -> bool {
    match restrict {
        Some(filter) => {
            for &id in ids {
                if filter.has(id) {
                    out.add(id);
                }
            }
        }
        None => {
            let remain = limit.saturating_sub(out.len());
            if ids.len() <= remain {
                out.add_multi(ids);
            } else {
                for &id in ids {
                    out.add(id);
                    if out.len() >= limit {
                        break;
                    }
                }
            }
        }
    }
    is_saturated(out, restrict, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::writer::IndexWriter;
    use crate::ingest::Row;
    use crate::storage::keys::posting_item;
    use crate::storage::{KeyRangeCursor, MemoryTable, StorageResult, METRIC_NAME_LABEL};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const DAY: u64 = MSEC_PER_DAY;
    const LIMIT: usize = 1_000_000;

    fn tenant() -> Tenant {
        Tenant::new(1, 1)
    }

    fn post(table: &MemoryTable, name: &str, value: &str, bucket: u64, ids: &[u64]) {
        table
            .add_items(&[posting_item(tenant(), name.as_bytes(), value.as_bytes(), bucket, ids)])
            .unwrap();
    }

    /// `a="x"` → {1,2,3}, `b="y"` → {2,3,4}, `c="z"` → {3}, all on day 0
    fn scenario_table() -> MemoryTable {
        let table = MemoryTable::new();
        post(&table, "a", "x", 0, &[1, 2, 3]);
        post(&table, "b", "y", 0, &[2, 3, 4]);
        post(&table, "c", "z", 0, &[3]);
        table
    }

    fn filters(list: &[(&str, &str, bool, bool)]) -> TagFilterSet {
        let mut tfs = TagFilterSet::new(tenant());
        for &(name, value, negative, regex) in list {
            tfs.add(name, value, negative, regex).unwrap();
        }
        tfs
    }

    fn search<'a>(table: &'a dyn IndexTable, cache: &'a DateFilterCostCache) -> IndexSearch<'a> {
        IndexSearch::new(
            table,
            cache,
            KeyBufferPool::default(),
            SearchDeadline::after(Duration::from_secs(30)),
        )
    }

    fn query(table: &dyn IndexTable, tfs: &TagFilterSet, min_ts: u64, max_ts: u64) -> Vec<u64> {
        let cache = DateFilterCostCache::with_capacity(64);
        search(table, &cache)
            .range_query(tfs, min_ts, max_ts, LIMIT)
            .unwrap()
            .into_vec()
    }

    #[test]
    fn test_two_positive_filters() {
        let table = scenario_table();
        let tfs = filters(&[("a", "x", false, false), ("b", "y", false, false)]);
        assert_eq!(query(&table, &tfs, 0, DAY), vec![2, 3]);
    }

    #[test]
    fn test_positive_and_negative_filter() {
        let table = scenario_table();
        let tfs = filters(&[("a", "x", false, false), ("c", "z", true, false)]);
        assert_eq!(query(&table, &tfs, 0, DAY), vec![1, 2]);

        // A negative filter planned ahead of the seed is folded in after it
        let tfs = filters(&[("a", "x", false, false), ("c", "z", true, false)]);
        let cache = DateFilterCostCache::with_capacity(16);
        cache.record(0, tenant(), &tfs.filters()[1], 0);
        let mut s = search(&table, &cache);
        assert_eq!(s.range_query(&tfs, 0, DAY, LIMIT).unwrap().into_vec(), vec![1, 2]);
        assert_eq!(s.evaluations()[0].filter, r#"a="x""#);
        assert!(s.evaluations()[1].is_negative);
    }

    #[test]
    fn test_or_suffixes_union_without_duplicates() {
        let table = scenario_table();
        post(&table, "a", "w", 0, &[3, 9]);
        let tfs = filters(&[("a", "x|w|x", false, true)]);
        assert_eq!(query(&table, &tfs, 0, DAY), vec![1, 2, 3, 9]);
    }

    #[test]
    fn test_time_range_selects_buckets() {
        let table = MemoryTable::new();
        post(&table, "a", "x", 0, &[1]);
        post(&table, "a", "x", 2 * DAY, &[2]);
        let tfs = filters(&[("a", "x", false, false)]);

        assert_eq!(query(&table, &tfs, 0, 3 * DAY), vec![1, 2]);
        assert_eq!(query(&table, &tfs, DAY, 2 * DAY), Vec::<u64>::new());
        assert_eq!(query(&table, &tfs, 2 * DAY + 5, 3 * DAY), vec![2]);
        // Point ranges are valid
        assert_eq!(query(&table, &tfs, 2 * DAY + 5, 2 * DAY + 5), vec![2]);
        assert_eq!(query(&table, &tfs, 2 * DAY, 2 * DAY), Vec::<u64>::new());
        // Inverted ranges are empty
        assert_eq!(query(&table, &tfs, 3 * DAY, DAY), Vec::<u64>::new());
    }

    #[test]
    fn test_tenants_are_isolated() {
        let table = scenario_table();
        table
            .add_items(&[posting_item(Tenant::new(2, 1), b"a", b"x", 0, &[100])])
            .unwrap();
        let tfs = filters(&[("a", "x", false, false)]);
        assert_eq!(query(&table, &tfs, 0, DAY), vec![1, 2, 3]);
    }

    #[test]
    fn test_wildcard_filters() {
        let table = MemoryTable::new();
        post(&table, "path", "/v1/users", 0, &[1]);
        post(&table, "path", "/v1/orders", 0, &[2]);
        post(&table, "path", "/v2/users", 0, &[3]);
        post(&table, "path", "/v1/users", 5 * DAY, &[4]);
        post(&table, "pathx", "/v1/users", 0, &[5]);

        let tfs = filters(&[("path", "/v1/.*", false, true)]);
        assert_eq!(query(&table, &tfs, 0, DAY), vec![1, 2]);

        let tfs = filters(&[("path", ".*users", false, true)]);
        assert_eq!(query(&table, &tfs, 0, DAY), vec![1, 3]);

        let tfs = filters(&[("path", ".+", false, true), ("path", "/v2/.*", true, true)]);
        assert_eq!(query(&table, &tfs, 0, DAY), vec![1, 2]);

        // name="" selects series without the label
        let tfs = filters(&[("pathx", "/v1/users", false, false), ("path", "", false, false)]);
        assert_eq!(query(&table, &tfs, 0, DAY), vec![5]);
    }

    #[test]
    fn test_regex_matching_empty_includes_missing_label() {
        // 1: http{job="api"}, 2: http{}, 3: http{job="web"}
        let table = MemoryTable::new();
        post(&table, METRIC_NAME_LABEL, "http", 0, &[1, 2, 3]);
        post(&table, "job", "api", 0, &[1]);
        post(&table, "job", "web", 0, &[3]);

        let with_job = |value: &str, negative: bool| {
            filters(&[(METRIC_NAME_LABEL, "http", false, false), ("job", value, negative, true)])
        };

        assert_eq!(query(&table, &with_job(".*", false), 0, DAY), vec![1, 2, 3]);
        assert_eq!(query(&table, &with_job("api|", false), 0, DAY), vec![1, 2]);
        assert_eq!(query(&table, &with_job("api|", true), 0, DAY), vec![3]);
        assert!(query(&table, &with_job(".*", true), 0, DAY).is_empty());

        // Same answers as the `name=""` form
        let missing = filters(&[(METRIC_NAME_LABEL, "http", false, false), ("job", "", false, false)]);
        assert_eq!(query(&table, &missing, 0, DAY), vec![2]);
        assert_eq!(query(&table, &with_job("(api)?", false), 0, DAY), vec![1, 2]);
    }

    #[test]
    fn test_limit_truncation() {
        let table = MemoryTable::new();
        post(&table, "a", "x", 0, &[1, 2, 3]);
        post(&table, "a", "x", DAY, &[4, 5, 6, 7, 8, 9]);
        post(&table, "a", "x", 2 * DAY, &[10, 11, 12, 13, 14, 15]);
        let tfs = filters(&[("a", "x", false, false)]);
        let cache = DateFilterCostCache::with_capacity(16);

        let limited = search(&table, &cache)
            .range_query(&tfs, 0, 3 * DAY, 10)
            .unwrap();
        assert_eq!(limited.len(), 10);

        let full = search(&table, &cache)
            .range_query(&tfs, 0, 3 * DAY, 15)
            .unwrap();
        assert_eq!(full.len(), 15);
        assert!(limited.iter().all(|id| full.has(id)));

        let wildcard = filters(&[("a", ".+", false, true)]);
        let limited = search(&table, &cache)
            .range_query(&wildcard, 0, 3 * DAY, 10)
            .unwrap();
        assert_eq!(limited.len(), 10);
    }

    #[test]
    fn test_short_circuit_skips_remaining_filters() {
        let table = scenario_table();
        let cache = DateFilterCostCache::with_capacity(16);

        // `0="missing"` sorts first on a cold cache and seeds an empty set
        let tfs = filters(&[
            ("a", "x", false, false),
            ("0", "missing", false, false),
            ("b", "y", false, false),
        ]);
        let mut s = search(&table, &cache);
        assert!(s.range_query(&tfs, 0, DAY, LIMIT).unwrap().is_empty());
        assert_eq!(s.evaluations().len(), 1);
        assert_eq!(s.evaluations()[0].filter, r#"0="missing""#);

        // Emptied by a fold step; the negative filter planned last never runs
        let tfs = filters(&[
            ("a", "x", false, false),
            ("b", "y", false, false),
            ("c", "z", true, false),
            ("d", "never", false, false),
        ]);
        let cache = DateFilterCostCache::with_capacity(16);
        let mut s = search(&table, &cache);
        assert!(s.range_query(&tfs, 0, DAY, LIMIT).unwrap().is_empty());
        assert_eq!(s.evaluations().len(), 3);
        assert!(s.evaluations().iter().all(|e| !e.is_negative));

        let tfs = filters(&[
            ("a", "x", false, false),
            ("b", "nothing", false, false),
            ("c", "z", true, false),
        ]);
        let cache = DateFilterCostCache::with_capacity(16);
        let mut s = search(&table, &cache);
        assert!(s.range_query(&tfs, 0, DAY, LIMIT).unwrap().is_empty());
        assert_eq!(s.evaluations().len(), 2);
    }

    #[test]
    fn test_cost_feedback_reorders_filters() {
        let table = MemoryTable::new();
        let big: Vec<u64> = (1..=1000).collect();
        post(&table, "a_big", "x", 0, &big);
        post(&table, "z_small", "y", 0, &[7, 8]);

        let cache = DateFilterCostCache::with_capacity(64);
        let tfs = filters(&[("a_big", "x", false, false), ("z_small", "y", false, false)]);

        // Cold cache: equal static costs, signature order puts a_big first
        let mut cold = search(&table, &cache);
        let cold_ids = cold.range_query(&tfs, 0, DAY, LIMIT).unwrap();
        assert_eq!(cold.evaluations()[0].filter, r#"a_big="x""#);
        assert!(cold.evaluations()[1].restricted);

        // Only the unrestricted seed evaluation was recorded
        assert_eq!(cache.cached_count(0, tenant(), &tfs.filters()[0]), Some(1000));
        assert_eq!(cache.cached_count(0, tenant(), &tfs.filters()[1]), None);

        // Warm cache: the cheap filter goes first, same result
        let mut warm = search(&table, &cache);
        let warm_ids = warm.range_query(&tfs, 0, DAY, LIMIT).unwrap();
        assert_eq!(warm.evaluations()[0].filter, r#"z_small="y""#);
        assert_eq!(cold_ids, warm_ids);
        assert_eq!(warm_ids.into_vec(), vec![7, 8]);
    }

    #[test]
    fn test_recorded_counts_override_textual_order() {
        let table = scenario_table();
        let cache = DateFilterCostCache::with_capacity(64);
        let tfs = filters(&[("a", "x", false, false), ("b", "y", false, false)]);
        cache.record(0, tenant(), &tfs.filters()[0], 1_000_000);
        cache.record(0, tenant(), &tfs.filters()[1], 2);

        let mut s = search(&table, &cache);
        let ids = s.range_query(&tfs, 0, DAY, LIMIT).unwrap();
        assert_eq!(s.evaluations()[0].filter, r#"b="y""#);
        assert_eq!(ids.into_vec(), vec![2, 3]);
    }

    #[test]
    fn test_accumulator_never_grows() {
        let table = MemoryTable::new();
        post(&table, "a", "x", 0, &(1..=50).collect::<Vec<_>>());
        post(&table, "b", "y", 0, &(20..=80).collect::<Vec<_>>());
        post(&table, "c", "z", 0, &(1..=100).step_by(3).collect::<Vec<_>>());
        post(&table, "d", "w", 0, &(30..=40).collect::<Vec<_>>());

        let tfs = filters(&[
            ("a", "x", false, false),
            ("b", "y", false, false),
            ("c", "z", true, false),
            ("d", "w", true, false),
        ]);
        let cache = DateFilterCostCache::with_capacity(64);
        let mut s = search(&table, &cache);
        let ids = s.range_query(&tfs, 0, DAY, LIMIT).unwrap();

        let sizes: Vec<usize> = s.evaluations().iter().map(|e| e.accumulator).collect();
        assert_eq!(sizes.len(), 4);
        assert!(sizes.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(*sizes.last().unwrap(), ids.len());
        assert!(ids.iter().all(|id| (20..=50).contains(&id) && id % 3 != 1 && !(30..=40).contains(&id)));
    }

    #[test]
    fn test_restricted_matches_unrestricted_intersection() {
        let table = scenario_table();
        let cache = DateFilterCostCache::with_capacity(16);
        let tfs = filters(&[("b", "y", false, false)]);
        let tf = &tfs.filters()[0];
        let acc: IdentifierSet = [1, 2, 3].into_iter().collect();

        let mut s = search(&table, &cache);
        let restricted = s.evaluate(tf, 0, DAY, Some(&acc), LIMIT).unwrap();
        let mut unrestricted = s.evaluate(tf, 0, DAY, None, LIMIT).unwrap();
        unrestricted.intersect(&acc);
        assert_eq!(restricted, unrestricted);
    }

    #[test]
    fn test_invalid_filter_sets_rejected() {
        let table = scenario_table();
        let cache = DateFilterCostCache::with_capacity(16);
        let mut s = search(&table, &cache);

        let empty = TagFilterSet::new(tenant());
        assert!(matches!(
            s.range_query(&empty, 0, DAY, LIMIT),
            Err(SearchError::InvalidFilterSet(_))
        ));

        let negative_only = filters(&[("a", "x", true, false)]);
        assert!(matches!(
            s.range_query(&negative_only, 0, DAY, LIMIT),
            Err(SearchError::InvalidFilterSet(_))
        ));
    }

    /// Cursor whose every step blocks for `delay`
    struct SlowTable {
        delay: Duration,
    }

    struct SlowCursor {
        delay: Duration,
        key: Vec<u8>,
    }

    impl IndexTable for SlowTable {
        fn add_items(&self, _items: &[Vec<u8>]) -> StorageResult<()> {
            Ok(())
        }

        fn cursor(&self) -> Box<dyn KeyRangeCursor + '_> {
            Box::new(SlowCursor {
                delay: self.delay,
                key: Vec::new(),
            })
        }

        fn item_count(&self) -> StorageResult<u64> {
            Ok(0)
        }
    }

    impl KeyRangeCursor for SlowCursor {
        fn seek(&mut self, key: &[u8]) {
            self.key = key.to_vec();
            self.key.extend_from_slice(&1u64.to_be_bytes());
        }

        fn next(&mut self) -> bool {
            std::thread::sleep(self.delay);
            true
        }

        fn current_key(&self) -> &[u8] {
            &self.key
        }

        fn take_error(&mut self) -> Option<StorageError> {
            None
        }
    }

    #[test]
    fn test_deadline_stops_blocked_scan() {
        let table = SlowTable {
            delay: Duration::from_millis(20),
        };
        let cache = DateFilterCostCache::with_capacity(16);
        let tfs = filters(&[("a", "x", false, false)]);
        let started = Instant::now();

        let mut s = IndexSearch::new(
            &table,
            &cache,
            KeyBufferPool::default(),
            SearchDeadline::after(Duration::from_millis(10)),
        )
        .with_check_interval(1);
        let err = s.range_query(&tfs, 0, DAY, LIMIT).unwrap_err();

        assert!(err.is_deadline());
        assert!(started.elapsed() < Duration::from_secs(5));
        // Failed evaluations are recorded with the punitive limit
        assert_eq!(
            cache.cached_count(0, tenant(), &tfs.filters()[0]),
            Some(LIMIT as u64)
        );
    }

    struct BrokenTable;

    struct BrokenCursor {
        failed: bool,
    }

    impl IndexTable for BrokenTable {
        fn add_items(&self, _items: &[Vec<u8>]) -> StorageResult<()> {
            Ok(())
        }

        fn cursor(&self) -> Box<dyn KeyRangeCursor + '_> {
            Box::new(BrokenCursor { failed: false })
        }

        fn item_count(&self) -> StorageResult<u64> {
            Ok(0)
        }
    }

    impl KeyRangeCursor for BrokenCursor {
        fn seek(&mut self, _key: &[u8]) {}

        fn next(&mut self) -> bool {
            self.failed = true;
            false
        }

        fn current_key(&self) -> &[u8] {
            &[]
        }

        fn take_error(&mut self) -> Option<StorageError> {
            if std::mem::take(&mut self.failed) {
                Some(StorageError::Corruption("disk on fire".to_string()))
            } else {
                None
            }
        }
    }

    #[test]
    fn test_cursor_errors_carry_context() {
        let cache = DateFilterCostCache::with_capacity(16);
        let tfs = filters(&[("a", "x", false, false)]);
        let mut s = search(&BrokenTable, &cache);

        match s.range_query(&tfs, 0, DAY, 500) {
            Err(SearchError::CursorIo { context, source }) => {
                assert!(context.contains(r#"a="x""#));
                assert!(source.to_string().contains("disk on fire"));
            }
            other => panic!("expected CursorIo, got {:?}", other),
        }
        assert_eq!(cache.cached_count(0, tenant(), &tfs.filters()[0]), Some(500));
    }

    #[test]
    fn test_series_labels_roundtrip_through_writer() {
        let table = Arc::new(MemoryTable::new());
        let writer = IndexWriter::new(table.clone(), DAY, 16);
        let row = Row::new("http_requests", "GET /").label("job", "api").timestamp(10);
        let id = writer.index_row(tenant(), &row).unwrap();

        let cache = DateFilterCostCache::with_capacity(16);
        let mut s = search(table.as_ref(), &cache);
        let labels = s.series_labels(tenant(), id).unwrap().unwrap();
        assert_eq!(labels, row.canonical_labels());
        assert!(s.series_labels(tenant(), id + 1).unwrap().is_none());
        assert!(s.series_labels(Tenant::new(9, 9), id).unwrap().is_none());

        let tfs = filters(&[("", "http_requests", false, false), ("job", "api", false, false)]);
        assert_eq!(s.range_query(&tfs, 0, DAY, LIMIT).unwrap().into_vec(), vec![id]);
    }
}
