//! Per-date filter cost cache
//!
//! Remembers how many identifiers each tag filter matched on a given date
//! bucket so that the next search touching that date evaluates the most
//! selective filters first. Entries are hints: a stale or evicted entry only
//! changes the evaluation order, never the result.
//!
//! Updates are last-write-wins with no decay. A count recorded while the
//! index was small keeps promoting a filter until a fresher count for the
//! same date overwrites it.
//!
//! # Architecture
//!
//! ```text
//! IndexSearch ──estimated_cost / record──▶ DateFilterCostCache
//!                                               │  key = date ‖ tenant ‖ signature
//!                                               ▼  value = count (u64 BE)
//!                                          dyn CostStore (LruCostStore by default)
//! ```

use crate::index::tag_filter::TagFilter;
use crate::storage::Tenant;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Default number of cached (date, filter) counts
pub const DEFAULT_COST_CACHE_CAPACITY: usize = 100_000;

/// Errors a cost store may report on write
#[derive(Error, Debug)]
pub enum CostStoreError {
    #[error("Cost store unavailable: {0}")]
    Unavailable(String),
}

/// Bounded byte-keyed cache backing [`DateFilterCostCache`]
pub trait CostStore: Send + Sync {
    /// Copy of the value stored under `key`
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), CostStoreError>;
}

/// In-memory LRU cost store
pub struct LruCostStore {
    cache: Mutex<LruCache<Vec<u8>, Vec<u8>>>,
    capacity: usize,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl LruCostStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            capacity,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CostCacheStats {
        CostCacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.lock().len(),
            capacity: self.capacity,
        }
    }
}

impl CostStore for LruCostStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut cache = self.cache.lock();
        match cache.get(key) {
            Some(value) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), CostStoreError> {
        self.cache.lock().put(key.to_vec(), value.to_vec());
        Ok(())
    }
}

/// Cost store usage counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostCacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CostCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Maps `(date, tenant, filter)` to the filter's last observed match count
#[derive(Clone)]
pub struct DateFilterCostCache {
    store: Arc<dyn CostStore>,
}

impl DateFilterCostCache {
    pub fn new(store: Arc<dyn CostStore>) -> Self {
        Self { store }
    }

    /// Cache backed by an [`LruCostStore`] of `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Arc::new(LruCostStore::new(capacity)))
    }

    /// Estimated cost of evaluating `tf` on `date`
    ///
    /// `count * match_cost` when a count is cached, the filter's static
    /// `match_cost` otherwise.
    pub fn estimated_cost(&self, date: u64, tenant: Tenant, tf: &TagFilter) -> u64 {
        match self.cached_count(date, tenant, tf) {
            Some(count) => count.saturating_mul(tf.match_cost()),
            None => tf.match_cost(),
        }
    }

    /// Last match count recorded for `tf` on `date`
    pub fn cached_count(&self, date: u64, tenant: Tenant, tf: &TagFilter) -> Option<u64> {
        let key = cache_key(date, tenant, tf);
        let value = self.store.get(&key)?;
        let bytes: [u8; 8] = value.as_slice().try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    /// Overwrite the match count of `tf` on `date`
    ///
    /// Store failures are logged and dropped.
    pub fn record(&self, date: u64, tenant: Tenant, tf: &TagFilter, count: u64) {
        let key = cache_key(date, tenant, tf);
        if let Err(e) = self.store.set(&key, &count.to_be_bytes()) {
            warn!(
                filter = %tf,
                date,
                tenant = %tenant,
                error = %e,
                "Failed to record filter cost"
            );
        }
    }
}

impl Default for DateFilterCostCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_COST_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for DateFilterCostCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DateFilterCostCache").finish_non_exhaustive()
    }
}

fn cache_key(date: u64, tenant: Tenant, tf: &TagFilter) -> Vec<u8> {
    let signature = tf.signature();
    let mut key = Vec::with_capacity(16 + signature.len());
    key.extend_from_slice(&date.to_be_bytes());
    key.extend_from_slice(&tenant.account_id.to_be_bytes());
    key.extend_from_slice(&tenant.project_id.to_be_bytes());
    key.extend_from_slice(signature);
    key
}
