//! Ingestion-side index writer
//!
//! Turns rows into index items:
//!
//! ```text
//! Row ──canonical labels──▶ series key ──lookup / assign──▶ identifier
//!                                                             │
//!        one posting per label per date bucket ◀──────────────┘
//!        (skipped when (tenant, bucket, id) was indexed recently)
//! ```
//!
//! Identifiers start at the Unix time in nanoseconds when the writer is
//! created and increase by one per new series, so identifiers assigned by a
//! later process never collide with earlier ones.

use crate::ingest::{Label, Row};
use crate::storage::keys::{
    bucket_start, marshal_id_prefix, marshal_series_prefix, posting_item, unmarshal_u64,
};
use crate::storage::{
    first_item_with_prefix, marshal_values, unmarshal_values, IndexTable, MarshalType,
    StorageError, StorageResult, Tenant,
};
use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default size of the series-id and recent-postings caches
pub const DEFAULT_RECENT_SERIES_CAPACITY: usize = 65_536;

/// Writes postings and series records into an [`IndexTable`]
pub struct IndexWriter {
    table: Arc<dyn IndexTable>,
    bucket_width_ms: u64,
    series_ids: Mutex<LruCache<Vec<u8>, u64>>,
    recent_postings: Mutex<LruCache<(Tenant, u64, u64), ()>>,
    create_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl IndexWriter {
    pub fn new(table: Arc<dyn IndexTable>, bucket_width_ms: u64, recent_capacity: usize) -> Self {
        let cap = NonZeroUsize::new(recent_capacity).unwrap_or(NonZeroUsize::MIN);
        let first_id = Utc::now()
            .timestamp_nanos_opt()
            .and_then(|ns| u64::try_from(ns).ok())
            .unwrap_or(1)
            .max(1);
        Self {
            table,
            bucket_width_ms: bucket_width_ms.max(1),
            series_ids: Mutex::new(LruCache::new(cap)),
            recent_postings: Mutex::new(LruCache::new(cap)),
            create_lock: Mutex::new(()),
            next_id: AtomicU64::new(first_id),
        }
    }

    pub fn bucket_width_ms(&self) -> u64 {
        self.bucket_width_ms
    }

    /// Index one row, returning its series identifier
    pub fn index_row(&self, tenant: Tenant, row: &Row) -> StorageResult<u64> {
        if row.metric.is_empty() {
            return Err(StorageError::Codec("row has no metric name".to_string()));
        }
        let labels = row.canonical_labels();
        let id = self.get_or_create_id(tenant, &labels)?;

        let bucket = bucket_start(row.timestamp, self.bucket_width_ms);
        let key = (tenant, bucket, id);
        if self.recent_postings.lock().get(&key).is_some() {
            return Ok(id);
        }

        let items = postings(tenant, &labels, bucket, id);
        self.table.add_items(&items)?;
        self.recent_postings.lock().put(key, ());
        Ok(id)
    }

    /// Index a batch of rows
    ///
    /// New series are registered as they are first seen; the postings of the
    /// whole batch then go out in one table write. Rows with an empty metric
    /// name are skipped. Returns the number of
    /// rows indexed.
    pub fn index_rows(&self, tenant: Tenant, rows: &[Row]) -> StorageResult<usize> {
        let mut items = Vec::new();
        let mut fresh = HashSet::new();
        let mut indexed = 0;

        for row in rows {
            if row.metric.is_empty() {
                warn!(labels = ?row.labels, "Skipping row without metric name");
                continue;
            }
            let labels = row.canonical_labels();
            let id = self.get_or_create_id(tenant, &labels)?;
            indexed += 1;

            let bucket = bucket_start(row.timestamp, self.bucket_width_ms);
            let key = (tenant, bucket, id);
            if fresh.contains(&key) || self.recent_postings.lock().get(&key).is_some() {
                continue;
            }
            items.extend(postings(tenant, &labels, bucket, id));
            fresh.insert(key);
        }

        self.table.add_items(&items)?;

        let mut recent = self.recent_postings.lock();
        for key in fresh {
            recent.put(key, ());
        }
        debug!(tenant = %tenant, rows = indexed, items = items.len(), "Indexed rows");
        Ok(indexed)
    }

    /// Identifier of an already indexed series
    ///
    /// `labels` must be in canonical order (see [`Row::canonical_labels`]).
    pub fn series_id(&self, tenant: Tenant, labels: &[Label]) -> StorageResult<Option<u64>> {
        let key = series_key(tenant, labels);
        self.lookup(&key)
    }

    fn lookup(&self, key: &[u8]) -> StorageResult<Option<u64>> {
        if let Some(&id) = self.series_ids.lock().get(key) {
            return Ok(Some(id));
        }

        let item = match first_item_with_prefix(self.table.as_ref(), key)? {
            Some(item) => item,
            None => return Ok(None),
        };
        let id = unmarshal_u64(&item[key.len()..])?;
        self.series_ids.lock().put(key.to_vec(), id);
        Ok(Some(id))
    }

    fn get_or_create_id(&self, tenant: Tenant, labels: &[Label]) -> StorageResult<u64> {
        let key = series_key(tenant, labels);
        if let Some(id) = self.lookup(&key)? {
            return Ok(id);
        }

        let _guard = self.create_lock.lock();
        if let Some(id) = self.lookup(&key)? {
            return Ok(id);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut series_item = key.clone();
        series_item.extend_from_slice(&id.to_be_bytes());

        let mut labels_item = Vec::new();
        marshal_id_prefix(&mut labels_item, tenant, id);
        labels_item.extend_from_slice(&encode_label_set(labels)?);

        self.table.add_items(&[series_item, labels_item])?;
        self.series_ids.lock().put(key, id);
        debug!(tenant = %tenant, id, labels = labels.len(), "Registered new series");
        Ok(id)
    }
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter")
            .field("bucket_width_ms", &self.bucket_width_ms)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn series_key(tenant: Tenant, labels: &[Label]) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    marshal_series_prefix(
        &mut key,
        tenant,
        labels
            .iter()
            .map(|l| (l.name.as_bytes(), l.value.as_bytes())),
    );
    key
}

fn postings(tenant: Tenant, labels: &[Label], bucket: u64, id: u64) -> Vec<Vec<u8>> {
    labels
        .iter()
        .map(|l| posting_item(tenant, l.name.as_bytes(), l.value.as_bytes(), bucket, &[id]))
        .collect()
}

/// Encode a label set as `[marshal type][count u32 BE][payload]`
pub(crate) fn encode_label_set(labels: &[Label]) -> StorageResult<Vec<u8>> {
    let values: Vec<&[u8]> = labels
        .iter()
        .flat_map(|l| [l.name.as_bytes(), l.value.as_bytes()])
        .collect();
    let count = u32::try_from(values.len())
        .map_err(|_| StorageError::Codec(format!("too many labels: {}", labels.len())))?;

    let mut payload = Vec::new();
    let marshal_type = marshal_values(&mut payload, &values)?;

    let mut dst = Vec::with_capacity(5 + payload.len());
    dst.push(marshal_type.as_u8());
    dst.extend_from_slice(&count.to_be_bytes());
    dst.extend_from_slice(&payload);
    Ok(dst)
}

/// Inverse of [`encode_label_set`]
pub(crate) fn decode_label_set(src: &[u8]) -> StorageResult<Vec<Label>> {
    if src.len() < 5 {
        return Err(StorageError::Corruption(format!(
            "label set record too short: {} bytes",
            src.len()
        )));
    }
    let marshal_type = MarshalType::try_from(src[0])?;
    let count = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
    if count % 2 != 0 {
        return Err(StorageError::Corruption(format!(
            "odd number of label parts: {}",
            count
        )));
    }

    let values = unmarshal_values(&src[5..], marshal_type, count)?;
    let mut labels = Vec::with_capacity(count / 2);
    let mut parts = values.into_iter();
    while let (Some(name), Some(value)) = (parts.next(), parts.next()) {
        let name = String::from_utf8(name)
            .map_err(|e| StorageError::Corruption(format!("label name is not UTF-8: {}", e)))?;
        let value = String::from_utf8(value)
            .map_err(|e| StorageError::Corruption(format!("label value is not UTF-8: {}", e)))?;
        labels.push(Label { name, value });
    }
    Ok(labels)
}
