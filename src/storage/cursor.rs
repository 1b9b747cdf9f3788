//! Cursor contract over the sorted index item space
//!
//! Items are opaque byte strings kept in lexicographic (memcmp) order. The
//! search engine only ever moves forward: it seeks to a start key and calls
//! `next()` until it has seen enough.

use crate::storage::error::{StorageError, StorageResult};

/// Forward cursor over lexicographically sorted items
pub trait KeyRangeCursor {
    /// Position the cursor just before the first item `>= key`
    fn seek(&mut self, key: &[u8]);

    /// Advance to the next item. Returns false at exhaustion or on error;
    /// call [`KeyRangeCursor::take_error`] to tell them apart.
    fn next(&mut self) -> bool;

    /// Item the cursor currently points at (empty before the first `next()`)
    fn current_key(&self) -> &[u8];

    /// Take the error that stopped iteration, if any
    fn take_error(&mut self) -> Option<StorageError>;
}

/// A sorted, deduplicated item set that can be appended to and scanned
pub trait IndexTable: Send + Sync {
    /// Insert items. Items already present are ignored.
    fn add_items(&self, items: &[Vec<u8>]) -> StorageResult<()>;

    /// Open a cursor over the current contents
    fn cursor(&self) -> Box<dyn KeyRangeCursor + '_>;

    /// Number of items stored
    fn item_count(&self) -> StorageResult<u64>;
}

/// Return the first item starting with `prefix`, if any
pub fn first_item_with_prefix(
    table: &dyn IndexTable,
    prefix: &[u8],
) -> StorageResult<Option<Vec<u8>>> {
    let mut cursor = table.cursor();
    cursor.seek(prefix);
    if cursor.next() {
        let item = cursor.current_key();
        if item.starts_with(prefix) {
            return Ok(Some(item.to_vec()));
        }
        return Ok(None);
    }
    match cursor.take_error() {
        Some(err) => Err(err),
        None => Ok(None),
    }
}
