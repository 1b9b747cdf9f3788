//! In-memory index table
//!
//! Sorted item set behind a `parking_lot::RwLock`. Writers insert in place.
//! Cursors copy one page of items at a time under a short read lock, so a
//! long scan never blocks ingestion and sees items added ahead of its
//! position.

use crate::storage::cursor::{IndexTable, KeyRangeCursor};
use crate::storage::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::{BTreeSet, VecDeque};
use std::ops::Bound;

/// Number of items copied per cursor refill
const CURSOR_PAGE_SIZE: usize = 256;

/// In-memory sorted item set
#[derive(Debug, Default)]
pub struct MemoryTable {
    items: RwLock<BTreeSet<Vec<u8>>>,
}

impl MemoryTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Up to `CURSOR_PAGE_SIZE` items starting at `from`
    fn fetch_page(&self, from: &[u8], inclusive: bool) -> Vec<Vec<u8>> {
        let lower = if inclusive {
            Bound::Included(from)
        } else {
            Bound::Excluded(from)
        };
        self.items
            .read()
            .range::<[u8], _>((lower, Bound::Unbounded))
            .take(CURSOR_PAGE_SIZE)
            .cloned()
            .collect()
    }
}

impl IndexTable for MemoryTable {
    fn add_items(&self, items: &[Vec<u8>]) -> StorageResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut set = self.items.write();
        for item in items {
            if !set.contains(item.as_slice()) {
                set.insert(item.clone());
            }
        }
        Ok(())
    }

    fn cursor(&self) -> Box<dyn KeyRangeCursor + '_> {
        Box::new(MemoryCursor {
            table: self,
            page: VecDeque::new(),
            next_from: Vec::new(),
            next_inclusive: true,
            page_was_full: true,
            current: Vec::new(),
        })
    }

    fn item_count(&self) -> StorageResult<u64> {
        Ok(self.items.read().len() as u64)
    }
}

/// Paged cursor over a [`MemoryTable`]
pub struct MemoryCursor<'a> {
    table: &'a MemoryTable,
    page: VecDeque<Vec<u8>>,
    next_from: Vec<u8>,
    next_inclusive: bool,
    /// False once a short page showed the table had nothing further
    page_was_full: bool,
    current: Vec<u8>,
}

impl KeyRangeCursor for MemoryCursor<'_> {
    fn seek(&mut self, key: &[u8]) {
        self.page.clear();
        self.next_from.clear();
        self.next_from.extend_from_slice(key);
        self.next_inclusive = true;
        self.page_was_full = true;
        self.current.clear();
    }

    fn next(&mut self) -> bool {
        if self.page.is_empty() {
            if !self.page_was_full {
                return false;
            }
            let page = self.table.fetch_page(&self.next_from, self.next_inclusive);
            self.page_was_full = page.len() == CURSOR_PAGE_SIZE;
            if let Some(last) = page.last() {
                self.next_from.clear();
                self.next_from.extend_from_slice(last);
                self.next_inclusive = false;
            }
            self.page.extend(page);
        }

        match self.page.pop_front() {
            Some(item) => {
                self.current = item;
                true
            }
            None => false,
        }
    }

    fn current_key(&self) -> &[u8] {
        &self.current
    }

    fn take_error(&mut self) -> Option<StorageError> {
        None
    }
}
