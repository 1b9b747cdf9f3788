//! SQLite Table - persistent sorted item set
//!
//! Stores every index item as a BLOB primary key in a `WITHOUT ROWID` table.
//! SQLite compares BLOBs with memcmp, so the B-tree order is exactly the
//! lexicographic order the search engine expects.
//!
//! # Performance
//! - Insert: O(log n) per item, batched in one transaction
//! - Cursor: one indexed range query per page of `CURSOR_PAGE_SIZE` items

use crate::storage::cursor::{IndexTable, KeyRangeCursor};
use crate::storage::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Number of items fetched per cursor round-trip
const CURSOR_PAGE_SIZE: usize = 512;

/// SQLite-backed sorted item set
pub struct SqliteTable {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteTable {
    /// Create or open an index table in `data_dir`
    pub fn open(data_dir: &Path) -> StorageResult<Self> {
        let path = data_dir.join("index_items.db");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Configure for performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS items (
                item BLOB NOT NULL PRIMARY KEY
            ) WITHOUT ROWID",
            [],
        )?;

        tracing::debug!("Opened index table at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Force checkpoint for WAL mode
    pub fn checkpoint(&self) -> StorageResult<()> {
        self.conn
            .lock()
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch up to `CURSOR_PAGE_SIZE` items starting at `from`
    fn fetch_page(&self, from: &[u8], inclusive: bool) -> StorageResult<Vec<Vec<u8>>> {
        let conn = self.conn.lock();
        let sql = if inclusive {
            "SELECT item FROM items WHERE item >= ?1 ORDER BY item LIMIT ?2"
        } else {
            "SELECT item FROM items WHERE item > ?1 ORDER BY item LIMIT ?2"
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![from, CURSOR_PAGE_SIZE as i64], |row| {
            row.get::<_, Vec<u8>>(0)
        })?;

        let mut page = Vec::with_capacity(CURSOR_PAGE_SIZE);
        for row in rows {
            page.push(row?);
        }
        Ok(page)
    }
}

impl IndexTable for SqliteTable {
    fn add_items(&self, items: &[Vec<u8>]) -> StorageResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("INSERT OR IGNORE INTO items (item) VALUES (?1)")?;
            for item in items {
                stmt.execute(params![item])?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    fn cursor(&self) -> Box<dyn KeyRangeCursor + '_> {
        Box::new(SqliteCursor {
            table: self,
            page: VecDeque::new(),
            next_from: Vec::new(),
            next_inclusive: true,
            page_was_full: true,
            current: Vec::new(),
            error: None,
        })
    }

    fn item_count(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Paged cursor over a [`SqliteTable`]
///
/// The connection lock is held only while a page is fetched, so concurrent
/// searches interleave page by page.
pub struct SqliteCursor<'a> {
    table: &'a SqliteTable,
    page: VecDeque<Vec<u8>>,
    next_from: Vec<u8>,
    next_inclusive: bool,
    /// False once a short page showed the table has nothing further
    page_was_full: bool,
    current: Vec<u8>,
    error: Option<StorageError>,
}

impl KeyRangeCursor for SqliteCursor<'_> {
    fn seek(&mut self, key: &[u8]) {
        self.page.clear();
        self.next_from.clear();
        self.next_from.extend_from_slice(key);
        self.next_inclusive = true;
        self.page_was_full = true;
        self.current.clear();
    }

    fn next(&mut self) -> bool {
        if self.error.is_some() {
            return false;
        }

        if self.page.is_empty() {
            if !self.page_was_full {
                return false;
            }
            match self.table.fetch_page(&self.next_from, self.next_inclusive) {
                Ok(page) => {
                    self.page_was_full = page.len() == CURSOR_PAGE_SIZE;
                    if let Some(last) = page.last() {
                        self.next_from.clear();
                        self.next_from.extend_from_slice(last);
                        self.next_inclusive = false;
                    }
                    self.page.extend(page);
                }
                Err(err) => {
                    self.error = Some(err);
                    return false;
                }
            }
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
        self.error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_table_creation() {
        let dir = tempdir().unwrap();
        let table = SqliteTable::open(dir.path()).unwrap();
        assert_eq!(table.item_count().unwrap(), 0);
    }

    #[test]
    fn test_insert_dedup_and_order() {
        let dir = tempdir().unwrap();
        let table = SqliteTable::open(dir.path()).unwrap();

        table
            .add_items(&[vec![2, 0], vec![1, 255], vec![2, 0], vec![1]])
            .unwrap();
        assert_eq!(table.item_count().unwrap(), 3);

        let mut cursor = table.cursor();
        cursor.seek(&[]);
        let mut items = Vec::new();
        while cursor.next() {
            items.push(cursor.current_key().to_vec());
        }
        assert!(cursor.take_error().is_none());
        assert_eq!(items, vec![vec![1], vec![1, 255], vec![2, 0]]);
    }

    #[test]
    fn test_cursor_crosses_pages() {
        let dir = tempdir().unwrap();
        let table = SqliteTable::open(dir.path()).unwrap();

        let items: Vec<Vec<u8>> = (0..(CURSOR_PAGE_SIZE as u32 * 2 + 7))
            .map(|i| i.to_be_bytes().to_vec())
            .collect();
        table.add_items(&items).unwrap();

        let mut cursor = table.cursor();
        cursor.seek(&10u32.to_be_bytes());
        let mut seen = 0u32;
        while cursor.next() {
            let expected = (10 + seen).to_be_bytes();
            assert_eq!(cursor.current_key(), expected.as_slice());
            seen += 1;
        }
        assert_eq!(seen as usize, items.len() - 10);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();

        {
            let table = SqliteTable::open(dir.path()).unwrap();
            table.add_items(&[b"key1".to_vec(), b"key2".to_vec()]).unwrap();
            table.checkpoint().unwrap();
        }

        {
            let table = SqliteTable::open(dir.path()).unwrap();
            assert_eq!(table.item_count().unwrap(), 2);

            let mut cursor = table.cursor();
            cursor.seek(b"key2");
            assert!(cursor.next());
            assert_eq!(cursor.current_key(), b"key2");
            assert!(!cursor.next());
        }
    }
}
