//! Tagsieve Storage Layer
//!
//! The sorted key-value primitive the index lives in, and the byte layout of
//! index items:
//!
//! - **cursor**: `KeyRangeCursor` / `IndexTable` contracts
//! - **memory**: in-memory copy-on-write table
//! - **sqlite**: persistent SQLite-backed table
//! - **keys**: namespaces, tenant prefix, escaping, posting items
//! - **values**: compressed bytes-array codec for stored label sets
//! - **error**: error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Row → IndexWriter → posting items → IndexTable::add_items
//!
//! Read Path:
//!   IndexSearch → seek(prefix + suffix + bucket) → next() ... → identifiers
//! ```

pub mod cursor;
pub mod error;
pub mod keys;
pub mod memory;
pub mod sqlite;
pub mod values;

// Re-export commonly used types
pub use cursor::{first_item_with_prefix, IndexTable, KeyRangeCursor};
pub use error::{StorageError, StorageResult};
pub use keys::{PostingParser, Tenant, METRIC_NAME_LABEL, MSEC_PER_DAY};
pub use memory::MemoryTable;
pub use sqlite::SqliteTable;
pub use values::{marshal_values, unmarshal_values, MarshalType};
