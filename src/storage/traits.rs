//! Storage traits and error types
//!
//! This module defines the trait interface for table backends and the
//! associated error types. A table is a named, complete JSON snapshot that is
//! replaced atomically on every write.

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Serialization error in table {table}: {source}")]
    Serialization {
        table: String,
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Atomic replace failed: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Offset for {entity_id} cannot move backwards ({current} -> {requested})")]
    OffsetRegression {
        entity_id: String,
        current: u64,
        requested: u64,
    },

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for table backend implementations
///
/// Implementations must make `save` atomic: a reader (or a restarted process)
/// sees either the previous snapshot or the new one, never a torn write.
/// Table names are slash-separated paths such as `countries` or
/// `cache/location_123`.
pub trait TableStore: Send + Sync {
    /// Reads the raw snapshot of a table, or None if it was never written
    fn load(&self, table: &str) -> StorageResult<Option<String>>;

    /// Atomically replaces a table's snapshot
    fn save(&self, table: &str, body: &str) -> StorageResult<()>;

    /// Deletes a table; deleting a missing table is not an error
    fn remove(&self, table: &str) -> StorageResult<()>;

    /// Lists table names starting with `prefix`, sorted
    fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Human-readable description of where the tables live
    fn describe(&self) -> String;
}

/// Rejects table names that could escape the storage root
pub(crate) fn check_table_name(table: &str) -> StorageResult<()> {
    let valid = !table.is_empty()
        && !table.starts_with('/')
        && table
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
        && !table.contains('\\');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidTableName(table.to_string()))
    }
}
