//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the TableStore trait.
//! Each write is a single-row upsert inside a transaction, which gives the
//! same all-or-nothing visibility as the JSON backend's temp-file rename.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{check_table_name, StorageError, StorageResult, TableStore};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
pub struct SqliteTableStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteTableStore {
    /// Creates a new SqliteTableStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteTableStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl TableStore for SqliteTableStore {
    fn load(&self, table: &str) -> StorageResult<Option<String>> {
        check_table_name(table)?;
        let conn = self.conn()?;
        let body = conn
            .query_row(
                "SELECT body FROM tables WHERE name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    fn save(&self, table: &str, body: &str) -> StorageResult<()> {
        check_table_name(table)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO tables (name, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE
             SET body = excluded.body, updated_at = excluded.updated_at",
            params![table, body, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn remove(&self, table: &str) -> StorageResult<()> {
        check_table_name(table)?;
        let conn = self.conn()?;
        conn.execute("DELETE FROM tables WHERE name = ?1", params![table])?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM tables ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite database {}", path.display()),
            None => "in-memory sqlite database".to_string(),
        }
    }
}
