//! Database schema definitions
//!
//! This module contains the SQL schema for the SQLite table backend. Every
//! logical table is one row holding its full JSON snapshot.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per logical table snapshot
CREATE TABLE IF NOT EXISTS tables (
    name TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Schema bookkeeping
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

/// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;

    let recorded: i64 = conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| {
        row.get(0)
    })?;
    if recorded == 0 {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
    }

    Ok(())
}
