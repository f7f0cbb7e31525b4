//! Storage module for persisting harvest data
//!
//! This module handles all persistence for the crawler, including:
//! - Swappable table backends (JSON files or SQLite)
//! - Merge-without-duplication entity tables
//! - Per-location resumption offsets
//! - Age-limited leaf result caching

mod cache;
mod entity_store;
mod json;
mod offsets;
mod records;
mod schema;
mod sqlite;
mod traits;

pub use cache::{CacheStats, ResultCache};
pub use entity_store::{EntityStore, MergeOutcome};
pub use json::JsonTableStore;
pub use offsets::OffsetTracker;
pub use records::{CacheRecord, City, Country, Entity, LeafItem, Location, OffsetRecord};
pub use sqlite::SqliteTableStore;
pub use traits::{StorageError, StorageResult, TableStore};

use crate::config::{StorageBackend, StorageConfig};
use crate::url::sanitize_name;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Table holding the per-location offsets
pub const PROGRESS_TABLE: &str = "parsing_progress";

/// Table holding the report of the most recent run
pub const LAST_RUN_TABLE: &str = "last_run";

/// Prefix shared by every leaf result cache table
pub const CACHE_PREFIX: &str = "cache/location_";

/// Opens the table backend selected in the configuration
///
/// # Arguments
///
/// * `config` - The storage configuration
///
/// # Returns
///
/// * `Ok(Arc<dyn TableStore>)` - Backend shared by every store component
/// * `Err(StorageError)` - Failed to open the backend
pub fn open_table_store(config: &StorageConfig) -> StorageResult<Arc<dyn TableStore>> {
    let root = Path::new(&config.data_dir);
    let store: Arc<dyn TableStore> = match config.backend {
        StorageBackend::Json => Arc::new(JsonTableStore::new(root)?),
        StorageBackend::Sqlite => Arc::new(SqliteTableStore::new(&root.join("harvest.db"))?),
    };
    tracing::debug!("Opened storage: {}", store.describe());
    Ok(store)
}

/// The table an entity list belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// All known countries
    Countries,

    /// Cities of one country
    Cities { country_code: String },

    /// Locations of one city
    Locations { city_id: String, city_name: String },

    /// Leaf items found inside one location
    LeafItems { location_id: String },
}

impl Scope {
    /// Returns the table name backing this scope
    pub fn table_name(&self) -> String {
        match self {
            Self::Countries => "countries".to_string(),
            Self::Cities { country_code } => format!("cities_{}", key_component(country_code)),
            Self::Locations { city_id, city_name } => format!(
                "locations_{}_{}",
                key_component(city_id),
                sanitize_name(city_name)
            ),
            Self::LeafItems { location_id } => {
                format!("leaf_items_{}", key_component(location_id))
            }
        }
    }

    /// Short label used in logs and reports
    pub fn label(&self) -> String {
        match self {
            Self::Countries => "countries".to_string(),
            Self::Cities { country_code } => format!("country {}", country_code),
            Self::Locations { city_id, city_name } => format!("city {} ({})", city_id, city_name),
            Self::LeafItems { location_id } => format!("location {}", location_id),
        }
    }
}

/// Returns the cache table name for a location
pub fn cache_table_name(entity_id: &str) -> String {
    format!("{}{}", CACHE_PREFIX, key_component(entity_id))
}

/// Keeps identifiers readable in table names while stripping path characters
///
/// Unlike `sanitize_name`, case is preserved so `UA` stays `cities_UA`.
pub(crate) fn key_component(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Reads and decodes a table, treating a missing or damaged table as empty
///
/// A previous run may have been killed mid-write under a backend without
/// atomic replace, or a file may have been hand-edited. Either way the table
/// is logged and treated as absent rather than aborting the run.
pub(crate) fn read_table<T>(store: &dyn TableStore, table: &str) -> StorageResult<T>
where
    T: DeserializeOwned + Default,
{
    let Some(body) = store.load(table)? else {
        return Ok(T::default());
    };

    if body.trim().is_empty() {
        tracing::warn!("Table {} is empty on disk, treating as new", table);
        return Ok(T::default());
    }

    match serde_json::from_str(&body) {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::warn!(
                "Table {} is unreadable ({}), treating as empty until the next merge",
                table,
                e
            );
            Ok(T::default())
        }
    }
}

/// Encodes and atomically writes a table
pub(crate) fn write_table<T>(store: &dyn TableStore, table: &str, value: &T) -> StorageResult<()>
where
    T: Serialize + ?Sized,
{
    let body =
        serde_json::to_string_pretty(value).map_err(|source| StorageError::Serialization {
            table: table.to_string(),
            source,
        })?;
    store.save(table, &body)
}
