//! Leaf result caching implementation
//!
//! This module caches the leaf items found for a location, with an age-based
//! expiry. A stale record is deleted when it is looked up, never served.

use crate::storage::records::{CacheRecord, LeafItem};
use crate::storage::traits::{StorageResult, TableStore};
use crate::storage::{cache_table_name, write_table, CACHE_PREFIX};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Aggregate view over every cache record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Records still younger than the maximum age
    pub fresh: usize,

    /// Records past the maximum age (deleted on next lookup)
    pub stale: usize,

    /// Records that could not be decoded
    pub unreadable: usize,

    /// Leaf items held by fresh records
    pub fresh_items: usize,

    /// Timestamp of the oldest fresh record
    pub oldest_fresh: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn total(&self) -> usize {
        self.fresh + self.stale + self.unreadable
    }
}

/// Per-location leaf result cache
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn TableStore>,
    max_age: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn TableStore>, max_age: Duration) -> Self {
        Self { store, max_age }
    }

    /// Creates a cache whose records expire after `days` days
    pub fn with_max_age_days(store: Arc<dyn TableStore>, days: u32) -> Self {
        Self::new(store, Duration::days(i64::from(days)))
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Returns true if a fresh record exists for the entity
    pub fn has(&self, entity_id: &str) -> StorageResult<bool> {
        Ok(self.get(entity_id)?.is_some())
    }

    /// Returns the cached items, or None on a miss
    ///
    /// A miss is either "no record" or "record older than the maximum age";
    /// in the latter case the stale record is deleted.
    pub fn get(&self, entity_id: &str) -> StorageResult<Option<Vec<LeafItem>>> {
        self.get_at(entity_id, Utc::now())
    }

    pub(crate) fn get_at(
        &self,
        entity_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<Vec<LeafItem>>> {
        let table = cache_table_name(entity_id);
        let Some(record) = self.read_record(&table)? else {
            return Ok(None);
        };

        if now - record.cached_at > self.max_age {
            tracing::debug!(
                "Cache for {} is stale (cached at {}), evicting",
                entity_id,
                record.cached_at
            );
            self.store.remove(&table)?;
            return Ok(None);
        }

        Ok(Some(record.payload))
    }

    /// Stores the items for an entity, stamped with the current time
    pub fn put(&self, entity_id: &str, items: Vec<LeafItem>) -> StorageResult<()> {
        self.put_at(entity_id, items, Utc::now())
    }

    pub(crate) fn put_at(
        &self,
        entity_id: &str,
        items: Vec<LeafItem>,
        cached_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let record = CacheRecord {
            entity_id: entity_id.to_string(),
            payload: items,
            cached_at,
        };
        write_table(self.store.as_ref(), &cache_table_name(entity_id), &record)
    }

    /// Drops a record regardless of age
    pub fn invalidate(&self, entity_id: &str) -> StorageResult<()> {
        self.store.remove(&cache_table_name(entity_id))
    }

    /// Deletes every stale or unreadable record, returning how many were removed
    pub fn purge_stale(&self) -> StorageResult<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for table in self.store.list(CACHE_PREFIX)? {
            let keep = match self.read_record(&table)? {
                Some(record) => now - record.cached_at <= self.max_age,
                None => false,
            };
            if !keep {
                self.store.remove(&table)?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Purged {} stale cache record(s)", removed);
        }
        Ok(removed)
    }

    /// Summarises the cache without modifying it
    pub fn stats(&self) -> StorageResult<CacheStats> {
        let now = Utc::now();
        let mut stats = CacheStats::default();

        for table in self.store.list(CACHE_PREFIX)? {
            match self.read_record(&table)? {
                Some(record) if now - record.cached_at <= self.max_age => {
                    stats.fresh += 1;
                    stats.fresh_items += record.payload.len();
                    stats.oldest_fresh = Some(match stats.oldest_fresh {
                        Some(oldest) => oldest.min(record.cached_at),
                        None => record.cached_at,
                    });
                }
                Some(_) => stats.stale += 1,
                None => stats.unreadable += 1,
            }
        }

        Ok(stats)
    }

    fn read_record(&self, table: &str) -> StorageResult<Option<CacheRecord>> {
        let Some(body) = self.store.load(table)? else {
            return Ok(None);
        };
        match serde_json::from_str(&body) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!("Cache record {} is unreadable ({}), ignoring", table, e);
                Ok(None)
            }
        }
    }
}
