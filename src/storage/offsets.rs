//! Per-location resumption cursors
//!
//! One durable table maps entity IDs to the position already consumed from
//! that entity's leaf stream. `save_offset` is the commit signal for a batch
//! and must only be called after the batch has been merged.

use crate::storage::records::OffsetRecord;
use crate::storage::traits::{StorageError, StorageResult, TableStore};
use crate::storage::{read_table, write_table, PROGRESS_TABLE};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

type ProgressTable = BTreeMap<String, OffsetRecord>;

/// Durable offset table keyed by entity ID
#[derive(Clone)]
pub struct OffsetTracker {
    store: Arc<dyn TableStore>,
}

impl OffsetTracker {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    fn table(&self) -> StorageResult<ProgressTable> {
        read_table(self.store.as_ref(), PROGRESS_TABLE)
    }

    /// Returns the last committed position (0 if never saved)
    pub fn get_offset(&self, entity_id: &str) -> StorageResult<u64> {
        Ok(self
            .table()?
            .get(entity_id)
            .map(|r| r.last_position)
            .unwrap_or(0))
    }

    /// Commits a new position and cumulative count for an entity
    ///
    /// Positions never move backwards; use [`OffsetTracker::reset`] to
    /// deliberately start an entity over.
    pub fn save_offset(
        &self,
        entity_id: &str,
        new_offset: u64,
        cumulative_count: u64,
    ) -> StorageResult<()> {
        let mut table = self.table()?;

        if let Some(current) = table.get(entity_id) {
            if new_offset < current.last_position {
                return Err(StorageError::OffsetRegression {
                    entity_id: entity_id.to_string(),
                    current: current.last_position,
                    requested: new_offset,
                });
            }
        }

        table.insert(
            entity_id.to_string(),
            OffsetRecord {
                entity_id: entity_id.to_string(),
                last_position: new_offset,
                cumulative_count,
                last_updated_at: Utc::now(),
            },
        );

        write_table(self.store.as_ref(), PROGRESS_TABLE, &table)?;
        tracing::debug!(
            "Committed offset {} (cumulative {}) for {}",
            new_offset,
            cumulative_count,
            entity_id
        );
        Ok(())
    }

    /// Returns the cumulative count and last update time, if any batch was committed
    pub fn get_stats(&self, entity_id: &str) -> StorageResult<Option<(u64, DateTime<Utc>)>> {
        Ok(self
            .table()?
            .get(entity_id)
            .map(|r| (r.cumulative_count, r.last_updated_at)))
    }

    /// Explicitly discards an entity's cursor
    ///
    /// Returns true if a record existed.
    pub fn reset(&self, entity_id: &str) -> StorageResult<bool> {
        let mut table = self.table()?;
        let existed = table.remove(entity_id).is_some();
        if existed {
            write_table(self.store.as_ref(), PROGRESS_TABLE, &table)?;
            tracing::info!("Reset offset for {}", entity_id);
        }
        Ok(existed)
    }

    /// Every committed record, ordered by entity ID
    pub fn all(&self) -> StorageResult<Vec<OffsetRecord>> {
        Ok(self.table()?.into_values().collect())
    }
}
