//! Append-merge persistence for discovered entities
//!
//! Every scope (countries, one country's cities, one city's locations, one
//! location's leaf items) is a single table snapshot. Merging loads the
//! snapshot, appends candidates whose identity is unseen, and writes the
//! union back atomically.

use crate::storage::records::Entity;
use crate::storage::traits::{StorageResult, TableStore};
use crate::storage::{read_table, write_table, Scope};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// Candidates whose identity was new to the scope
    pub added: usize,

    /// Records in the scope after the merge
    pub total: usize,

    /// Candidates that reused a known identity with different attributes
    pub conflicts: usize,
}

/// Durable entity tables keyed by stable identity
#[derive(Clone)]
pub struct EntityStore {
    store: Arc<dyn TableStore>,
}

impl EntityStore {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// Loads every persisted entity of a scope (empty if none)
    pub fn load<E: Entity>(&self, scope: &Scope) -> StorageResult<Vec<E>> {
        read_table(self.store.as_ref(), &scope.table_name())
    }

    /// Returns true if the scope has ever been written, even if empty
    pub fn exists(&self, scope: &Scope) -> StorageResult<bool> {
        Ok(self.store.load(&scope.table_name())?.is_some())
    }

    /// Number of persisted entities in a scope
    pub fn count<E: Entity>(&self, scope: &Scope) -> StorageResult<usize> {
        Ok(self.load::<E>(scope)?.len())
    }

    /// Merges candidates into a scope without duplicating identities
    ///
    /// Existing records always win: a candidate that reuses a known identity
    /// with different attributes is dropped and counted as a conflict, so
    /// static attributes never change once discovered. Duplicates inside the
    /// candidate list itself are collapsed the same way.
    ///
    /// The table is rewritten when something was added, and also on the first
    /// visit so an empty result is recorded as "visited but empty".
    pub fn merge<E: Entity>(
        &self,
        scope: &Scope,
        candidates: Vec<E>,
    ) -> StorageResult<MergeOutcome> {
        let table = scope.table_name();
        let existed = self.store.load(&table)?.is_some();
        let mut merged: Vec<E> = read_table(self.store.as_ref(), &table)?;

        let mut index: HashMap<String, usize> = merged
            .iter()
            .enumerate()
            .map(|(i, e)| (e.identity().to_string(), i))
            .collect();

        let mut outcome = MergeOutcome::default();

        for candidate in candidates {
            match index.get(candidate.identity()) {
                Some(&i) => {
                    if merged[i] != candidate {
                        outcome.conflicts += 1;
                        tracing::debug!(
                            "Keeping existing record for {} in {}; candidate differs",
                            candidate.identity(),
                            table
                        );
                    }
                }
                None => {
                    index.insert(candidate.identity().to_string(), merged.len());
                    merged.push(candidate);
                    outcome.added += 1;
                }
            }
        }

        outcome.total = merged.len();

        if outcome.added > 0 || !existed {
            write_table(self.store.as_ref(), &table, &merged)?;
        }

        if outcome.conflicts > 0 {
            tracing::warn!(
                "{} candidate(s) in {} disagreed with stored records and were ignored",
                outcome.conflicts,
                scope.label()
            );
        }

        Ok(outcome)
    }
}
