use crate::error::RelError;
use crate::storage::backend::{Mutation, MutationSet, RowState, StorageBackend};
use crate::storage::encoded_key::{EncodedKey, prefix_successor};
use im::OrdMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableData {
    pub rows: OrdMap<EncodedKey, RowState>,
}

/// Immutable row store: data tables and index tables side by side, each an
/// ordered map from encoded key to cells.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keyspace {
    tables: OrdMap<String, TableData>,
}

impl Keyspace {
    pub fn row(&self, table: &str, key: &EncodedKey) -> Option<&RowState> {
        self.tables.get(table).and_then(|t| t.rows.get(key))
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn scan(&self, table: &str) -> Vec<(EncodedKey, RowState)> {
        self.tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn scan_prefix(&self, table: &str, prefix: &EncodedKey) -> Vec<(EncodedKey, RowState)> {
        let Some(data) = self.tables.get(table) else {
            return Vec::new();
        };
        let end = match prefix_successor(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        data.rows
            .range((Bound::Included(prefix.clone()), end))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn apply_mutation(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::Put { table, key, cells } => {
                let mut data = self.tables.get(table).cloned().unwrap_or_default();
                let mut row = data.rows.get(key).cloned().unwrap_or_default();
                for (column, value) in cells {
                    row.insert(column.clone(), value.clone());
                }
                data.rows.insert(key.clone(), row);
                self.tables.insert(table.clone(), data);
            }
            Mutation::Delete { table, key } => {
                if let Some(data) = self.tables.get_mut(table) {
                    data.rows.remove(key);
                }
            }
        }
    }
}

/// In-process [`StorageBackend`]. Each `apply` builds the next keyspace from
/// the current one and swaps it in whole, so a failed or rejected unit leaves
/// no trace.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<Arc<Keyspace>>,
    apply_lock: Mutex<()>,
    apply_calls: AtomicU64,
    read_calls: AtomicU64,
    reject_next_apply: Mutex<Option<String>>,
    unreadable_tables: Mutex<BTreeSet<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Keyspace> {
        self.state.read().clone()
    }

    pub fn apply_calls(&self) -> u64 {
        self.apply_calls.load(Ordering::Acquire)
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Acquire)
    }

    /// Makes the next `apply` fail with `reason` without writing anything.
    pub fn reject_next_apply(&self, reason: impl Into<String>) {
        *self.reject_next_apply.lock() = Some(reason.into());
    }

    /// Makes `read_current_row` fail for `table` until cleared.
    pub fn set_unreadable(&self, table: &str, unreadable: bool) {
        let mut tables = self.unreadable_tables.lock();
        if unreadable {
            tables.insert(table.to_string());
        } else {
            tables.remove(table);
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn apply(&self, mutations: &MutationSet) -> Result<(), RelError> {
        let _guard = self.apply_lock.lock();
        self.apply_calls.fetch_add(1, Ordering::AcqRel);
        if let Some(reason) = self.reject_next_apply.lock().take() {
            return Err(RelError::Backend(reason));
        }
        let mut next = (*self.snapshot()).clone();
        for mutation in mutations.iter() {
            next.apply_mutation(mutation);
        }
        *self.state.write() = Arc::new(next);
        Ok(())
    }

    fn read_current_row(
        &self,
        table: &str,
        key: &EncodedKey,
    ) -> Result<Option<RowState>, RelError> {
        self.read_calls.fetch_add(1, Ordering::AcqRel);
        if self.unreadable_tables.lock().contains(table) {
            return Err(RelError::Backend(format!("table '{table}' is unreadable")));
        }
        Ok(self.snapshot().row(table, key).cloned())
    }
}
