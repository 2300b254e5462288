//! Two-tier metadata caching.
//!
//! [`SessionMetadata`] is the session-local overlay: it is consulted and
//! updated first, then every mutation cascades into the [`SharedMetadataCache`]
//! visible to all sessions. The shared tier publishes by swapping one
//! `Arc<MetadataSnapshot>`; readers clone the pointer and never observe a
//! snapshot under construction.

use crate::catalog::MetadataSnapshot;
use crate::catalog::schema::{ColumnDef, IndexState, TableDescriptor};
use crate::error::{RelError, RelErrorCode};
use crate::version_store::MetadataVersionStore;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct SharedMetadataCache {
    current: RwLock<Arc<MetadataSnapshot>>,
    // Held across read-build-swap so concurrent writers serialize; readers
    // only take `current`.
    history: Mutex<MetadataVersionStore>,
}

impl SharedMetadataCache {
    pub fn new(initial: MetadataSnapshot, max_versions: usize) -> Self {
        let initial = Arc::new(initial);
        let mut history = MetadataVersionStore::new(max_versions);
        history.bootstrap(Arc::clone(&initial));
        Self {
            current: RwLock::new(initial),
            history: Mutex::new(history),
        }
    }

    pub fn snapshot(&self) -> Arc<MetadataSnapshot> {
        self.current.read().clone()
    }

    pub fn snapshot_at(&self, timestamp: u64) -> MetadataSnapshot {
        self.snapshot().prune_to_timestamp(timestamp)
    }

    pub fn snapshot_at_version(&self, version: u64) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.history.lock().acquire_at_version(version)
    }

    /// Applies `build` to the current snapshot and publishes the result.
    /// `Ok(None)` from `build` means the write lost a last-writer-wins race
    /// and the current snapshot is kept.
    fn publish<F>(&self, build: F) -> Result<Arc<MetadataSnapshot>, RelError>
    where
        F: FnOnce(&MetadataSnapshot) -> Result<Option<MetadataSnapshot>, RelError>,
    {
        let mut history = self.history.lock();
        let base = self.snapshot();
        let Some(next) = build(&base)? else {
            return Ok(base);
        };
        let next = Arc::new(next);
        history.publish(Arc::clone(&next));
        *self.current.write() = Arc::clone(&next);
        debug!(version = next.version(), tables = next.len(), "published shared metadata snapshot");
        Ok(next)
    }

    pub fn add_table(&self, table: TableDescriptor) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.publish(|base| {
            if let Some(stored) = base.table(&table.table_name)
                && stored.sequence_number > table.sequence_number
            {
                debug!(
                    table = %table.table_name,
                    stored = stored.sequence_number,
                    attempted = table.sequence_number,
                    "skipping older table definition in shared cache"
                );
                return Ok(None);
            }
            base.add_table(table).map(Some)
        })
    }

    pub fn add_column(
        &self,
        table_name: &str,
        columns: Vec<ColumnDef>,
        timestamp: u64,
        sequence_number: u64,
        immutable_rows: bool,
    ) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.publish(|base| {
            lww(
                table_name,
                base.add_column(table_name, columns, timestamp, sequence_number, immutable_rows),
            )
        })
    }

    pub fn remove_table(&self, table_name: &str) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.publish(|base| lww(table_name, base.remove_table(table_name)))
    }

    pub fn remove_column(
        &self,
        table_name: &str,
        column_name: &str,
        timestamp: u64,
        sequence_number: u64,
    ) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.publish(|base| {
            lww(
                table_name,
                base.remove_column(table_name, column_name, timestamp, sequence_number),
            )
        })
    }

    pub fn update_index_state(
        &self,
        table_name: &str,
        index_name: &str,
        state: IndexState,
    ) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.publish(|base| lww(table_name, base.update_index_state(table_name, index_name, state)))
    }
}

/// Stale or already-removed targets are skipped in the shared tier instead of
/// failing the session that cascaded the write.
fn lww(
    table_name: &str,
    result: Result<MetadataSnapshot, RelError>,
) -> Result<Option<MetadataSnapshot>, RelError> {
    match result {
        Ok(next) => Ok(Some(next)),
        Err(err)
            if matches!(
                err.code(),
                RelErrorCode::StaleMetadata
                    | RelErrorCode::TableNotFound
                    | RelErrorCode::ColumnNotFound
                    | RelErrorCode::IndexNotFound
            ) =>
        {
            debug!(table = table_name, error = %err, "shared metadata write superseded");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Session-local overlay over the shared cache.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    local: Arc<MetadataSnapshot>,
    shared: Arc<SharedMetadataCache>,
    scn: Option<u64>,
}

impl SessionMetadata {
    pub fn new(shared: Arc<SharedMetadataCache>, scn: Option<u64>) -> Self {
        let local = match scn {
            Some(ts) => Arc::new(shared.snapshot_at(ts)),
            None => shared.snapshot(),
        };
        Self { local, shared, scn }
    }

    /// Overlay pinned to `scn`, built from this session's current view.
    pub fn at_timestamp(&self, scn: u64) -> Self {
        Self {
            local: Arc::new(self.local.prune_to_timestamp(scn)),
            shared: Arc::clone(&self.shared),
            scn: Some(scn),
        }
    }

    pub fn scn(&self) -> Option<u64> {
        self.scn
    }

    pub fn current(&self) -> Arc<MetadataSnapshot> {
        Arc::clone(&self.local)
    }

    pub fn shared(&self) -> &Arc<SharedMetadataCache> {
        &self.shared
    }

    pub fn snapshot_at(&self, timestamp: u64) -> MetadataSnapshot {
        self.local.prune_to_timestamp(timestamp)
    }

    /// Replaces the overlay with the shared cache's latest view.
    pub fn refresh(&mut self) {
        self.local = match self.scn {
            Some(ts) => Arc::new(self.shared.snapshot_at(ts)),
            None => self.shared.snapshot(),
        };
    }

    pub fn add_table(&mut self, table: TableDescriptor) -> Result<Arc<MetadataSnapshot>, RelError> {
        // A pinned session does not see tables created after its SCN.
        if self.scn.is_none_or(|scn| table.timestamp <= scn) {
            self.local = Arc::new(self.local.add_table(table.clone())?);
        } else {
            table.validate()?;
        }
        self.shared.add_table(table)?;
        Ok(self.current())
    }

    pub fn add_column(
        &mut self,
        table_name: &str,
        columns: Vec<ColumnDef>,
        timestamp: u64,
        sequence_number: u64,
        immutable_rows: bool,
    ) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.local = Arc::new(self.local.add_column(
            table_name,
            columns.clone(),
            timestamp,
            sequence_number,
            immutable_rows,
        )?);
        self.shared
            .add_column(table_name, columns, timestamp, sequence_number, immutable_rows)?;
        Ok(self.current())
    }

    pub fn remove_table(&mut self, table_name: &str) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.local = Arc::new(self.local.remove_table(table_name)?);
        self.shared.remove_table(table_name)?;
        Ok(self.current())
    }

    pub fn remove_column(
        &mut self,
        table_name: &str,
        column_name: &str,
        timestamp: u64,
        sequence_number: u64,
    ) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.local = Arc::new(self.local.remove_column(
            table_name,
            column_name,
            timestamp,
            sequence_number,
        )?);
        self.shared
            .remove_column(table_name, column_name, timestamp, sequence_number)?;
        Ok(self.current())
    }

    pub fn update_index_state(
        &mut self,
        table_name: &str,
        index_name: &str,
        state: IndexState,
    ) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.local = Arc::new(self.local.update_index_state(table_name, index_name, state)?);
        self.shared.update_index_state(table_name, index_name, state)?;
        Ok(self.current())
    }
}
