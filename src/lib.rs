pub mod catalog;
pub mod commit;
pub mod config;
pub mod error;
pub mod sequence;
pub mod storage;
pub mod version_store;

use crate::catalog::MetadataSnapshot;
use crate::catalog::cache::{SessionMetadata, SharedMetadataCache};
use crate::catalog::schema::{ColumnDef, IndexState, TableDescriptor};
use crate::catalog::types::Value;
use crate::commit::batch::RowChange;
use crate::commit::{CommitOutcome, MutationAccumulator};
use crate::config::RelConfig;
use crate::error::RelError;
use crate::sequence::{SequenceKey, SequenceOutcome, SequenceService};
use crate::storage::backend::StorageBackend;
use std::sync::Arc;
use tracing::debug;

/// Services shared by every session against one storage backend: the shared
/// metadata tier and the sequence service.
pub struct CoreServices {
    config: RelConfig,
    metadata: Arc<SharedMetadataCache>,
    sequences: Arc<SequenceService>,
    backend: Arc<dyn StorageBackend>,
}

impl CoreServices {
    pub fn new(config: RelConfig, backend: Arc<dyn StorageBackend>) -> Result<Self, RelError> {
        Self::with_metadata(config, backend, MetadataSnapshot::empty())
    }

    pub fn with_metadata(
        config: RelConfig,
        backend: Arc<dyn StorageBackend>,
        initial: MetadataSnapshot,
    ) -> Result<Self, RelError> {
        config.validate()?;
        Ok(Self {
            metadata: Arc::new(SharedMetadataCache::new(
                initial,
                config.max_metadata_versions,
            )),
            sequences: Arc::new(SequenceService::new(config.default_sequence_cache_size)),
            backend,
            config,
        })
    }

    /// Starts from table descriptors previously written with
    /// [`catalog::descriptor_payload`].
    pub fn from_payloads<B: AsRef<[u8]>>(
        config: RelConfig,
        backend: Arc<dyn StorageBackend>,
        payloads: &[B],
    ) -> Result<Self, RelError> {
        let initial = MetadataSnapshot::from_payloads(payloads)?;
        Self::with_metadata(config, backend, initial)
    }

    pub fn config(&self) -> &RelConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<SharedMetadataCache> {
        &self.metadata
    }

    pub fn sequences(&self) -> &Arc<SequenceService> {
        &self.sequences
    }

    /// Opens a session. With `scn` set the session sees metadata as of that
    /// timestamp.
    pub fn connect(&self, tenant_id: Option<&str>, scn: Option<u64>) -> Session {
        debug!(tenant = ?tenant_id, scn = ?scn, "session opened");
        Session {
            tenant_id: tenant_id.map(str::to_string),
            metadata: SessionMetadata::new(Arc::clone(&self.metadata), scn),
            accumulator: MutationAccumulator::new(self.config.max_mutation_size),
            sequences: Arc::clone(&self.sequences),
            backend: Arc::clone(&self.backend),
            closed: false,
        }
    }
}

/// One client connection: a metadata overlay, a pending batch, and
/// tenant-scoped access to sequences. Owned by a single thread at a time.
pub struct Session {
    tenant_id: Option<String>,
    metadata: SessionMetadata,
    accumulator: MutationAccumulator,
    sequences: Arc<SequenceService>,
    backend: Arc<dyn StorageBackend>,
    closed: bool,
}

impl Session {
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn scn(&self) -> Option<u64> {
        self.metadata.scn()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn metadata(&self) -> Arc<MetadataSnapshot> {
        self.metadata.current()
    }

    pub fn snapshot_at(&self, timestamp: u64) -> MetadataSnapshot {
        self.metadata.snapshot_at(timestamp)
    }

    /// New session for the same tenant whose metadata is pinned at `scn`.
    /// Its batch starts empty.
    pub fn at_timestamp(&self, scn: u64) -> Session {
        Session {
            tenant_id: self.tenant_id.clone(),
            metadata: self.metadata.at_timestamp(scn),
            accumulator: MutationAccumulator::new(self.accumulator.max_mutation_size()),
            sequences: Arc::clone(&self.sequences),
            backend: Arc::clone(&self.backend),
            closed: false,
        }
    }

    pub fn refresh_metadata(&mut self) {
        self.metadata.refresh();
    }

    pub fn add_table(
        &mut self,
        table: TableDescriptor,
    ) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.ensure_open()?;
        self.metadata.add_table(table)
    }

    pub fn add_column(
        &mut self,
        table_name: &str,
        columns: Vec<ColumnDef>,
        timestamp: u64,
        sequence_number: u64,
        immutable_rows: bool,
    ) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.ensure_open()?;
        self.metadata
            .add_column(table_name, columns, timestamp, sequence_number, immutable_rows)
    }

    pub fn remove_table(&mut self, table_name: &str) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.ensure_open()?;
        self.metadata.remove_table(table_name)
    }

    pub fn remove_column(
        &mut self,
        table_name: &str,
        column_name: &str,
        timestamp: u64,
        sequence_number: u64,
    ) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.ensure_open()?;
        self.metadata
            .remove_column(table_name, column_name, timestamp, sequence_number)
    }

    pub fn update_index_state(
        &mut self,
        table_name: &str,
        index_name: &str,
        state: IndexState,
    ) -> Result<Arc<MetadataSnapshot>, RelError> {
        self.ensure_open()?;
        self.metadata
            .update_index_state(table_name, index_name, state)
    }

    pub fn stage(&mut self, change: RowChange) -> Result<(), RelError> {
        self.ensure_open()?;
        self.accumulator.stage(change);
        Ok(())
    }

    pub fn upsert(
        &mut self,
        table: &str,
        primary_key: Vec<Value>,
        cells: Vec<(&str, Value)>,
    ) -> Result<(), RelError> {
        let cells = cells
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        self.stage(RowChange::upsert(table, primary_key, cells))
    }

    pub fn delete(&mut self, table: &str, primary_key: Vec<Value>) -> Result<(), RelError> {
        self.stage(RowChange::delete(table, primary_key))
    }

    pub fn pending_changes(&self) -> usize {
        self.accumulator.len()
    }

    pub fn commit(&mut self) -> Result<CommitOutcome, RelError> {
        self.ensure_open()?;
        let snapshot = self.metadata.current();
        self.accumulator.commit(&snapshot, self.backend.as_ref())
    }

    pub fn rollback(&mut self) -> usize {
        self.accumulator.rollback()
    }

    /// Discards pending changes and refuses further work.
    pub fn close(&mut self) -> usize {
        let discarded = self.accumulator.rollback();
        if !self.closed {
            debug!(tenant = ?self.tenant_id, discarded, "session closed");
        }
        self.closed = true;
        discarded
    }

    /// Key for a sequence owned by this session's tenant.
    pub fn sequence_key(&self, schema: Option<&str>, name: &str) -> SequenceKey {
        SequenceKey::new(schema, name).for_tenant(self.tenant_id.as_deref())
    }

    pub fn create_sequence(
        &self,
        key: &SequenceKey,
        start_with: i64,
        increment_by: i64,
        cache_size: u32,
        timestamp: u64,
    ) -> Result<u64, RelError> {
        self.ensure_open()?;
        self.sequences
            .create(key, start_with, increment_by, cache_size, timestamp)
    }

    pub fn drop_sequence(&self, key: &SequenceKey, timestamp: u64) -> Result<u64, RelError> {
        self.ensure_open()?;
        self.sequences.drop_sequence(key, timestamp)
    }

    pub fn reserve_sequences(
        &self,
        keys: &[SequenceKey],
        timestamp: u64,
    ) -> Result<Vec<SequenceOutcome>, RelError> {
        self.ensure_open()?;
        Ok(self.sequences.reserve(keys, timestamp))
    }

    pub fn increment_sequences(
        &self,
        keys: &[SequenceKey],
        timestamp: u64,
    ) -> Result<Vec<SequenceOutcome>, RelError> {
        self.ensure_open()?;
        Ok(self.sequences.increment(keys, timestamp))
    }

    pub fn current_sequence_value(
        &self,
        key: &SequenceKey,
        timestamp: u64,
    ) -> Result<i64, RelError> {
        self.ensure_open()?;
        self.sequences.current_value(key, timestamp)
    }

    fn ensure_open(&self) -> Result<(), RelError> {
        if self.closed {
            return Err(RelError::SessionClosed);
        }
        Ok(())
    }
}
