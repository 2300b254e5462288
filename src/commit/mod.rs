pub mod batch;

use crate::catalog::MetadataSnapshot;
use crate::catalog::schema::TableDescriptor;
use crate::catalog::types::Value;
use crate::commit::batch::{ChangeKind, FoldedRow, NetChange, PendingMutationBatch, RowChange};
use crate::error::RelError;
use crate::storage::backend::{Mutation, MutationSet, StorageBackend};
use crate::storage::encoded_key::EncodedKey;
use crate::storage::index::{derive_index_mutations, read_prior_row, with_primary_key};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub tables: usize,
    pub rows: usize,
    pub data_mutations: usize,
    pub index_mutations: usize,
}

/// Buffers a session's row changes and turns them into one atomic backend
/// write on commit.
///
/// The buffer survives every failed commit unchanged. Only a successful commit
/// or a rollback empties it.
#[derive(Debug, Clone)]
pub struct MutationAccumulator {
    batch: PendingMutationBatch,
    max_mutation_size: usize,
}

impl MutationAccumulator {
    pub fn new(max_mutation_size: usize) -> Self {
        Self {
            batch: PendingMutationBatch::new(),
            max_mutation_size,
        }
    }

    pub fn stage(&mut self, change: RowChange) {
        self.batch.push(change);
    }

    pub fn len(&self) -> usize {
        self.batch.staged_count()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn max_mutation_size(&self) -> usize {
        self.max_mutation_size
    }

    pub fn pending(&self) -> &PendingMutationBatch {
        &self.batch
    }

    /// Discards every staged change. Returns how many were dropped.
    pub fn rollback(&mut self) -> usize {
        self.batch.clear()
    }

    pub fn commit(
        &mut self,
        snapshot: &MetadataSnapshot,
        backend: &dyn StorageBackend,
    ) -> Result<CommitOutcome, RelError> {
        if self.batch.is_empty() {
            return Ok(CommitOutcome::default());
        }
        let staged = self.batch.staged_count();
        if staged > self.max_mutation_size {
            warn!(
                staged,
                limit = self.max_mutation_size,
                "commit rejected: batch exceeds mutation size limit"
            );
            return Err(RelError::MutationTooLarge {
                staged,
                limit: self.max_mutation_size,
            });
        }

        let (mutations, mut outcome) = match build_mutation_set(&self.batch, snapshot, backend) {
            Ok(built) => built,
            Err(err) => {
                warn!(error = %err, staged, "commit rejected while deriving mutations");
                return Err(err);
            }
        };
        if let Err(err) = backend.apply(&mutations) {
            warn!(error = %err, staged, "backend rejected commit");
            return Err(match err {
                RelError::Backend(_) => err,
                other => RelError::Backend(other.to_string()),
            });
        }

        outcome.data_mutations = mutations.data.len();
        outcome.index_mutations = mutations.index.len();
        self.batch.clear();
        info!(
            tables = outcome.tables,
            rows = outcome.rows,
            data_mutations = outcome.data_mutations,
            index_mutations = outcome.index_mutations,
            "commit applied"
        );
        Ok(outcome)
    }
}

fn build_mutation_set(
    batch: &PendingMutationBatch,
    snapshot: &MetadataSnapshot,
    backend: &dyn StorageBackend,
) -> Result<(MutationSet, CommitOutcome), RelError> {
    // Every staged change is checked, including ones a later change to the
    // same key folds away.
    for change in batch.changes() {
        validate_change(snapshot.get_table(&change.table)?, change)?;
    }

    let mut set = MutationSet::default();
    let mut outcome = CommitOutcome::default();
    for (table_name, rows) in batch.fold() {
        let table = snapshot.get_table(&table_name)?;
        let indexed = table.maintained_indexes().next().is_some();
        for (encoded_pk, row) in &rows {
            push_data_mutations(&mut set, table, encoded_pk, row);
            if !indexed {
                continue;
            }
            let prior = if row.change.needs_prior_state(table.immutable_rows) {
                read_prior_row(backend, table, &row.primary_key, encoded_pk)?
            } else {
                None
            };
            let next = row
                .change
                .apply_to(prior.as_ref())
                .map(|r| with_primary_key(table, &row.primary_key, r));
            set.index.extend(derive_index_mutations(
                table,
                &row.primary_key,
                prior.as_ref(),
                next.as_ref(),
            ));
        }
        outcome.tables += 1;
        outcome.rows += rows.len();
    }
    Ok((set, outcome))
}

fn push_data_mutations(
    set: &mut MutationSet,
    table: &TableDescriptor,
    encoded_pk: &EncodedKey,
    row: &FoldedRow,
) {
    if matches!(row.change, NetChange::Delete | NetChange::Replace(_)) {
        set.data.push(Mutation::Delete {
            table: table.table_name.clone(),
            key: encoded_pk.clone(),
        });
    }
    if let Some(cols) = row.change.columns() {
        let cells = with_primary_key(table, &row.primary_key, cols.clone())
            .into_iter()
            .collect();
        set.data.push(Mutation::Put {
            table: table.table_name.clone(),
            key: encoded_pk.clone(),
            cells,
        });
    }
}

fn validate_change(table: &TableDescriptor, change: &RowChange) -> Result<(), RelError> {
    if change.primary_key.len() != table.primary_key.len() {
        return Err(RelError::Validation(format!(
            "table '{}' expects {} primary key values, got {}",
            table.table_name,
            table.primary_key.len(),
            change.primary_key.len()
        )));
    }
    for (name, value) in table.primary_key.iter().zip(&change.primary_key) {
        check_value(table, name, value)?;
        if value.is_null() {
            return Err(RelError::Validation(format!(
                "primary key column '{}.{name}' must not be null",
                table.table_name
            )));
        }
    }
    let ChangeKind::Upsert(cells) = &change.kind else {
        return Ok(());
    };
    for (name, value) in cells {
        check_value(table, name, value)?;
        if let Some(pos) = table.primary_key.iter().position(|pk| pk == name)
            && change.primary_key[pos] != *value
        {
            return Err(RelError::Validation(format!(
                "column '{}.{name}' is part of the primary key and cannot be changed",
                table.table_name
            )));
        }
    }
    Ok(())
}

fn check_value(table: &TableDescriptor, name: &str, value: &Value) -> Result<(), RelError> {
    let column = table
        .column(name)
        .ok_or_else(|| table.column_not_found(name))?;
    if !value.matches_type(column.col_type) {
        return Err(RelError::Validation(format!(
            "value for '{}.{name}' does not match column type {:?}",
            table.table_name, column.col_type
        )));
    }
    if value.is_null() && !column.nullable && !table.is_primary_key_column(name) {
        return Err(RelError::Validation(format!(
            "column '{}.{name}' is not nullable",
            table.table_name
        )));
    }
    Ok(())
}
