use crate::catalog::schema::{IndexDescriptor, TableDescriptor};
use crate::catalog::types::Value;
use crate::error::{RelError, ResourceType};
use crate::storage::backend::{Mutation, RowState, StorageBackend};
use crate::storage::encoded_key::{EncodedKey, KeyEncoder};
use crate::storage::keyspace::Keyspace;

/// Name of the physical table holding rows of `index` on `table`.
pub fn index_table_name(table: &str, index: &str) -> String {
    format!("{table}.{index}")
}

/// Fills the primary-key columns of `row` from `primary_key`, position by
/// position. Stored rows always carry their key columns.
pub fn with_primary_key(
    table: &TableDescriptor,
    primary_key: &[Value],
    mut row: RowState,
) -> RowState {
    for (name, value) in table.primary_key.iter().zip(primary_key) {
        row.insert(name.clone(), value.clone());
    }
    row
}

/// Index row key: indexed values in declared order and null placement, then
/// the ascending primary key so equal indexed values stay distinct.
pub fn index_row_key(
    index: &IndexDescriptor,
    encoded_pk: &EncodedKey,
    row: &RowState,
) -> EncodedKey {
    let values = index
        .columns
        .iter()
        .map(|column| row.get(&column.name).unwrap_or(&Value::Null));
    let mut encoder = index_key_encoder(index, values);
    encoder.push_key(encoded_pk);
    encoder.finish()
}

/// Key prefix shared by every row of `index` whose leading indexed columns
/// hold `values`.
pub fn index_key_prefix(index: &IndexDescriptor, values: &[Value]) -> EncodedKey {
    index_key_encoder(index, values.iter()).finish()
}

fn index_key_encoder<'a>(
    index: &IndexDescriptor,
    values: impl Iterator<Item = &'a Value>,
) -> KeyEncoder {
    let mut encoder = KeyEncoder::new();
    for (column, value) in index.columns.iter().zip(values) {
        encoder.push_ordered(value, column.order, column.nulls);
    }
    encoder
}

/// Index rows of `index_name` on `table` whose leading indexed columns equal
/// `values`, in index order. Fewer values than indexed columns match on the
/// prefix.
pub fn lookup_index(
    keyspace: &Keyspace,
    table: &TableDescriptor,
    index_name: &str,
    values: &[Value],
) -> Result<Vec<RowState>, RelError> {
    let index = table.index(index_name).ok_or_else(|| RelError::NotFound {
        resource_type: ResourceType::Index,
        resource_id: format!("{}.{index_name}", table.table_name),
    })?;
    if values.len() > index.columns.len() {
        return Err(RelError::Validation(format!(
            "index '{}.{index_name}' has {} columns, got {} lookup values",
            table.table_name,
            index.columns.len(),
            values.len()
        )));
    }
    let prefix = index_key_prefix(index, values);
    Ok(keyspace
        .scan_prefix(&index_table_name(&table.table_name, index_name), &prefix)
        .into_iter()
        .map(|(_, row)| row)
        .collect())
}

pub fn index_row_cells(
    table: &TableDescriptor,
    index: &IndexDescriptor,
    row: &RowState,
) -> Vec<(String, Value)> {
    index
        .row_layout(table)
        .into_iter()
        .map(|name| {
            let value = row.get(&name).cloned().unwrap_or(Value::Null);
            (name, value)
        })
        .collect()
}

/// Index rows that turn `prior` into `next` for every maintained index of
/// `table`. `None` on either side means the base row is absent.
///
/// Each affected index gets a delete of the old index row followed by a put of
/// the new one. Indexes whose key and cells are unchanged get nothing.
pub fn derive_index_mutations(
    table: &TableDescriptor,
    primary_key: &[Value],
    prior: Option<&RowState>,
    next: Option<&RowState>,
) -> Vec<Mutation> {
    let encoded_pk = EncodedKey::from_values(primary_key);
    let mut out = Vec::new();
    for index in table.maintained_indexes() {
        let before = prior.map(|row| {
            (
                index_row_key(index, &encoded_pk, row),
                index_row_cells(table, index, row),
            )
        });
        let after = next.map(|row| {
            (
                index_row_key(index, &encoded_pk, row),
                index_row_cells(table, index, row),
            )
        });
        if before == after {
            continue;
        }
        let physical = index_table_name(&table.table_name, &index.index_name);
        if let Some((key, _)) = before {
            out.push(Mutation::Delete {
                table: physical.clone(),
                key,
            });
        }
        if let Some((key, cells)) = after {
            out.push(Mutation::Put {
                table: physical,
                key,
                cells,
            });
        }
    }
    out
}

/// Reads the committed row the index delta is computed against. A failed read
/// leaves the delta unknowable, so it surfaces as `IndexInconsistent`.
pub fn read_prior_row(
    backend: &dyn StorageBackend,
    table: &TableDescriptor,
    primary_key: &[Value],
    encoded_pk: &EncodedKey,
) -> Result<Option<RowState>, RelError> {
    let index = table
        .maintained_indexes()
        .next()
        .map(|i| i.index_name.clone())
        .unwrap_or_default();
    match backend.read_current_row(&table.table_name, encoded_pk) {
        Ok(row) => Ok(row.map(|r| with_primary_key(table, primary_key, r))),
        Err(err) => Err(RelError::IndexInconsistent {
            table: table.table_name.clone(),
            index,
            reason: err.to_string(),
        }),
    }
}
