pub mod cache;
pub mod schema;
pub mod types;

use crate::catalog::schema::{ColumnDef, IndexState, TableDescriptor};
use crate::error::{RelError, ResourceType};
use im::{OrdMap, Vector};
use std::sync::Arc;

/// Immutable view of every table definition known at one version.
///
/// Mutators never touch `self`: each returns a new snapshot sharing structure
/// with its parent, so a reader holding an older snapshot keeps a consistent
/// view for as long as it likes.
///
/// Alongside the current definitions the snapshot keeps every definition a
/// table had before, so [`prune_to_timestamp`](Self::prune_to_timestamp) can
/// reconstruct the table as it stood at any earlier timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSnapshot {
    version: u64,
    as_of: Option<u64>,
    tables: OrdMap<String, Arc<TableDescriptor>>,
    // Oldest first; never holds an entry for a table missing from `tables`.
    superseded: OrdMap<String, Vector<Arc<TableDescriptor>>>,
}

impl MetadataSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rebuilds a snapshot from descriptor payloads read back from storage.
    pub fn from_payloads<B: AsRef<[u8]>>(payloads: &[B]) -> Result<Self, RelError> {
        let mut snapshot = Self::empty();
        for payload in payloads {
            let table = descriptor_from_payload(payload.as_ref())?;
            snapshot = snapshot.add_table(table)?;
        }
        Ok(snapshot)
    }

    /// Version of the published snapshot this one was built from. A
    /// historical view shares the version of its source; `as_of` tells the
    /// two apart.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Timestamp a historical view was pruned to, `None` for a full snapshot.
    /// Historical views are never published, so only full snapshots are
    /// addressable by version.
    pub fn as_of(&self) -> Option<u64> {
        self.as_of
    }

    /// Earlier definitions of `name`, oldest first.
    pub fn superseded(&self, name: &str) -> impl Iterator<Item = &Arc<TableDescriptor>> {
        self.superseded.get(name).into_iter().flat_map(|older| older.iter())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&Arc<TableDescriptor>> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableDescriptor>> {
        self.tables.values()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn get_table(&self, name: &str) -> Result<&Arc<TableDescriptor>, RelError> {
        self.tables
            .get(name)
            .ok_or_else(|| RelError::table_not_found(name))
    }

    fn successor(
        &self,
        tables: OrdMap<String, Arc<TableDescriptor>>,
        superseded: OrdMap<String, Vector<Arc<TableDescriptor>>>,
    ) -> Self {
        Self {
            version: self.version + 1,
            as_of: self.as_of,
            tables,
            superseded,
        }
    }

    /// Installs `table` as the current definition and moves the one it
    /// replaces into the table's history.
    fn redefine(&self, table: TableDescriptor) -> Self {
        let name = table.table_name.clone();
        let mut superseded = self.superseded.clone();
        if let Some(previous) = self.tables.get(&name) {
            let mut older = superseded.get(&name).cloned().unwrap_or_default();
            older.push_back(Arc::clone(previous));
            superseded.insert(name.clone(), older);
        }
        self.successor(self.tables.update(name, Arc::new(table)), superseded)
    }

    /// Inserts `table`, replacing any existing definition of the same name.
    pub fn add_table(&self, table: TableDescriptor) -> Result<Self, RelError> {
        table.validate()?;
        Ok(self.redefine(table))
    }

    pub fn add_column(
        &self,
        table_name: &str,
        columns: Vec<ColumnDef>,
        timestamp: u64,
        sequence_number: u64,
        immutable_rows: bool,
    ) -> Result<Self, RelError> {
        let existing = self.get_table(table_name)?;
        check_newer(existing, sequence_number)?;
        let mut table = (**existing).clone();
        for column in columns {
            if table.has_column(&column.name) {
                return Err(RelError::AlreadyExists {
                    resource_type: ResourceType::Column,
                    resource_id: format!("{table_name}.{}", column.name),
                });
            }
            table.columns.push(column);
        }
        table.timestamp = timestamp;
        table.sequence_number = sequence_number;
        table.immutable_rows = immutable_rows;
        Ok(self.redefine(table))
    }

    pub fn remove_table(&self, table_name: &str) -> Result<Self, RelError> {
        if !self.tables.contains_key(table_name) {
            return Err(RelError::table_not_found(table_name));
        }
        Ok(self.successor(
            self.tables.without(table_name),
            self.superseded.without(table_name),
        ))
    }

    /// Drops `column_name`. Indexes keyed on the column are dropped with it;
    /// indexes that only include it lose the inclusion.
    pub fn remove_column(
        &self,
        table_name: &str,
        column_name: &str,
        timestamp: u64,
        sequence_number: u64,
    ) -> Result<Self, RelError> {
        let existing = self.get_table(table_name)?;
        check_newer(existing, sequence_number)?;
        if !existing.has_column(column_name) {
            return Err(existing.column_not_found(column_name));
        }
        if existing.is_primary_key_column(column_name) {
            return Err(RelError::Validation(format!(
                "cannot drop primary key column '{column_name}' from '{table_name}'"
            )));
        }
        let mut table = (**existing).clone();
        table.columns.retain(|c| c.name != column_name);
        table.indexes.retain(|i| !i.keys_on(column_name));
        for index in &mut table.indexes {
            index.include_columns.retain(|c| c != column_name);
        }
        table.timestamp = timestamp;
        table.sequence_number = sequence_number;
        Ok(self.redefine(table))
    }

    pub fn update_index_state(
        &self,
        table_name: &str,
        index_name: &str,
        state: IndexState,
    ) -> Result<Self, RelError> {
        let existing = self.get_table(table_name)?;
        let mut table = (**existing).clone();
        let index = table
            .indexes
            .iter_mut()
            .find(|i| i.index_name == index_name)
            .ok_or_else(|| RelError::NotFound {
                resource_type: ResourceType::Index,
                resource_id: format!("{table_name}.{index_name}"),
            })?;
        // Index state is not versioned by timestamp; the current definition
        // changes in place.
        index.state = state;
        let tables = self.tables.update(table_name.to_string(), Arc::new(table));
        Ok(self.successor(tables, self.superseded.clone()))
    }

    /// Historical view as of `timestamp`: each table appears with the newest
    /// definition whose timestamp is `<= timestamp`, and tables with no such
    /// definition are left out.
    pub fn prune_to_timestamp(&self, timestamp: u64) -> Self {
        let mut tables = OrdMap::new();
        let mut superseded = OrdMap::new();
        for (name, current) in self.tables.iter() {
            let mut chain: Vec<&Arc<TableDescriptor>> = self.superseded(name).collect();
            chain.push(current);
            let Some(pos) = chain.iter().rposition(|t| t.timestamp <= timestamp) else {
                continue;
            };
            tables.insert(name.clone(), Arc::clone(chain[pos]));
            let older: Vector<Arc<TableDescriptor>> = chain[..pos]
                .iter()
                .filter(|t| t.timestamp <= timestamp)
                .map(|t| Arc::clone(*t))
                .collect();
            if !older.is_empty() {
                superseded.insert(name.clone(), older);
            }
        }
        Self {
            version: self.version,
            as_of: Some(self.as_of.map_or(timestamp, |earlier| earlier.min(timestamp))),
            tables,
            superseded,
        }
    }
}

fn check_newer(existing: &TableDescriptor, sequence_number: u64) -> Result<(), RelError> {
    if sequence_number <= existing.sequence_number {
        return Err(RelError::StaleMetadata {
            table: existing.table_name.clone(),
            stored: existing.sequence_number,
            attempted: sequence_number,
        });
    }
    Ok(())
}

pub fn descriptor_payload(table: &TableDescriptor) -> Result<Vec<u8>, RelError> {
    rmp_serde::to_vec(table).map_err(|e| RelError::Encode(e.to_string()))
}

pub fn descriptor_from_payload(bytes: &[u8]) -> Result<TableDescriptor, RelError> {
    rmp_serde::from_slice(bytes).map_err(|e| RelError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{MetadataSnapshot, descriptor_payload};
    use crate::catalog::schema::{
        ColumnDef, IndexColumn, IndexDescriptor, IndexState, TableDescriptor,
    };
    use crate::catalog::types::ColumnType;
    use crate::error::{RelError, RelErrorCode};
    use proptest::prelude::*;

    fn table(name: &str, ts: u64) -> TableDescriptor {
        TableDescriptor::new(
            name,
            vec![
                ColumnDef::new("k", ColumnType::Text, false),
                ColumnDef::new("v1", ColumnType::Text, true),
                ColumnDef::new("v2", ColumnType::Text, true),
            ],
            &["k"],
            ts,
        )
        .with_index(IndexDescriptor::new("i_v1", vec![IndexColumn::asc("v1")]).including(&["v2"]))
    }

    #[test]
    fn add_table_leaves_parent_snapshot_untouched() {
        let base = MetadataSnapshot::empty();
        let next = base.add_table(table("t", 10)).expect("add");
        assert!(base.is_empty());
        assert_eq!(next.len(), 1);
        assert_eq!(next.version(), base.version() + 1);
    }

    #[test]
    fn add_table_replaces_existing_definition() {
        let snap = MetadataSnapshot::empty()
            .add_table(table("t", 10))
            .expect("add")
            .add_table(table("t", 20).with_immutable_rows(true))
            .expect("replace");
        let t = snap.get_table("t").expect("table");
        assert_eq!(t.timestamp, 20);
        assert!(t.immutable_rows);
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn add_column_requires_newer_sequence_number() {
        let snap = MetadataSnapshot::empty().add_table(table("t", 10)).expect("add");
        let snap = snap
            .add_column("t", vec![ColumnDef::new("v3", ColumnType::Integer, true)], 11, 1, false)
            .expect("first alter");
        let err = snap
            .add_column("t", vec![ColumnDef::new("v4", ColumnType::Integer, true)], 12, 1, false)
            .expect_err("same seq must be stale");
        assert!(matches!(
            err,
            RelError::StaleMetadata {
                stored: 1,
                attempted: 1,
                ..
            }
        ));
        let t = snap.get_table("t").expect("table");
        assert!(t.has_column("v3"));
        assert!(!t.has_column("v4"));
    }

    #[test]
    fn mutators_report_missing_table() {
        let snap = MetadataSnapshot::empty();
        let cases = [
            snap.add_column("nope", Vec::new(), 1, 1, false).expect_err("add col"),
            snap.remove_table("nope").expect_err("remove table"),
            snap.remove_column("nope", "v1", 1, 1).expect_err("remove col"),
            snap.update_index_state("nope", "i", IndexState::Disabled)
                .expect_err("index state"),
        ];
        for err in cases {
            assert_eq!(err.code(), RelErrorCode::TableNotFound);
        }
    }

    #[test]
    fn remove_column_drops_dependent_indexes() {
        let snap = MetadataSnapshot::empty().add_table(table("t", 10)).expect("add");
        let dropped_include = snap.remove_column("t", "v2", 11, 1).expect("drop v2");
        let t = dropped_include.get_table("t").expect("table");
        assert!(t.index("i_v1").expect("index kept").include_columns.is_empty());

        let dropped_key = snap.remove_column("t", "v1", 11, 1).expect("drop v1");
        assert!(dropped_key.get_table("t").expect("table").indexes.is_empty());

        let err = snap.remove_column("t", "k", 11, 1).expect_err("pk column");
        assert_eq!(err.code(), RelErrorCode::Validation);
    }

    #[test]
    fn prune_keeps_only_tables_at_or_before_timestamp() {
        let snap = MetadataSnapshot::empty()
            .add_table(table("a", 5))
            .and_then(|s| s.add_table(table("b", 10)))
            .and_then(|s| s.add_table(table("c", 15)))
            .expect("build");
        let pruned = snap.prune_to_timestamp(10);
        assert_eq!(pruned.table_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn altered_table_keeps_its_earlier_definition_for_history() {
        let snap = MetadataSnapshot::empty()
            .add_table(table("t", 10))
            .and_then(|s| {
                s.add_column("t", vec![ColumnDef::new("w", ColumnType::Integer, true)], 20, 1, false)
            })
            .and_then(|s| s.remove_column("t", "v2", 30, 2))
            .expect("build");

        assert!(snap.prune_to_timestamp(5).is_empty());
        let before_alter = snap.prune_to_timestamp(15);
        assert_eq!(**before_alter.get_table("t").expect("t at 15"), table("t", 10));
        let after_add = snap.prune_to_timestamp(25);
        let t = after_add.get_table("t").expect("t at 25");
        assert!(t.has_column("w") && t.has_column("v2"));
        let latest = snap.prune_to_timestamp(30);
        assert_eq!(latest.get_table("t"), snap.get_table("t"));

        // A view pruned twice reads the same as one pruned once.
        let nested = after_add.prune_to_timestamp(15);
        assert_eq!(nested.get_table("t"), before_alter.get_table("t"));
        assert_eq!(nested.as_of(), Some(15));
    }

    #[test]
    fn removed_table_takes_its_history_with_it() {
        let snap = MetadataSnapshot::empty()
            .add_table(table("t", 10))
            .and_then(|s| s.add_table(table("t", 20)))
            .and_then(|s| s.remove_table("t"))
            .expect("build");
        assert!(snap.prune_to_timestamp(15).is_empty());
        assert_eq!(snap.superseded("t").count(), 0);
    }

    #[test]
    fn pruned_view_is_marked_with_its_timestamp() {
        let snap = MetadataSnapshot::empty().add_table(table("a", 5)).expect("add");
        assert_eq!(snap.as_of(), None);
        let pruned = snap.prune_to_timestamp(3);
        assert_eq!(pruned.version(), snap.version());
        assert_eq!(pruned.as_of(), Some(3));
        assert_ne!(pruned, snap);
    }

    #[test]
    fn snapshot_rebuilds_from_payloads() {
        let payloads = vec![
            descriptor_payload(&table("a", 1)).expect("encode a"),
            descriptor_payload(&table("b", 2)).expect("encode b"),
        ];
        let snap = MetadataSnapshot::from_payloads(&payloads).expect("rebuild");
        assert_eq!(**snap.get_table("b").expect("b"), table("b", 2));
    }

    #[derive(Debug, Clone)]
    enum Ddl {
        Create(String, u64),
        AddColumn(String, String, u64, u64),
        RemoveColumn(String, String, u64, u64),
    }

    impl Ddl {
        fn timestamp(&self) -> u64 {
            match self {
                Ddl::Create(_, ts) | Ddl::AddColumn(_, _, ts, _) | Ddl::RemoveColumn(_, _, ts, _) => {
                    *ts
                }
            }
        }

        // Operations the snapshot rejects leave it unchanged.
        fn apply(&self, snap: MetadataSnapshot) -> MetadataSnapshot {
            let next = match self {
                Ddl::Create(name, ts) => snap.add_table(table(name, *ts)),
                Ddl::AddColumn(name, column, ts, seq) => snap.add_column(
                    name,
                    vec![ColumnDef::new(column.clone(), ColumnType::Integer, true)],
                    *ts,
                    *seq,
                    false,
                ),
                Ddl::RemoveColumn(name, column, ts, seq) => {
                    snap.remove_column(name, column, *ts, *seq)
                }
            };
            next.unwrap_or(snap)
        }
    }

    fn ddl_history(ops: Vec<(u8, u8, u64)>) -> Vec<Ddl> {
        let mut ts = 0u64;
        ops.into_iter()
            .enumerate()
            .map(|(i, (kind, name_idx, delta))| {
                ts += delta;
                let name = format!("t{name_idx}");
                let seq = i as u64 + 1;
                match kind {
                    0 => Ddl::Create(name, ts),
                    1 => Ddl::AddColumn(name, format!("c{i}"), ts, seq),
                    _ => {
                        let column = if i % 2 == 0 { "v2".to_string() } else { format!("c{}", i - 1) };
                        Ddl::RemoveColumn(name, column, ts, seq)
                    }
                }
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prune_matches_replaying_timestamp_prefix(
            ops in prop::collection::vec((0u8..3, 0u8..4, 0u64..6), 0..32),
            cutoff in 0u64..100,
        ) {
            let ddl = ddl_history(ops);
            let full = ddl.iter().fold(MetadataSnapshot::empty(), |snap, op| op.apply(snap));
            let prefix = ddl
                .iter()
                .filter(|op| op.timestamp() <= cutoff)
                .fold(MetadataSnapshot::empty(), |snap, op| op.apply(snap));

            let pruned = full.prune_to_timestamp(cutoff);
            prop_assert!(pruned.tables().all(|t| t.timestamp <= cutoff));
            prop_assert_eq!(pruned.table_names(), prefix.table_names());
            for name in prefix.table_names() {
                prop_assert_eq!(pruned.table(&name), prefix.table(&name));
            }
        }
    }
}
