use crate::catalog::types::ColumnType;
use crate::error::{RelError, ResourceType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Placement of NULL values within one indexed column, independent of
/// [`SortOrder`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum NullOrdering {
    #[default]
    First,
    Last,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: String,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub nulls: NullOrdering,
}

impl IndexColumn {
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Asc,
            nulls: NullOrdering::First,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Desc,
            nulls: NullOrdering::First,
        }
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = NullOrdering::Last;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum IndexState {
    Building,
    #[default]
    Active,
    Inactive,
    Disabled,
}

impl IndexState {
    /// Disabled indexes receive no writes; every other state is kept current.
    pub fn is_maintained(self) -> bool {
        !matches!(self, IndexState::Disabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub index_name: String,
    pub columns: Vec<IndexColumn>,
    #[serde(default)]
    pub include_columns: Vec<String>,
    #[serde(default)]
    pub state: IndexState,
}

impl IndexDescriptor {
    pub fn new(index_name: impl Into<String>, columns: Vec<IndexColumn>) -> Self {
        Self {
            index_name: index_name.into(),
            columns,
            include_columns: Vec::new(),
            state: IndexState::Active,
        }
    }

    pub fn including(mut self, columns: &[&str]) -> Self {
        self.include_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn keys_on(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }

    /// Cell order of an index row: indexed columns, then the base primary key,
    /// then included columns. A name appears once.
    pub fn row_layout(&self, table: &TableDescriptor) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let names = self
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .chain(table.primary_key.iter().map(String::as_str))
            .chain(self.include_columns.iter().map(String::as_str));
        for name in names {
            if seen.insert(name) {
                out.push(name.to_string());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableDescriptor {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
    #[serde(default)]
    pub immutable_rows: bool,
    pub timestamp: u64,
    pub sequence_number: u64,
}

impl TableDescriptor {
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<ColumnDef>,
        primary_key: &[&str],
        timestamp: u64,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            indexes: Vec::new(),
            immutable_rows: false,
            timestamp,
            sequence_number: 0,
        }
    }

    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_immutable_rows(mut self, immutable_rows: bool) -> Self {
        self.immutable_rows = immutable_rows;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.index_name == name)
    }

    pub fn maintained_indexes(&self) -> impl Iterator<Item = &IndexDescriptor> {
        self.indexes.iter().filter(|i| i.state.is_maintained())
    }

    pub fn is_primary_key_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|c| c == name)
    }

    pub fn validate(&self) -> Result<(), RelError> {
        if self.table_name.trim().is_empty() {
            return Err(RelError::Validation("table name must not be empty".into()));
        }
        if self.primary_key.is_empty() {
            return Err(RelError::Validation(format!(
                "table '{}' must declare a primary key",
                self.table_name
            )));
        }
        let mut names = BTreeSet::new();
        for column in &self.columns {
            if !names.insert(column.name.as_str()) {
                return Err(RelError::AlreadyExists {
                    resource_type: ResourceType::Column,
                    resource_id: format!("{}.{}", self.table_name, column.name),
                });
            }
        }
        for pk in &self.primary_key {
            if !names.contains(pk.as_str()) {
                return Err(self.column_not_found(pk));
            }
        }
        let mut index_names = BTreeSet::new();
        for index in &self.indexes {
            if !index_names.insert(index.index_name.as_str()) {
                return Err(RelError::AlreadyExists {
                    resource_type: ResourceType::Index,
                    resource_id: format!("{}.{}", self.table_name, index.index_name),
                });
            }
            if index.columns.is_empty() {
                return Err(RelError::Validation(format!(
                    "index '{}' must key on at least one column",
                    index.index_name
                )));
            }
            let referenced = index
                .columns
                .iter()
                .map(|c| &c.name)
                .chain(index.include_columns.iter());
            for column in referenced {
                if !names.contains(column.as_str()) {
                    return Err(self.column_not_found(column));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn column_not_found(&self, column: &str) -> RelError {
        RelError::NotFound {
            resource_type: ResourceType::Column,
            resource_id: format!("{}.{}", self.table_name, column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnDef, IndexColumn, IndexDescriptor, IndexState, TableDescriptor};
    use crate::catalog::types::ColumnType;
    use crate::error::RelErrorCode;

    fn table() -> TableDescriptor {
        TableDescriptor::new(
            "t",
            vec![
                ColumnDef::new("k", ColumnType::Text, false),
                ColumnDef::new("v1", ColumnType::Text, true),
                ColumnDef::new("v2", ColumnType::Integer, true),
            ],
            &["k"],
            1,
        )
    }

    #[test]
    fn row_layout_orders_indexed_then_pk_then_included() {
        let index = IndexDescriptor::new("i", vec![IndexColumn::asc("v1")]).including(&["v2"]);
        assert_eq!(index.row_layout(&table()), vec!["v1", "k", "v2"]);
    }

    #[test]
    fn validate_rejects_index_on_unknown_column() {
        let t = table().with_index(IndexDescriptor::new("i", vec![IndexColumn::asc("nope")]));
        let err = t.validate().expect_err("unknown column");
        assert_eq!(err.code(), RelErrorCode::ColumnNotFound);
    }

    #[test]
    fn disabled_index_is_not_maintained() {
        let mut index = IndexDescriptor::new("i", vec![IndexColumn::asc("v1")]);
        index.state = IndexState::Disabled;
        let t = table().with_index(index);
        assert_eq!(t.maintained_indexes().count(), 0);
    }
}
