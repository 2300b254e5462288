use crate::catalog::types::Value;
use crate::storage::backend::RowState;
use crate::storage::encoded_key::EncodedKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeKind {
    /// Sets the named columns, leaving the others as they are. An explicit
    /// `Value::Null` is a write.
    Upsert(Vec<(String, Value)>),
    Delete,
}

/// One staged change to one row, in arrival order within its batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowChange {
    pub table: String,
    pub primary_key: Vec<Value>,
    pub kind: ChangeKind,
}

impl RowChange {
    pub fn upsert(
        table: impl Into<String>,
        primary_key: Vec<Value>,
        cells: Vec<(String, Value)>,
    ) -> Self {
        Self {
            table: table.into(),
            primary_key,
            kind: ChangeKind::Upsert(cells),
        }
    }

    pub fn delete(table: impl Into<String>, primary_key: Vec<Value>) -> Self {
        Self {
            table: table.into(),
            primary_key,
            kind: ChangeKind::Delete,
        }
    }
}

/// The single change a key's staged history collapses to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetChange {
    /// Patch over whatever row is stored.
    Upsert(BTreeMap<String, Value>),
    Delete,
    /// Drop the stored row, then write exactly these columns.
    Replace(BTreeMap<String, Value>),
}

impl NetChange {
    pub fn from_kind(kind: &ChangeKind) -> Self {
        match kind {
            ChangeKind::Upsert(cells) => NetChange::Upsert(cells.iter().cloned().collect()),
            ChangeKind::Delete => NetChange::Delete,
        }
    }

    /// Composes a later change onto this one.
    pub fn then(self, kind: &ChangeKind) -> Self {
        match (self, kind) {
            (_, ChangeKind::Delete) => NetChange::Delete,
            (NetChange::Upsert(mut cols), ChangeKind::Upsert(cells)) => {
                cols.extend(cells.iter().cloned());
                NetChange::Upsert(cols)
            }
            (NetChange::Replace(mut cols), ChangeKind::Upsert(cells)) => {
                cols.extend(cells.iter().cloned());
                NetChange::Replace(cols)
            }
            (NetChange::Delete, ChangeKind::Upsert(cells)) => {
                NetChange::Replace(cells.iter().cloned().collect())
            }
        }
    }

    /// Row state after this change lands on `prior`.
    pub fn apply_to(&self, prior: Option<&RowState>) -> Option<RowState> {
        match self {
            NetChange::Upsert(cols) => {
                let mut row = prior.cloned().unwrap_or_default();
                row.extend(cols.iter().map(|(k, v)| (k.clone(), v.clone())));
                Some(row)
            }
            NetChange::Delete => None,
            NetChange::Replace(cols) => Some(cols.clone()),
        }
    }

    pub fn columns(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            NetChange::Upsert(cols) | NetChange::Replace(cols) => Some(cols),
            NetChange::Delete => None,
        }
    }

    /// Whether the committed row must be known before index rows can be
    /// derived. An upsert into an immutable-rows table never replaces an
    /// existing index row.
    pub fn needs_prior_state(&self, immutable_rows: bool) -> bool {
        !(immutable_rows && matches!(self, NetChange::Upsert(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldedRow {
    pub primary_key: Vec<Value>,
    pub change: NetChange,
}

/// Staged changes of one session since its last commit or rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingMutationBatch {
    changes: Vec<RowChange>,
}

impl PendingMutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: RowChange) {
        self.changes.push(change);
    }

    pub fn staged_count(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[RowChange] {
        &self.changes
    }

    pub fn clear(&mut self) -> usize {
        let discarded = self.changes.len();
        self.changes.clear();
        discarded
    }

    /// Collapses the batch to one net change per (table, key), composing
    /// each key's changes in arrival order. Rows come back ordered by table,
    /// then by encoded primary key.
    pub fn fold(&self) -> BTreeMap<String, BTreeMap<EncodedKey, FoldedRow>> {
        let mut out: BTreeMap<String, BTreeMap<EncodedKey, FoldedRow>> = BTreeMap::new();
        for change in &self.changes {
            let rows = out.entry(change.table.clone()).or_default();
            let key = EncodedKey::from_values(&change.primary_key);
            match rows.remove(&key) {
                Some(folded) => {
                    rows.insert(
                        key,
                        FoldedRow {
                            primary_key: folded.primary_key,
                            change: folded.change.then(&change.kind),
                        },
                    );
                }
                None => {
                    rows.insert(
                        key,
                        FoldedRow {
                            primary_key: change.primary_key.clone(),
                            change: NetChange::from_kind(&change.kind),
                        },
                    );
                }
            }
        }
        out
    }
}
