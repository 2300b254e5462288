use crate::catalog::types::Value;
use crate::error::RelError;
use crate::storage::encoded_key::EncodedKey;
use std::collections::BTreeMap;

/// Column values of one stored row, keyed by column name.
pub type RowState = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Writes `cells` into the row at `key`, keeping cells not named here.
    Put {
        table: String,
        key: EncodedKey,
        cells: Vec<(String, Value)>,
    },
    /// Removes the whole row at `key`.
    Delete { table: String, key: EncodedKey },
}

impl Mutation {
    pub fn key(&self) -> &EncodedKey {
        match self {
            Mutation::Put { key, .. } | Mutation::Delete { key, .. } => key,
        }
    }
}

/// One atomic unit handed to [`StorageBackend::apply`]. Mutations apply in
/// order: data rows first, then index rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationSet {
    pub data: Vec<Mutation>,
    pub index: Vec<Mutation>,
}

impl MutationSet {
    pub fn len(&self) -> usize {
        self.data.len() + self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.data.iter().chain(self.index.iter())
    }
}

/// Storage collaborator the commit path writes through.
pub trait StorageBackend: Send + Sync {
    /// Applies every mutation or none of them.
    fn apply(&self, mutations: &MutationSet) -> Result<(), RelError>;

    /// Reads the committed state of one row, `None` when the row is absent.
    fn read_current_row(&self, table: &str, key: &EncodedKey)
    -> Result<Option<RowState>, RelError>;
}
