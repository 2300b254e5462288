use crate::catalog::MetadataSnapshot;
use crate::error::RelError;
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded arena of published metadata snapshots, addressed by version.
#[derive(Debug, Clone)]
pub struct MetadataVersionStore {
    versions: VecDeque<Arc<MetadataSnapshot>>,
    max_versions: usize,
}

impl MetadataVersionStore {
    pub fn new(max_versions: usize) -> Self {
        Self {
            versions: VecDeque::new(),
            max_versions: max_versions.max(1),
        }
    }

    pub fn bootstrap(&mut self, snapshot: Arc<MetadataSnapshot>) {
        self.versions.clear();
        self.versions.push_back(snapshot);
    }

    pub fn publish(&mut self, snapshot: Arc<MetadataSnapshot>) {
        if let Some(existing) = self
            .versions
            .iter_mut()
            .find(|v| v.version() == snapshot.version())
        {
            *existing = snapshot;
            return;
        }
        self.versions.push_back(snapshot);
        self.prune();
    }

    pub fn oldest_version(&self) -> u64 {
        self.versions.front().map(|v| v.version()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn acquire_at_version(&self, version: u64) -> Result<Arc<MetadataSnapshot>, RelError> {
        if let Some(found) = self.versions.iter().find(|v| v.version() == version) {
            return Ok(Arc::clone(found));
        }
        let oldest = self.oldest_version();
        let newest = self.versions.back().map(|v| v.version()).unwrap_or(0);
        if version < oldest {
            return Err(RelError::Validation(format!(
                "requested metadata version {version} has been pruned (oldest retained: {oldest})"
            )));
        }
        if version > newest {
            return Err(RelError::Validation(format!(
                "requested metadata version {version} is not yet published (latest: {newest})"
            )));
        }
        Err(RelError::Validation(format!(
            "requested metadata version {version} not found"
        )))
    }

    fn prune(&mut self) {
        while self.versions.len() > self.max_versions {
            self.versions.pop_front();
        }
    }
}
