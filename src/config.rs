use crate::error::RelError;

/// Runtime configuration shared by every session opened from one
/// [`CoreServices`](crate::CoreServices).
#[derive(Debug, Clone)]
pub struct RelConfig {
    /// Maximum number of staged row changes a single commit may carry.
    pub max_mutation_size: usize,
    /// Number of published metadata snapshots the shared cache retains.
    pub max_metadata_versions: usize,
    /// Cache size recorded for sequences created with a cache size of zero.
    pub default_sequence_cache_size: u32,
}

impl Default for RelConfig {
    fn default() -> Self {
        Self {
            max_mutation_size: 500_000,
            max_metadata_versions: 64,
            default_sequence_cache_size: 100,
        }
    }
}

impl RelConfig {
    pub fn development() -> Self {
        Self {
            max_mutation_size: 1_000,
            max_metadata_versions: 16,
            ..Self::default()
        }
    }

    pub fn with_max_mutation_size(mut self, limit: usize) -> Self {
        self.max_mutation_size = limit;
        self
    }

    pub fn with_max_metadata_versions(mut self, versions: usize) -> Self {
        self.max_metadata_versions = versions;
        self
    }

    pub fn validate(&self) -> Result<(), RelError> {
        if self.max_mutation_size == 0 {
            return Err(RelError::InvalidConfig {
                message: "max_mutation_size must be > 0".into(),
            });
        }
        if self.max_metadata_versions == 0 {
            return Err(RelError::InvalidConfig {
                message: "max_metadata_versions must be > 0".into(),
            });
        }
        if self.default_sequence_cache_size == 0 {
            return Err(RelError::InvalidConfig {
                message: "default_sequence_cache_size must be > 0".into(),
            });
        }
        Ok(())
    }
}
