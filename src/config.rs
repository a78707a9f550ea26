//! Configuration for the vector store.
//!
//! One explicit configuration structure passed at store construction time.
//! Defaults are tunable, not contractual: `nprobe` can additionally be
//! overridden per query. Supports loading from a TOML file for pipelines
//! that keep their settings on disk.

use crate::error::{IndexError, IndexResult};
use crate::types::Distance;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    /// Vector dimension, fixed for the lifetime of the store.
    pub dim: usize,

    /// Number of clusters in the built index.
    #[serde(default = "default_nlist")]
    pub nlist: usize,

    /// Number of clusters probed per query (query-time override allowed).
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    /// Distance metric for clustering and centroid probing.
    #[serde(default)]
    pub distance: Distance,

    /// Writes tolerated since the last build before the index counts as
    /// stale.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: u64,

    /// Maximum Lloyd iterations per rebuild.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Seed for centroid initialization, for reproducible builds.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Rebuild automatically on the write that crosses the drift threshold.
    #[serde(default = "default_true")]
    pub auto_rebuild: bool,

    /// Directory for the append-only log and index snapshot. In-memory
    /// only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

fn default_nlist() -> usize {
    64
}

fn default_nprobe() -> usize {
    8
}

fn default_drift_threshold() -> u64 {
    256
}

fn default_max_iterations() -> usize {
    25
}

fn default_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

impl IndexConfig {
    /// Creates a configuration with the given dimension and defaults for
    /// everything else.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            nlist: default_nlist(),
            nprobe: default_nprobe(),
            distance: Distance::default(),
            drift_threshold: default_drift_threshold(),
            max_iterations: default_max_iterations(),
            seed: default_seed(),
            auto_rebuild: default_true(),
            data_dir: None,
        }
    }

    /// Sets the cluster count.
    #[must_use]
    pub fn with_nlist(mut self, nlist: usize) -> Self {
        self.nlist = nlist;
        self
    }

    /// Sets the default probe count.
    #[must_use]
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe;
        self
    }

    /// Sets the distance metric.
    #[must_use]
    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = distance;
        self
    }

    /// Sets the drift threshold.
    #[must_use]
    pub fn with_drift_threshold(mut self, threshold: u64) -> Self {
        self.drift_threshold = threshold;
        self
    }

    /// Sets the clustering seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enables or disables automatic rebuilds.
    #[must_use]
    pub fn with_auto_rebuild(mut self, enabled: bool) -> Self {
        self.auto_rebuild = enabled;
        self
    }

    /// Sets the persistence directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Loads configuration from a TOML file.
    pub fn from_toml_path(path: impl AsRef<Path>) -> IndexResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            IndexError::InvalidConfig(format!(
                "failed to parse {}: {e}",
                path.as_ref().display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field ranges. Called by the manager at construction.
    pub fn validate(&self) -> IndexResult<()> {
        if self.dim == 0 {
            return Err(IndexError::InvalidConfig(
                "dim must be greater than zero".to_string(),
            ));
        }
        if self.nlist == 0 {
            return Err(IndexError::InvalidConfig(
                "nlist must be greater than zero".to_string(),
            ));
        }
        if self.nprobe == 0 {
            return Err(IndexError::InvalidConfig(
                "nprobe must be greater than zero".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(IndexError::InvalidConfig(
                "max_iterations must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::new(384);
        assert_eq!(config.dim, 384);
        assert_eq!(config.nlist, 64);
        assert_eq!(config.nprobe, 8);
        assert_eq!(config.distance, Distance::Cosine);
        assert_eq!(config.drift_threshold, 256);
        assert_eq!(config.max_iterations, 25);
        assert!(config.auto_rebuild);
        assert!(config.data_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = IndexConfig::new(8)
            .with_nlist(4)
            .with_nprobe(2)
            .with_distance(Distance::Euclidean)
            .with_drift_threshold(10)
            .with_seed(7)
            .with_auto_rebuild(false);
        assert_eq!(config.nlist, 4);
        assert_eq!(config.nprobe, 2);
        assert_eq!(config.distance, Distance::Euclidean);
        assert_eq!(config.drift_threshold, 10);
        assert_eq!(config.seed, 7);
        assert!(!config.auto_rebuild);
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        assert!(IndexConfig::new(0).validate().is_err());
        assert!(IndexConfig::new(8).with_nlist(0).validate().is_err());
        assert!(IndexConfig::new(8).with_nprobe(0).validate().is_err());
    }

    #[test]
    fn test_toml_parsing_with_defaults() {
        let toml_str = r#"
            dim = 16
            nlist = 32
            distance = "euclidean"
        "#;
        let config: IndexConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.dim, 16);
        assert_eq!(config.nlist, 32);
        assert_eq!(config.distance, Distance::Euclidean);
        // Unspecified fields fall back to defaults
        assert_eq!(config.nprobe, 8);
        assert_eq!(config.seed, 42);
    }
}
