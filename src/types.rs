//! Core types for the vector store.
//!
//! Newtype wrappers prevent primitive obsession at the API boundary:
//! record ids, vector dimensions, and the distance metric each get their
//! own type so mismatched arguments fail to compile instead of corrupting
//! the index.

use crate::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};

/// Type-safe wrapper for record ids.
///
/// Ids are assigned by the store, monotonically increasing from zero, and
/// remain stable across compaction. A deleted id is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorId(u64);

impl VectorId {
    /// Creates a new `VectorId` from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying u64 value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Converts to little-endian bytes for log storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Creates from little-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// All vectors in one store instance share the same dimension; a mismatch
/// on insert or query is a hard error, never silently truncated or padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension`, rejecting zero.
    pub fn new(dim: usize) -> IndexResult<Self> {
        if dim == 0 {
            return Err(IndexError::InvalidConfig(
                "vector dimension cannot be zero".to_string(),
            ));
        }
        Ok(Self(dim))
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> IndexResult<()> {
        if vector.len() != self.0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Distance metric used for clustering and centroid probing.
///
/// Must match between index build time and query time; the manager
/// guarantees this by carrying the metric inside the built index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
    Euclidean,
}

/// Metadata attached to each stored chunk embedding.
///
/// Produced by the chunking collaborator; opaque to the index beyond
/// serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Path of the source file the chunk came from.
    pub source_path: String,

    /// Position of the chunk within its source file.
    pub chunk_index: u32,

    /// Content hash for change detection by the caller.
    pub content_hash: String,
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: VectorId,

    /// Cosine similarity to the query, in [-1, 1].
    pub score: f32,

    pub metadata: ChunkMetadata,
}

/// Lifecycle state of the managed index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No records have ever been inserted.
    Empty,

    /// Records exist but no cluster index has been built; queries use
    /// brute force.
    Unbuilt,

    /// Cluster index is built and drift is within the configured threshold.
    Fresh,

    /// Cluster index exists but drift exceeds the threshold; queries union
    /// probed clusters with a brute-force scan of post-build records.
    Stale,
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::Unbuilt => "unbuilt",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_id_roundtrip() {
        let id = VectorId::new(12345);
        assert_eq!(VectorId::from_bytes(id.to_bytes()), id);
        assert_eq!(id.get(), 12345);
    }

    #[test]
    fn test_vector_id_ordering() {
        assert!(VectorId::new(1) < VectorId::new(2));
    }

    #[test]
    fn test_dimension_validation() {
        let dim = VectorDimension::new(3).unwrap();
        assert_eq!(dim.get(), 3);
        assert!(dim.validate_vector(&[0.1, 0.2, 0.3]).is_ok());

        let err = dim.validate_vector(&[0.1, 0.2]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        assert!(VectorDimension::new(0).is_err());
    }

    #[test]
    fn test_distance_serde_names() {
        assert_eq!(serde_json::to_string(&Distance::Cosine).unwrap(), "\"cosine\"");
        let d: Distance = serde_json::from_str("\"euclidean\"").unwrap();
        assert_eq!(d, Distance::Euclidean);
    }
}
