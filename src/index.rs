//! The built cluster partition and centroid probing.
//!
//! A `ClusterIndex` is immutable once built: the manager swaps a freshly
//! built index in atomically, and in-flight queries keep whichever index
//! they loaded. Serialization exists only for the on-disk snapshot, which
//! is a derived cache rebuildable from the record log.

use crate::clustering::Clustering;
use crate::similarity::centroid_affinity;
use crate::types::{Distance, VectorId};
use serde::{Deserialize, Serialize};

/// One cluster: its centroid and the ids assigned to it at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Arithmetic mean of the member vectors (unit length under cosine).
    pub centroid: Vec<f32>,

    /// Record ids assigned to this centroid when the index was built.
    pub member_ids: Vec<VectorId>,
}

/// The full IVFFlat partition built from one store snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterIndex {
    clusters: Vec<Cluster>,

    /// Store version captured when this index was built.
    built_at_version: u64,

    /// Metric the centroids were trained with; probing must use the same.
    distance: Distance,
}

impl ClusterIndex {
    /// Assembles an index from a clustering run over `ids`' vectors.
    ///
    /// `ids[i]` must be the record whose vector was `vectors[i]` in the
    /// clustering input.
    #[must_use]
    pub fn from_clustering(
        clustering: &Clustering,
        ids: &[VectorId],
        built_at_version: u64,
        distance: Distance,
    ) -> Self {
        debug_assert_eq!(ids.len(), clustering.assignments.len());

        let mut clusters: Vec<Cluster> = clustering
            .centroids
            .iter()
            .map(|centroid| Cluster {
                centroid: centroid.clone(),
                member_ids: Vec::new(),
            })
            .collect();

        for (&id, &cluster) in ids.iter().zip(clustering.assignments.iter()) {
            clusters[cluster].member_ids.push(id);
        }

        Self {
            clusters,
            built_at_version,
            distance,
        }
    }

    /// Returns the `nprobe` cluster indices nearest to `query`.
    ///
    /// Compares the query against every centroid (O(nlist)); probing more
    /// clusters monotonically increases recall toward brute force.
    #[must_use]
    pub fn probe(&self, query: &[f32], nprobe: usize) -> Vec<usize> {
        let mut ranked: Vec<(usize, f32)> = self
            .clusters
            .iter()
            .enumerate()
            .map(|(i, cluster)| (i, centroid_affinity(self.distance, query, &cluster.centroid)))
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(nprobe);
        ranked.into_iter().map(|(i, _)| i).collect()
    }

    /// The clusters in this partition.
    #[must_use]
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Store version this index was built against.
    #[must_use]
    pub fn built_at_version(&self) -> u64 {
        self.built_at_version
    }

    /// Metric this index was trained with.
    #[must_use]
    pub fn distance(&self) -> Distance {
        self.distance
    }

    /// Number of clusters.
    #[must_use]
    pub fn nlist(&self) -> usize {
        self.clusters.len()
    }

    /// Total member count across all clusters.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.clusters.iter().map(|c| c.member_ids.len()).sum()
    }

    /// True if `id` was a member of any cluster at build time.
    #[must_use]
    pub fn contains(&self, id: VectorId) -> bool {
        self.clusters
            .iter()
            .any(|c| c.member_ids.contains(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::lloyd_clustering;

    fn build_two_cluster_index() -> ClusterIndex {
        let vectors = [
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![0.0, 1.0],
            vec![0.1, 0.9],
        ];
        let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
        let clustering = lloyd_clustering(&refs, 2, Distance::Cosine, 25, 42).unwrap();
        let ids: Vec<VectorId> = (0..4).map(VectorId::new).collect();
        ClusterIndex::from_clustering(&clustering, &ids, 4, Distance::Cosine)
    }

    #[test]
    fn test_partition_is_complete_and_disjoint() {
        let index = build_two_cluster_index();
        assert_eq!(index.member_count(), 4);

        let mut all: Vec<VectorId> = index
            .clusters()
            .iter()
            .flat_map(|c| c.member_ids.iter().copied())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4, "no id may appear in two clusters");
    }

    #[test]
    fn test_probe_prefers_nearest_centroid() {
        let index = build_two_cluster_index();
        let probed = index.probe(&[1.0, 0.05], 1);
        assert_eq!(probed.len(), 1);

        // The single probed cluster must hold the x-axis members
        let cluster = &index.clusters()[probed[0]];
        assert!(cluster.member_ids.contains(&VectorId::new(0)));
        assert!(cluster.member_ids.contains(&VectorId::new(1)));
    }

    #[test]
    fn test_probe_all_returns_every_cluster() {
        let index = build_two_cluster_index();
        let probed = index.probe(&[0.5, 0.5], 10);
        assert_eq!(probed.len(), index.nlist());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let index = build_two_cluster_index();
        let json = serde_json::to_string(&index).unwrap();
        let restored: ClusterIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, index);
        assert_eq!(restored.built_at_version(), 4);
    }
}
