//! Lloyd's algorithm for building the cluster partition.
//!
//! Centroids are initialized by sampling distinct vectors uniformly at
//! random from the input, seeded for reproducible builds. Iteration stops
//! early when no vector changes cluster between rounds.
//!
//! # Degenerate inputs
//! Fewer distinct vectors than the requested cluster count reduces the
//! count to the number of distinct vectors and logs a warning; it is not
//! an error. Zero input vectors is `EmptyInput`.

use crate::error::{IndexError, IndexResult};
use crate::similarity::{centroid_affinity, normalize_vector, normalize_vector_copy};
use crate::types::Distance;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::HashSet;

/// Result of one clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Cluster centroids, each of the input dimension.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster index assigned to each input vector.
    pub assignments: Vec<usize>,

    /// Lloyd rounds executed before convergence or cutoff.
    pub iterations: usize,

    /// Cluster count actually used, after degenerate-input reduction.
    pub nlist_used: usize,
}

/// Partitions `vectors` into up to `nlist` clusters.
///
/// All vectors must share one dimension; the record store guarantees this
/// before clustering is ever invoked.
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn lloyd_clustering(
    vectors: &[&[f32]],
    nlist: usize,
    distance: Distance,
    max_iterations: usize,
    seed: u64,
) -> IndexResult<Clustering> {
    if vectors.is_empty() {
        return Err(IndexError::EmptyInput);
    }
    if nlist == 0 || max_iterations == 0 {
        return Err(IndexError::InvalidConfig(
            "nlist and max_iterations must be greater than zero".to_string(),
        ));
    }

    let dimension = vectors[0].len();
    debug_assert!(
        vectors.iter().all(|v| v.len() == dimension),
        "store must enforce a single dimension"
    );

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = initialize_centroids(vectors, nlist, distance, &mut rng);
    let nlist_used = centroids.len();

    // Sentinel start so the first real assignment never reads as converged
    let mut assignments: Vec<usize> = vec![usize::MAX; vectors.len()];
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;

        // Assignment step
        let centroid_refs: Vec<&[f32]> = centroids.iter().map(|c| c.as_slice()).collect();
        let new_assignments: Vec<usize> = vectors
            .par_iter()
            .map(|vector| nearest_centroid(distance, vector, &centroid_refs))
            .collect();

        // With a single cluster no reassignment is possible, so the first
        // round is already stable
        let converged = new_assignments == assignments || nlist_used == 1;
        assignments = new_assignments;

        // Update step: recompute each centroid as the mean of its members
        centroids = update_centroids(vectors, &assignments, nlist_used, distance, &mut rng);
        if converged {
            break;
        }
    }

    tracing::debug!(
        nlist_used,
        iterations,
        vectors = vectors.len(),
        "clustering finished"
    );

    Ok(Clustering {
        centroids,
        assignments,
        iterations,
        nlist_used,
    })
}

/// Returns the index of the centroid nearest to `vector`.
#[must_use]
pub fn nearest_centroid(distance: Distance, vector: &[f32], centroids: &[&[f32]]) -> usize {
    let mut best_affinity = f32::NEG_INFINITY;
    let mut best = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let affinity = centroid_affinity(distance, vector, centroid);
        if affinity > best_affinity {
            best_affinity = affinity;
            best = i;
        }
    }

    best
}

/// Samples initial centroids uniformly from the distinct input vectors.
fn initialize_centroids(
    vectors: &[&[f32]],
    nlist: usize,
    distance: Distance,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    // First occurrence of each distinct vector, compared by bit pattern
    let mut seen: HashSet<Vec<u32>> = HashSet::new();
    let mut distinct: Vec<usize> = Vec::new();
    for (i, vector) in vectors.iter().enumerate() {
        let bits: Vec<u32> = vector.iter().map(|x| x.to_bits()).collect();
        if seen.insert(bits) {
            distinct.push(i);
        }
    }

    let nlist_used = nlist.min(distinct.len());
    if nlist_used < nlist {
        tracing::warn!(
            requested = nlist,
            distinct = distinct.len(),
            "fewer distinct vectors than requested clusters, reducing cluster count"
        );
    }

    // Partial Fisher-Yates: the first nlist_used slots become the sample
    for i in 0..nlist_used {
        let j = rng.random_range(i..distinct.len());
        distinct.swap(i, j);
    }

    distinct[..nlist_used]
        .iter()
        .map(|&i| match distance {
            Distance::Cosine => normalize_vector_copy(vectors[i]),
            Distance::Euclidean => vectors[i].to_vec(),
        })
        .collect()
}

/// Recomputes each centroid as the mean of its members.
///
/// An empty cluster is reseeded from a random input vector so it can
/// recapture members in the next round.
fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[usize],
    nlist_used: usize,
    distance: Distance,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut centroids = vec![vec![0.0; dimension]; nlist_used];
    let mut sizes = vec![0usize; nlist_used];

    for (vector, &cluster) in vectors.iter().zip(assignments.iter()) {
        for (acc, &value) in centroids[cluster].iter_mut().zip(vector.iter()) {
            *acc += value;
        }
        sizes[cluster] += 1;
    }

    for (centroid, &size) in centroids.iter_mut().zip(sizes.iter()) {
        if size == 0 {
            let idx = rng.random_range(0..vectors.len());
            *centroid = match distance {
                Distance::Cosine => normalize_vector_copy(vectors[idx]),
                Distance::Euclidean => vectors[idx].to_vec(),
            };
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            if distance == Distance::Cosine {
                normalize_vector(centroid);
            }
        }
    }

    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(vectors: &[Vec<f32>]) -> Vec<&[f32]> {
        vectors.iter().map(|v| v.as_slice()).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            lloyd_clustering(&[], 2, Distance::Cosine, 25, 42),
            Err(IndexError::EmptyInput)
        ));
    }

    #[test]
    fn test_two_obvious_clusters_converge() {
        // Two near [1,0], two near [0,1]
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.95, 0.05],
            vec![0.0, 1.0],
            vec![0.05, 0.95],
        ];
        let result = lloyd_clustering(&refs(&vectors), 2, Distance::Cosine, 25, 42).unwrap();

        assert_eq!(result.nlist_used, 2);
        assert!(result.iterations <= 25);
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert_eq!(result.assignments[2], result.assignments[3]);
        assert_ne!(result.assignments[0], result.assignments[2]);

        // Each centroid should be close to one of the axes
        for centroid in &result.centroids {
            let on_x = cosine_close(centroid, &[1.0, 0.0]);
            let on_y = cosine_close(centroid, &[0.0, 1.0]);
            assert!(on_x || on_y, "centroid {centroid:?} not near either axis");
        }
    }

    fn cosine_close(a: &[f32], b: &[f32]) -> bool {
        crate::similarity::cosine_similarity(a, b) > 0.99
    }

    #[test]
    fn test_deterministic_given_seed() {
        let vectors: Vec<Vec<f32>> = (0..40)
            .map(|i| {
                let angle = i as f32 * 0.37;
                vec![angle.cos(), angle.sin(), (i as f32 * 0.11).cos()]
            })
            .collect();
        let r = refs(&vectors);

        let a = lloyd_clustering(&r, 5, Distance::Cosine, 25, 7).unwrap();
        let b = lloyd_clustering(&r, 5, Distance::Cosine, 25, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fewer_distinct_vectors_reduces_nlist() {
        let vectors = vec![
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
        ];
        let result = lloyd_clustering(&refs(&vectors), 4, Distance::Cosine, 25, 42).unwrap();
        assert_eq!(result.nlist_used, 2);
        assert_eq!(result.centroids.len(), 2);
        assert_eq!(result.assignments.len(), 4);
    }

    #[test]
    fn test_single_cluster_converges_in_one_round() {
        let vectors = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let result = lloyd_clustering(&refs(&vectors), 1, Distance::Euclidean, 25, 42).unwrap();
        assert_eq!(result.nlist_used, 1);
        assert!(result.assignments.iter().all(|&c| c == 0));

        // One cluster cannot reassign, so a single round suffices and the
        // centroid is already the member mean
        assert_eq!(result.iterations, 1);
        assert_eq!(result.centroids[0], vec![3.0, 4.0]);
    }

    #[test]
    fn test_euclidean_metric() {
        // Clusters separated by magnitude, which cosine cannot see
        let vectors = vec![
            vec![1.0, 1.0],
            vec![1.1, 0.9],
            vec![10.0, 10.0],
            vec![9.9, 10.2],
        ];
        let result = lloyd_clustering(&refs(&vectors), 2, Distance::Euclidean, 25, 42).unwrap();
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert_eq!(result.assignments[2], result.assignments[3]);
        assert_ne!(result.assignments[0], result.assignments[2]);
    }

    #[test]
    fn test_nearest_centroid_picks_closest() {
        let centroids = [vec![1.0, 0.0], vec![0.0, 1.0]];
        let centroid_refs: Vec<&[f32]> = centroids.iter().map(|c| c.as_slice()).collect();

        assert_eq!(
            nearest_centroid(Distance::Cosine, &[0.9, 0.1], &centroid_refs),
            0
        );
        assert_eq!(
            nearest_centroid(Distance::Cosine, &[0.1, 0.9], &centroid_refs),
            1
        );
    }
}
