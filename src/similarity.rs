//! Distance computation and ranked top-K selection.
//!
//! Cosine similarity is the ranking metric for search results; Euclidean
//! distance is available for clustering when configured. Zero-norm vectors
//! get similarity 0.0 by convention rather than raising an error, so
//! routine data never triggers faults.

use crate::types::{Distance, VectorId};
use rayon::prelude::*;

/// Epsilon below which a norm is treated as zero.
const EPSILON: f32 = 1e-10;

/// Computes cosine similarity between two vectors.
///
/// Returns a value in [-1, 1], or 0.0 when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have same dimension");

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Computes Euclidean (L2) distance between two vectors.
#[must_use]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have same dimension");

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// Affinity between a vector and a centroid under the given metric.
///
/// Higher means closer, regardless of metric, so probing and cluster
/// assignment can rank with a single comparison direction.
#[must_use]
pub fn centroid_affinity(distance: Distance, vector: &[f32], centroid: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => cosine_similarity(vector, centroid),
        Distance::Euclidean => -euclidean_distance(vector, centroid),
    }
}

/// Normalizes a vector in-place to unit length.
///
/// Vectors with near-zero norm are left as-is.
pub fn normalize_vector(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Creates a normalized copy of a vector.
#[must_use]
pub fn normalize_vector_copy(vector: &[f32]) -> Vec<f32> {
    let mut normalized = vector.to_vec();
    normalize_vector(&mut normalized);
    normalized
}

/// Scores candidates against a query by cosine similarity, in parallel.
#[must_use]
pub fn score_candidates(query: &[f32], candidates: &[(VectorId, &[f32])]) -> Vec<(VectorId, f32)> {
    candidates
        .par_iter()
        .map(|(id, vector)| (*id, cosine_similarity(query, vector)))
        .collect()
}

/// Selects the top `k` scored candidates, similarity descending.
///
/// Ties are broken by lower id so repeated queries are deterministic.
/// `k` larger than the candidate count returns all candidates.
#[must_use]
pub fn rank_top_k(mut scored: Vec<(VectorId, f32)>, k: usize) -> Vec<(VectorId, f32)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}
