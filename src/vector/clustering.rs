//! K-means training for the inverted-file index.
//!
//! Cosine similarity is the distance metric and centroids are seeded with
//! K-means++. Centroids are kept unit length so list assignment is a plain
//! dot product against the normalized query.

use crate::vector::types::VectorError;
use rand::Rng;
use tracing::warn;

/// Maximum number of iterations for K-means clustering.
const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Result of a K-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Unit-length centroids.
    pub centroids: Vec<Vec<f32>>,

    /// Zero-based list index for each input vector.
    pub assignments: Vec<usize>,

    pub iterations: usize,
}

/// Clusters `vectors` into `k` lists.
///
/// Fails when the set is empty, `k` is out of range, dimensions disagree,
/// or K-means++ cannot find `k` distinct seeds (all points coincide).
pub fn kmeans_clustering(vectors: &[Vec<f32>], k: usize) -> Result<KMeansResult, VectorError> {
    if vectors.is_empty() {
        return Err(VectorError::ClusteringFailed(
            "empty vector set provided for clustering".to_string(),
        ));
    }
    if k == 0 || k > vectors.len() {
        return Err(VectorError::ClusteringFailed(format!(
            "invalid cluster count {k} for {} vectors",
            vectors.len()
        )));
    }
    let dimension = vectors[0].len();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(VectorError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }

    let mut centroids = seed_centroids(vectors, k)?;
    let mut assignments = vec![usize::MAX; vectors.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;

        let next: Vec<usize> = vectors
            .iter()
            .map(|vector| nearest_centroid(vector, &centroids))
            .collect();
        let converged = next == assignments;
        assignments = next;
        if converged || iterations >= MAX_ITERATIONS {
            break;
        }

        let updated = update_centroids(vectors, &assignments, k);
        let movement = centroid_movement(&centroids, &updated);
        centroids = updated;
        if movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    if iterations >= MAX_ITERATIONS {
        warn!("K-means did not fully converge after {MAX_ITERATIONS} iterations");
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Index of the centroid most similar to `vector`.
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_similarity = f32::NEG_INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let similarity = cosine_similarity(vector, centroid);
        if similarity > best_similarity {
            best_similarity = similarity;
            best = i;
        }
    }
    best
}

/// The `n` centroid indices most similar to `vector`, best first.
pub fn nearest_centroids(vector: &[f32], centroids: &[Vec<f32>], n: usize) -> Vec<usize> {
    let mut ranked: Vec<(usize, f32)> = centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(vector, c)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(i, _)| i).collect()
}

/// Cosine similarity in [-1, 1]; zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn update_centroids(vectors: &[Vec<f32>], assignments: &[usize], k: usize) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut sums = vec![vec![0.0f32; dimension]; k];
    let mut sizes = vec![0usize; k];

    for (vector, &list) in vectors.iter().zip(assignments) {
        for (acc, value) in sums[list].iter_mut().zip(vector) {
            *acc += value;
        }
        sizes[list] += 1;
    }

    let mut rng = rand::rng();
    for (centroid, &size) in sums.iter_mut().zip(&sizes) {
        if size == 0 {
            // empty list: reseed from a random member
            let idx = rng.random_range(0..vectors.len());
            *centroid = normalized(&vectors[idx]);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            normalize(centroid);
        }
    }
    sums
}

fn seed_centroids(vectors: &[Vec<f32>], k: usize) -> Result<Vec<Vec<f32>>, VectorError> {
    let mut rng = rand::rng();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(normalized(&vectors[rng.random_range(0..vectors.len())]));

    while centroids.len() < k {
        let distances: Vec<f32> = vectors
            .iter()
            .map(|vector| {
                let nearest = centroids
                    .iter()
                    .map(|c| 1.0 - cosine_similarity(vector, c))
                    .fold(f32::MAX, f32::min);
                nearest * nearest
            })
            .collect();
        let total: f32 = distances.iter().sum();
        if total < EPSILON {
            break;
        }

        let target = rng.random::<f32>() * total;
        let mut cumulative = 0.0;
        let picked = distances
            .iter()
            .position(|d| {
                cumulative += d;
                cumulative >= target
            })
            .unwrap_or(vectors.len() - 1);
        centroids.push(normalized(&vectors[picked]));
    }

    if centroids.len() != k {
        return Err(VectorError::ClusteringFailed(format!(
            "only {} distinct seeds available for {k} lists",
            centroids.len()
        )));
    }
    Ok(centroids)
}

fn centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new)
        .map(|(a, b)| 1.0 - cosine_similarity(a, b))
        .sum::<f32>()
        / old.len() as f32
}

pub(crate) fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

pub(crate) fn normalized(vector: &[f32]) -> Vec<f32> {
    let mut copy = vector.to_vec();
    normalize(&mut copy);
    copy
}
