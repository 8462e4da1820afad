use super::matrix::{RatingMatrix, UNRATED};
use dashmap::DashMap;
use nalgebra::DVector;
use ndarray::ArrayView1;

pub const SIMILARITY_EPSILON: f32 = 1e-9;

/// Maps a 1..=5 rating onto 0..=1.
pub fn rescale_rating(rating: f32) -> f32 {
    (rating - 1.0) / 4.0
}

/// Cosine similarity over co-rated items only, on rescaled ratings. Inputs are
/// non-negative after rescaling so the result lies in [0, 1].
pub fn cosine_similarity(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    co_rated_similarity(a, b, 1)
}

pub fn co_rated_similarity(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>, min_co_rated: usize) -> f32 {
    let (left, right): (Vec<f32>, Vec<f32>) = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| **x != UNRATED && **y != UNRATED)
        .map(|(x, y)| (rescale_rating(*x), rescale_rating(*y)))
        .unzip();

    if left.is_empty() || left.len() < min_co_rated {
        return 0.0;
    }

    let left = DVector::from_vec(left);
    let right = DVector::from_vec(right);
    let norm_left = left.norm();
    let norm_right = right.norm();

    if norm_left == 0.0 || norm_right == 0.0 {
        0.0
    } else {
        left.dot(&right) / (norm_left * norm_right + SIMILARITY_EPSILON)
    }
}

/// Pairwise similarity with a cache scoped to one matrix snapshot. Pairs are stored
/// under (low, high) row indices so both orders hit the same entry.
#[derive(Debug)]
pub struct SimilarityEngine {
    min_co_rated: usize,
    cache: DashMap<(usize, usize), f32>,
}

impl SimilarityEngine {
    pub fn new(min_co_rated: usize) -> Self {
        Self {
            min_co_rated: min_co_rated.max(1),
            cache: DashMap::new(),
        }
    }

    pub fn similarity(&self, matrix: &RatingMatrix, a: usize, b: usize) -> f32 {
        let key = if a <= b { (a, b) } else { (b, a) };

        if let Some(cached) = self.cache.get(&key) {
            return *cached;
        }

        let value = co_rated_similarity(matrix.row(key.0), matrix.row(key.1), self.min_co_rated);
        self.cache.insert(key, value);
        value
    }

    pub fn cached_pairs(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new(1)
    }
}
