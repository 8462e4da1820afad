use super::matrix::RatingMatrix;
use super::similarity::SimilarityEngine;
use crate::models::{Neighbor, RaterId};
use rayon::prelude::*;
use std::cmp::Ordering;
use tracing::debug;

pub const DEFAULT_K: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct NeighborhoodSelector {
    k: usize,
}

impl NeighborhoodSelector {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn select(&self, matrix: &RatingMatrix, engine: &SimilarityEngine, rater_id: RaterId) -> Vec<Neighbor> {
        self.select_k(matrix, engine, rater_id, self.k)
    }

    /// Top `k` raters by similarity to `rater_id`, ties broken by ascending rater id.
    /// A rater absent from the matrix has no neighbors.
    pub fn select_k(
        &self,
        matrix: &RatingMatrix,
        engine: &SimilarityEngine,
        rater_id: RaterId,
        k: usize,
    ) -> Vec<Neighbor> {
        let target = match matrix.rater_index(rater_id) {
            Some(idx) => idx,
            None => {
                debug!(rater_id, "Rater not present in rating matrix; no neighbors");
                return Vec::new();
            }
        };

        let rater_ids = matrix.rater_ids();
        let mut neighbors: Vec<Neighbor> = (0..matrix.num_raters())
            .into_par_iter()
            .filter(|&other| other != target)
            .map(|other| Neighbor {
                rater_id: rater_ids[other],
                similarity: engine.similarity(matrix, target, other),
            })
            .collect();

        sort_neighbors(&mut neighbors);
        neighbors.truncate(k);
        neighbors
    }
}

impl Default for NeighborhoodSelector {
    fn default() -> Self {
        Self::new(DEFAULT_K)
    }
}

pub fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.rater_id.cmp(&b.rater_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating;

    fn matrix(entries: &[(RaterId, i64, u8)]) -> RatingMatrix {
        let ratings: Vec<Rating> = entries
            .iter()
            .map(|&(rater, item, score)| Rating::new(rater, item, score).approved())
            .collect();
        RatingMatrix::build(&ratings).unwrap()
    }

    #[test]
    fn test_excludes_target_and_sorts_descending() {
        let m = matrix(&[
            (1, 1, 5), (1, 2, 4),
            (2, 1, 5), (2, 2, 3),
            (3, 1, 1), (3, 2, 1),
            (4, 1, 5), (4, 2, 4),
        ]);
        let engine = SimilarityEngine::default();
        let neighbors = NeighborhoodSelector::default().select(&m, &engine, 1);

        assert_eq!(neighbors.len(), 3);
        assert!(neighbors.iter().all(|n| n.rater_id != 1));
        assert_eq!(neighbors[0].rater_id, 4);
        assert_eq!(neighbors[2].rater_id, 3);
        assert!(neighbors.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn test_ties_break_by_rater_id() {
        let m = matrix(&[
            (1, 1, 5),
            (9, 1, 4),
            (4, 1, 3),
            (6, 1, 2),
        ]);
        let engine = SimilarityEngine::default();
        let neighbors = NeighborhoodSelector::new(10).select(&m, &engine, 1);

        // Single co-rated item: every neighbor is similarity 1.0.
        let ids: Vec<RaterId> = neighbors.iter().map(|n| n.rater_id).collect();
        assert_eq!(ids, vec![4, 6, 9]);
    }

    #[test]
    fn test_truncates_to_k() {
        let m = matrix(&[(1, 1, 5), (2, 1, 4), (3, 1, 4), (4, 1, 5)]);
        let engine = SimilarityEngine::default();
        let neighbors = NeighborhoodSelector::new(2).select(&m, &engine, 1);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(NeighborhoodSelector::new(2).select_k(&m, &engine, 1, 1).len(), 1);
    }

    #[test]
    fn test_unknown_rater_has_no_neighbors() {
        let m = matrix(&[(1, 1, 5), (2, 1, 4)]);
        let engine = SimilarityEngine::default();
        assert!(NeighborhoodSelector::default().select(&m, &engine, 99).is_empty());
        assert!(NeighborhoodSelector::default()
            .select(&RatingMatrix::empty(), &engine, 1)
            .is_empty());
    }
}
