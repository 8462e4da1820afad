pub mod hybrid;
pub mod matrix;
pub mod neighborhood;
pub mod predictor;
pub mod ranker;
pub mod similarity;

use crate::error::RecResult;
use crate::models::*;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::info;

pub use hybrid::{AttributedItem, HybridCombiner, HybridWeights, RecommendationSections};
pub use matrix::RatingMatrix;
pub use neighborhood::NeighborhoodSelector;
pub use ranker::RankingOptions;
pub use similarity::SimilarityEngine;

/// A source of `(item, score)` candidates for the hybrid combiner. Scores are on a
/// source-specific scale; the combiner normalizes them.
#[async_trait::async_trait]
pub trait CandidateScorer: Send + Sync {
    fn source(&self) -> RecommendationSource;
    async fn score_candidates(&self, rater_id: RaterId, limit: usize) -> RecResult<Vec<ScoredItem>>;
}

/// User-based collaborative filtering over one immutable rating-matrix snapshot.
#[derive(Debug)]
pub struct CollaborativeFiltering {
    matrix: RatingMatrix,
    similarity: SimilarityEngine,
    selector: NeighborhoodSelector,
    generation: u64,
    built_at: DateTime<Utc>,
}

impl CollaborativeFiltering {
    pub fn new(matrix: RatingMatrix, k_neighbors: usize, min_co_rated: usize, generation: u64) -> Self {
        Self {
            matrix,
            similarity: SimilarityEngine::new(min_co_rated),
            selector: NeighborhoodSelector::new(k_neighbors),
            generation,
            built_at: Utc::now(),
        }
    }

    pub fn build(ratings: &[Rating], k_neighbors: usize, min_co_rated: usize, generation: u64) -> RecResult<Self> {
        let matrix = RatingMatrix::build(ratings)?;
        if matrix.is_empty() {
            info!("No approved ratings from identified raters; rating matrix is empty");
        } else {
            info!(
                raters = matrix.num_raters(),
                items = matrix.num_items(),
                generation,
                "Built rating matrix"
            );
        }
        Ok(Self::new(matrix, k_neighbors, min_co_rated, generation))
    }

    pub fn matrix(&self) -> &RatingMatrix {
        &self.matrix
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> MatrixStats {
        MatrixStats {
            generation: self.generation,
            raters: self.matrix.num_raters(),
            items: self.matrix.num_items(),
            ratings: self.matrix.num_ratings(),
            built_at: self.built_at,
        }
    }

    /// Similarity between two raters; 0.0 when either is unknown to the matrix.
    pub fn similarity_between(&self, a: RaterId, b: RaterId) -> f32 {
        match (self.matrix.rater_index(a), self.matrix.rater_index(b)) {
            (Some(a), Some(b)) => self.similarity.similarity(&self.matrix, a, b),
            _ => 0.0,
        }
    }

    pub fn find_neighbors(&self, rater_id: RaterId, k: usize) -> Vec<Neighbor> {
        self.selector.select_k(&self.matrix, &self.similarity, rater_id, k)
    }

    pub fn predict(&self, rater_id: RaterId, item_id: ItemId) -> Option<f32> {
        let neighbors = self.selector.select(&self.matrix, &self.similarity, rater_id);
        predictor::predict_rating(&self.matrix, &neighbors, item_id)
    }

    /// `already_rated` comes from the rating source and may include unapproved ratings;
    /// the rater's matrix row is excluded as well.
    pub fn recommend(
        &self,
        rater_id: RaterId,
        candidates: &[ItemId],
        already_rated: &HashSet<ItemId>,
        options: RankingOptions,
    ) -> Vec<ScoredItem> {
        let neighbors = self.selector.select(&self.matrix, &self.similarity, rater_id);
        if neighbors.is_empty() {
            info!(rater_id, "No similar raters found; returning no collaborative recommendations");
            return Vec::new();
        }

        let mut excluded = already_rated.clone();
        excluded.extend(self.matrix.rated_items(rater_id));

        let ranked = ranker::rank_candidates(&self.matrix, &neighbors, candidates, &excluded, options);
        if ranked.is_empty() {
            info!(rater_id, min_score = options.min_score, "No prediction cleared the threshold");
        }
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Vec<Rating> {
        // U1 {A:5, B:4}, U2 {A:5, B:3, C:5}, U3 {A:1, B:1}; A=1, B=2, C=3.
        vec![
            Rating::new(1, 1, 5).approved(),
            Rating::new(1, 2, 4).approved(),
            Rating::new(2, 1, 5).approved(),
            Rating::new(2, 2, 3).approved(),
            Rating::new(2, 3, 5).approved(),
            Rating::new(3, 1, 1).approved(),
            Rating::new(3, 2, 1).approved(),
        ]
    }

    #[test]
    fn test_similar_raters_predict_closer_ratings() {
        let cf = CollaborativeFiltering::build(&scenario(), 5, 1, 1).unwrap();

        assert!(cf.similarity_between(1, 2) > cf.similarity_between(1, 3));
        assert_eq!(cf.similarity_between(1, 2), cf.similarity_between(2, 1));
        assert!((cf.similarity_between(1, 1) - 1.0).abs() < 1e-6);

        let prediction = cf.predict(1, 3).unwrap();
        assert!((prediction - 5.0).abs() < (prediction - 1.0).abs());
    }

    #[test]
    fn test_recommend_skips_rated_items() {
        let cf = CollaborativeFiltering::build(&scenario(), 5, 1, 1).unwrap();
        let recommendations = cf.recommend(1, &[1, 2, 3], &HashSet::new(), RankingOptions::default());

        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].item_id, 3);
    }

    #[test]
    fn test_empty_snapshot_degrades_to_empty_results() {
        let cf = CollaborativeFiltering::build(&[], 5, 1, 1).unwrap();
        assert!(cf.matrix().is_empty());
        assert!(cf.find_neighbors(1, 5).is_empty());
        assert_eq!(cf.predict(1, 1), None);
        assert!(cf.recommend(1, &[1, 2], &HashSet::new(), RankingOptions::default()).is_empty());
        assert_eq!(cf.stats().ratings, 0);
    }
}
