use super::matrix::RatingMatrix;
use super::predictor::predict_rating;
use crate::models::{ItemId, Neighbor, ScoredItem};
use crate::utils::sort_scored_desc;
use std::collections::HashSet;

pub const DEFAULT_MIN_PREDICTED_RATING: f32 = 3.5;

#[derive(Debug, Clone, Copy)]
pub struct RankingOptions {
    pub min_score: f32,
    pub limit: usize,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_PREDICTED_RATING,
            limit: 5,
        }
    }
}

/// Predicts every candidate the rater has not rated yet, keeps predictions at or above
/// the threshold and returns the best `limit` of them.
pub fn rank_candidates(
    matrix: &RatingMatrix,
    neighbors: &[Neighbor],
    candidates: &[ItemId],
    already_rated: &HashSet<ItemId>,
    options: RankingOptions,
) -> Vec<ScoredItem> {
    if neighbors.is_empty() || options.limit == 0 {
        return Vec::new();
    }

    let mut seen = HashSet::with_capacity(candidates.len());
    let mut predictions: Vec<ScoredItem> = candidates
        .iter()
        .copied()
        .filter(|item_id| !already_rated.contains(item_id))
        .filter(|item_id| seen.insert(*item_id))
        .filter_map(|item_id| {
            predict_rating(matrix, neighbors, item_id).map(|score| ScoredItem::new(item_id, score))
        })
        .filter(|prediction| prediction.score >= options.min_score)
        .collect();

    sort_scored_desc(&mut predictions);
    predictions.truncate(options.limit);
    predictions
}
