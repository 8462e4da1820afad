use super::matrix::{RatingMatrix, UNRATED};
use crate::models::{ItemId, Neighbor, MAX_RATING, MIN_RATING};

/// Similarity-weighted average of the neighbors' ratings for `item_id`, clamped to the
/// rating scale. `None` when no neighbor rated the item or their similarities sum to zero.
pub fn predict_rating(matrix: &RatingMatrix, neighbors: &[Neighbor], item_id: ItemId) -> Option<f32> {
    let item_idx = matrix.item_index(item_id)?;

    let mut weighted_sum = 0.0f32;
    let mut similarity_sum = 0.0f32;

    for neighbor in neighbors {
        let Some(row) = matrix.rater_index(neighbor.rater_id) else {
            continue;
        };
        let rating = matrix.cell(row, item_idx);
        if rating == UNRATED {
            continue;
        }

        weighted_sum += rating * neighbor.similarity;
        similarity_sum += neighbor.similarity;
    }

    if similarity_sum == 0.0 {
        return None;
    }

    Some((weighted_sum / similarity_sum).clamp(MIN_RATING as f32, MAX_RATING as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating;

    fn sample_matrix() -> RatingMatrix {
        let ratings = vec![
            Rating::new(1, 10, 5).approved(),
            Rating::new(2, 10, 3).approved(),
            Rating::new(2, 20, 4).approved(),
            Rating::new(3, 30, 2).approved(),
        ];
        RatingMatrix::build(&ratings).unwrap()
    }

    fn neighbor(rater_id: i64, similarity: f32) -> Neighbor {
        Neighbor { rater_id, similarity }
    }

    #[test]
    fn test_weighted_average() {
        let m = sample_matrix();
        let neighbors = vec![neighbor(1, 0.75), neighbor(2, 0.25)];
        let prediction = predict_rating(&m, &neighbors, 10).unwrap();
        // (5 * 0.75 + 3 * 0.25) / 1.0
        assert!((prediction - 4.5).abs() < 1e-6);
    }

    #[test]
    fn test_only_neighbors_who_rated_contribute() {
        let m = sample_matrix();
        let neighbors = vec![neighbor(1, 0.9), neighbor(2, 0.3)];
        let prediction = predict_rating(&m, &neighbors, 20).unwrap();
        assert!((prediction - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_undefined_without_raters_or_weight() {
        let m = sample_matrix();
        assert_eq!(predict_rating(&m, &[neighbor(1, 0.9)], 30), None);
        assert_eq!(predict_rating(&m, &[neighbor(3, 0.0)], 30), None);
        assert_eq!(predict_rating(&m, &[neighbor(1, 0.9)], 999), None);
        assert_eq!(predict_rating(&m, &[], 10), None);
    }

    #[test]
    fn test_prediction_stays_on_scale() {
        let m = sample_matrix();
        for weights in [(0.1, 0.9), (1.0, 1.0), (0.5, 0.0001)] {
            let neighbors = vec![neighbor(1, weights.0), neighbor(2, weights.1)];
            let prediction = predict_rating(&m, &neighbors, 10).unwrap();
            assert!((1.0..=5.0).contains(&prediction));
        }
    }
}
