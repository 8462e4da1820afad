use crate::error::{RecError, RecResult};
use crate::models::{ItemId, RaterId, Rating};
use ndarray::{Array2, ArrayView1};
use std::collections::{BTreeSet, HashMap};

/// Cell value meaning "not rated". Valid ratings are 1..=5.
pub const UNRATED: f32 = 0.0;

/// Dense rater × item matrix. Rows follow sorted rater ids, columns sorted item ids.
#[derive(Debug, Clone)]
pub struct RatingMatrix {
    ratings: Array2<f32>,
    rater_ids: Vec<RaterId>,
    item_ids: Vec<ItemId>,
    rater_index: HashMap<RaterId, usize>,
    item_index: HashMap<ItemId, usize>,
}

impl RatingMatrix {
    pub fn empty() -> Self {
        Self {
            ratings: Array2::zeros((0, 0)),
            rater_ids: Vec::new(),
            item_ids: Vec::new(),
            rater_index: HashMap::new(),
            item_index: HashMap::new(),
        }
    }

    /// Builds from every qualifying rating (approved, identified rater). Fails on an
    /// out-of-range score anywhere in the input. A repeated (rater, item) pair keeps the
    /// most recent rating.
    pub fn build(ratings: &[Rating]) -> RecResult<Self> {
        if let Some(bad) = ratings.iter().find(|r| !r.is_in_range()) {
            return Err(RecError::InvalidRating(format!(
                "score {} for item {} is outside 1..=5",
                bad.score, bad.item_id
            )));
        }

        let qualifying: Vec<(RaterId, &Rating)> = ratings
            .iter()
            .filter(|r| r.approved)
            .filter_map(|r| r.rater_id.map(|rater| (rater, r)))
            .collect();

        if qualifying.is_empty() {
            return Ok(Self::empty());
        }

        let rater_ids: Vec<RaterId> = qualifying
            .iter()
            .map(|(rater, _)| *rater)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let item_ids: Vec<ItemId> = qualifying
            .iter()
            .map(|(_, r)| r.item_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let rater_index: HashMap<RaterId, usize> =
            rater_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let item_index: HashMap<ItemId, usize> =
            item_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut cells = Array2::<f32>::zeros((rater_ids.len(), item_ids.len()));
        let mut stamped = HashMap::with_capacity(qualifying.len());

        for (rater, rating) in qualifying {
            let row = rater_index[&rater];
            let col = item_index[&rating.item_id];
            let newer = stamped
                .get(&(row, col))
                .map_or(true, |seen| rating.created_at >= *seen);
            if newer {
                cells[[row, col]] = rating.score as f32;
                stamped.insert((row, col), rating.created_at);
            }
        }

        Ok(Self {
            ratings: cells,
            rater_ids,
            item_ids,
            rater_index,
            item_index,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rater_ids.is_empty()
    }

    pub fn num_raters(&self) -> usize {
        self.rater_ids.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_ids.len()
    }

    pub fn num_ratings(&self) -> usize {
        self.ratings.iter().filter(|v| **v != UNRATED).count()
    }

    pub fn rater_ids(&self) -> &[RaterId] {
        &self.rater_ids
    }

    pub fn item_ids(&self) -> &[ItemId] {
        &self.item_ids
    }

    pub fn rater_index(&self, rater_id: RaterId) -> Option<usize> {
        self.rater_index.get(&rater_id).copied()
    }

    pub fn item_index(&self, item_id: ItemId) -> Option<usize> {
        self.item_index.get(&item_id).copied()
    }

    pub fn row(&self, rater_idx: usize) -> ArrayView1<'_, f32> {
        self.ratings.row(rater_idx)
    }

    pub fn rater_vector(&self, rater_id: RaterId) -> Option<ArrayView1<'_, f32>> {
        self.rater_index(rater_id).map(|idx| self.ratings.row(idx))
    }

    pub fn item_vector(&self, item_id: ItemId) -> Option<ArrayView1<'_, f32>> {
        self.item_index(item_id).map(|idx| self.ratings.column(idx))
    }

    pub fn cell(&self, rater_idx: usize, item_idx: usize) -> f32 {
        self.ratings[[rater_idx, item_idx]]
    }

    pub fn rating(&self, rater_id: RaterId, item_id: ItemId) -> Option<f32> {
        let row = self.rater_index(rater_id)?;
        let col = self.item_index(item_id)?;
        let value = self.cell(row, col);
        (value != UNRATED).then_some(value)
    }

    pub fn rated_items(&self, rater_id: RaterId) -> Vec<ItemId> {
        match self.rater_vector(rater_id) {
            Some(row) => row
                .iter()
                .zip(self.item_ids.iter())
                .filter(|(value, _)| **value != UNRATED)
                .map(|(_, item)| *item)
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn approved(rater: RaterId, item: ItemId, score: u8) -> Rating {
        Rating::new(rater, item, score).approved()
    }

    #[test]
    fn test_build_orders_rows_and_columns() {
        let ratings = vec![
            approved(30, 7, 4),
            approved(10, 42, 5),
            approved(20, 7, 2),
            approved(10, 7, 3),
        ];

        let matrix = RatingMatrix::build(&ratings).unwrap();
        assert_eq!(matrix.rater_ids(), &[10, 20, 30]);
        assert_eq!(matrix.item_ids(), &[7, 42]);
        assert_eq!(matrix.rating(10, 42), Some(5.0));
        assert_eq!(matrix.rating(20, 42), None);
        assert_eq!(matrix.cell(1, 1), UNRATED);
        assert_eq!(matrix.num_ratings(), 4);
    }

    #[test]
    fn test_build_skips_unapproved_and_anonymous() {
        let ratings = vec![
            approved(1, 1, 5),
            Rating::new(2, 1, 4),
            Rating::anonymous(3, 5).approved(),
        ];

        let matrix = RatingMatrix::build(&ratings).unwrap();
        assert_eq!(matrix.rater_ids(), &[1]);
        assert_eq!(matrix.item_ids(), &[1]);
    }

    #[test]
    fn test_build_without_qualifying_ratings_is_empty() {
        let matrix = RatingMatrix::build(&[Rating::new(1, 1, 5)]).unwrap();
        assert!(matrix.is_empty());
        assert!(matrix.rater_vector(1).is_none());
        assert!(matrix.rated_items(1).is_empty());

        assert!(RatingMatrix::build(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_build_rejects_out_of_range_scores() {
        let result = RatingMatrix::build(&[approved(1, 1, 6)]);
        assert!(matches!(result, Err(RecError::InvalidRating(_))));

        let result = RatingMatrix::build(&[Rating::new(1, 1, 0)]);
        assert!(matches!(result, Err(RecError::InvalidRating(_))));
    }

    #[test]
    fn test_build_is_idempotent() {
        let ratings = vec![approved(2, 9, 1), approved(1, 3, 4), approved(2, 3, 5)];
        let first = RatingMatrix::build(&ratings).unwrap();
        let second = RatingMatrix::build(&ratings).unwrap();
        assert_eq!(first.ratings, second.ratings);
        assert_eq!(first.rater_ids(), second.rater_ids());
        assert_eq!(first.item_ids(), second.item_ids());
    }

    #[test]
    fn test_repeated_pair_keeps_latest() {
        let now = Utc::now();
        let ratings = vec![
            approved(1, 1, 2).at(now),
            approved(1, 1, 5).at(now - Duration::days(3)),
        ];
        let matrix = RatingMatrix::build(&ratings).unwrap();
        assert_eq!(matrix.rating(1, 1), Some(2.0));
    }

    #[test]
    fn test_item_vector_is_column() {
        let ratings = vec![approved(1, 5, 4), approved(2, 5, 2), approved(2, 6, 3)];
        let matrix = RatingMatrix::build(&ratings).unwrap();
        let column: Vec<f32> = matrix.item_vector(5).unwrap().to_vec();
        assert_eq!(column, vec![4.0, 2.0]);
        assert_eq!(matrix.rated_items(2), vec![5, 6]);
    }
}
