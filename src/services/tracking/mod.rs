use crate::algorithms::AttributedItem;
use crate::models::*;
use crate::utils::metrics::OnlineMetrics;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Reverse;
use tracing::debug;

/// Which recommendations a rater was shown and what they did with them. One row per
/// (rater, item); engagement flags are updated in place.
#[derive(Default)]
pub struct RecommendationTracker {
    rows: DashMap<(RaterId, ItemId), Recommendation>,
}

impl RecommendationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns only the rows created by this call.
    pub fn record_shown(
        &self,
        rater_id: RaterId,
        items: &[ScoredItem],
        source: RecommendationSource,
    ) -> Vec<Recommendation> {
        self.record(rater_id, items.iter().map(|item| (*item, source)))
    }

    /// Like [`record_shown`](Self::record_shown), crediting each blended item to its own source.
    pub fn record_attributed(&self, rater_id: RaterId, items: &[AttributedItem]) -> Vec<Recommendation> {
        self.record(rater_id, items.iter().map(|a| (a.item, a.source)))
    }

    fn record(
        &self,
        rater_id: RaterId,
        items: impl Iterator<Item = (ScoredItem, RecommendationSource)>,
    ) -> Vec<Recommendation> {
        let mut shown = 0;
        let mut created = Vec::new();
        for (item, source) in items {
            shown += 1;
            if let Entry::Vacant(slot) = self.rows.entry((rater_id, item.item_id)) {
                let recommendation = Recommendation::new(rater_id, item, source);
                slot.insert(recommendation.clone());
                created.push(recommendation);
            }
        }

        debug!(rater_id, shown, created = created.len(), "Recorded shown recommendations");
        created
    }

    /// `false` when the item was never recommended to the rater.
    pub fn mark_clicked(&self, rater_id: RaterId, item_id: ItemId) -> bool {
        self.update(rater_id, item_id, |row| row.clicked = true)
    }

    pub fn mark_purchased(&self, rater_id: RaterId, item_id: ItemId) -> bool {
        self.update(rater_id, item_id, |row| row.purchased = true)
    }

    fn update(&self, rater_id: RaterId, item_id: ItemId, apply: impl FnOnce(&mut Recommendation)) -> bool {
        match self.rows.get_mut(&(rater_id, item_id)) {
            Some(mut row) => {
                apply(row.value_mut());
                row.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Newest first.
    pub fn history(&self, rater_id: RaterId) -> Vec<Recommendation> {
        let mut rows: Vec<Recommendation> = self
            .rows
            .iter()
            .filter(|entry| entry.key().0 == rater_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|row| (Reverse(row.created_at), row.item_id));
        rows
    }

    pub fn clear(&self, rater_id: RaterId) -> usize {
        let before = self.rows.len();
        self.rows.retain(|(rater, _), _| *rater != rater_id);
        before.saturating_sub(self.rows.len())
    }

    /// Engagement over one rater's rows, or over everyone when `rater_id` is `None`.
    pub fn online_metrics(&self, rater_id: Option<RaterId>) -> OnlineMetrics {
        let (mut impressions, mut clicks, mut purchases) = (0u64, 0u64, 0u64);
        for entry in self.rows.iter() {
            if rater_id.is_some_and(|r| entry.key().0 != r) {
                continue;
            }
            impressions += 1;
            clicks += entry.value().clicked as u64;
            purchases += entry.value().purchased as u64;
        }
        OnlineMetrics::from_counts(impressions, clicks, purchases)
    }
}
