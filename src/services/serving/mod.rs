use crate::error::RecResult;
use crate::models::*;
use crate::services::recommendation::RecommendationService;
use crate::services::store::{DataStore, ItemCatalog};
use crate::services::tracking::RecommendationTracker;
use crate::utils::metrics::OnlineMetrics;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Request-facing wrapper: times and counts every call, and records surfaced items with the
/// tracker so later clicks and purchases can be attributed.
pub struct ServingService {
    recommendations: Arc<RecommendationService>,
    tracker: Arc<RecommendationTracker>,
    store: Arc<dyn DataStore>,
    serving_stats: DashMap<String, u64>,
}

impl ServingService {
    pub fn new(
        recommendations: Arc<RecommendationService>,
        tracker: Arc<RecommendationTracker>,
        store: Arc<dyn DataStore>,
    ) -> Self {
        Self {
            recommendations,
            tracker,
            store,
            serving_stats: DashMap::new(),
        }
    }

    pub fn recommendations(&self) -> &Arc<RecommendationService> {
        &self.recommendations
    }

    pub fn tracker(&self) -> &Arc<RecommendationTracker> {
        &self.tracker
    }

    pub async fn serve_collaborative(
        &self,
        rater_id: RaterId,
        limit: usize,
        min_score: f32,
    ) -> RecResult<RecommendationResponse> {
        let start_time = Instant::now();
        self.increment_stat("total_requests");

        let result = self
            .recommendations
            .recommend_collaborative(rater_id, limit, min_score)
            .await;
        let items = self.finish(rater_id, result, start_time)?;

        self.tracker
            .record_shown(rater_id, &items, RecommendationSource::Collaborative);
        Ok(self.response(rater_id, items, |item| {
            format!("Predicted rating {:.1} from similar raters", item.score)
        }))
    }

    pub async fn serve_hybrid(&self, rater_id: RaterId, limit: usize) -> RecResult<RecommendationResponse> {
        let start_time = Instant::now();
        self.increment_stat("total_requests");
        self.increment_stat("hybrid_requests");

        let result = self
            .recommendations
            .recommend_hybrid_attributed(rater_id, limit)
            .await;
        let attributed = self.finish(rater_id, result, start_time)?;

        self.tracker.record_attributed(rater_id, &attributed);
        let sources: HashMap<ItemId, RecommendationSource> =
            attributed.iter().map(|a| (a.item.item_id, a.source)).collect();
        let items: Vec<ScoredItem> = attributed.iter().map(|a| a.item).collect();
        Ok(self.response(rater_id, items, |item| {
            let source = sources
                .get(&item.item_id)
                .copied()
                .unwrap_or(RecommendationSource::Collaborative);
            format!("Blended score {:.3}, mostly from the {} signal", item.score, source)
        }))
    }

    fn finish<T>(&self, rater_id: RaterId, result: RecResult<Vec<T>>, start_time: Instant) -> RecResult<Vec<T>> {
        let latency = start_time.elapsed().as_millis() as u64;
        self.update_latency_stat(latency);

        match result {
            Ok(items) => {
                self.increment_stat("successful_requests");
                if items.is_empty() {
                    self.increment_stat("empty_responses");
                }
                info!(rater_id, count = items.len(), latency_ms = latency, "Served recommendations");
                Ok(items)
            }
            Err(e) => {
                self.increment_stat("failed_requests");
                error!(rater_id, "Failed to serve recommendations: {}", e);
                Err(e)
            }
        }
    }

    fn response(
        &self,
        rater_id: RaterId,
        items: Vec<ScoredItem>,
        reason: impl Fn(&ScoredItem) -> String,
    ) -> RecommendationResponse {
        RecommendationResponse {
            rater_id,
            recommendations: items
                .iter()
                .map(|item| RecommendationItem {
                    item_id: item.item_id,
                    score: item.score,
                    reason: reason(item),
                })
                .collect(),
            generated_at: Utc::now(),
        }
    }

    /// `false` when the item was never shown to the rater.
    pub fn record_feedback(&self, rater_id: RaterId, item_id: ItemId, purchased: bool) -> bool {
        let updated = if purchased {
            self.tracker.mark_clicked(rater_id, item_id) && self.tracker.mark_purchased(rater_id, item_id)
        } else {
            self.tracker.mark_clicked(rater_id, item_id)
        };
        if updated {
            self.increment_stat(if purchased { "purchases" } else { "clicks" });
        }
        updated
    }

    pub fn online_metrics(&self, rater_id: Option<RaterId>) -> OnlineMetrics {
        self.tracker.online_metrics(rater_id)
    }

    pub async fn health_check(&self) -> HashMap<String, serde_json::Value> {
        let mut health = HashMap::new();

        let store_healthy = self.store.active_items().await.is_ok();
        health.insert("store".to_string(), serde_json::Value::Bool(store_healthy));
        health.insert(
            "matrix_loaded".to_string(),
            serde_json::Value::Bool(self.recommendations.matrix_stats().is_some()),
        );
        health.insert(
            "generation".to_string(),
            serde_json::Value::from(self.recommendations.generation()),
        );

        health
    }

    pub fn get_serving_stats(&self) -> HashMap<String, u64> {
        self.serving_stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    fn increment_stat(&self, key: &str) {
        *self.serving_stats.entry(key.to_string()).or_insert(0) += 1;
    }

    fn update_latency_stat(&self, latency_ms: u64) {
        let current_avg = self.serving_stats.get("avg_latency_ms").map(|v| *v).unwrap_or(0);
        let request_count = self.serving_stats.get("total_requests").map(|v| *v).unwrap_or(1);

        let new_avg = if request_count <= 1 {
            latency_ms
        } else {
            (current_avg * (request_count - 1) + latency_ms) / request_count
        };
        self.serving_stats.insert("avg_latency_ms".to_string(), new_avg);

        let current_max = self.serving_stats.get("max_latency_ms").map(|v| *v).unwrap_or(0);
        if latency_ms > current_max {
            self.serving_stats.insert("max_latency_ms".to_string(), latency_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::store::MemoryStore;

    fn serving() -> ServingService {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::with_data(
            vec![
                Rating::new(1, 1, 5).approved(),
                Rating::new(2, 1, 5).approved(),
                Rating::new(2, 2, 5).approved(),
            ],
            vec![Item::new(1, "Whey", "protein"), Item::new(2, "Casein", "protein")],
            Vec::new(),
        ));
        let recommendations = Arc::new(RecommendationService::new(store.clone(), &Config::default()));
        ServingService::new(recommendations, Arc::new(RecommendationTracker::new()), store)
    }

    #[tokio::test]
    async fn test_serve_records_shown_items_and_stats() {
        let serving = serving();
        let response = serving.serve_collaborative(1, 5, 3.5).await.unwrap();
        assert_eq!(response.recommendations.len(), 1);
        assert_eq!(response.recommendations[0].item_id, 2);

        assert!(serving.record_feedback(1, 2, true));
        assert!(!serving.record_feedback(1, 1, false));

        let metrics = serving.online_metrics(Some(1));
        assert_eq!((metrics.impressions, metrics.clicks, metrics.purchases), (1, 1, 1));

        let stats = serving.get_serving_stats();
        assert_eq!(stats["total_requests"], 1);
        assert_eq!(stats["successful_requests"], 1);
        assert_eq!(stats["purchases"], 1);
    }

    #[tokio::test]
    async fn test_hybrid_rows_are_credited_to_contributing_source() {
        let serving = serving();
        let response = serving.serve_hybrid(1, 5).await.unwrap();
        assert_eq!(response.recommendations[0].item_id, 2);

        let row = &serving.tracker().history(1)[0];
        assert_eq!(row.item_id, 2);
        assert_eq!(row.source, RecommendationSource::Collaborative);
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let serving = serving();
        assert!(serving.serve_hybrid(1, 0).await.is_err());
        assert_eq!(serving.get_serving_stats()["failed_requests"], 1);

        let health = serving.health_check().await;
        assert_eq!(health["store"], serde_json::Value::Bool(true));
    }
}
