use crate::algorithms::{
    AttributedItem, CandidateScorer, CollaborativeFiltering, HybridCombiner, HybridWeights,
    RankingOptions, RecommendationSections,
};
use crate::config::{Config, RecommendationConfig};
use crate::error::RecResult;
use crate::models::*;
use crate::services::cache::ResponseCache;
use crate::services::scorers::{ContentScorer, GoalScorer};
use crate::services::store::{DataStore, ItemCatalog, ProfileSource, RatingSource};
use crate::utils::validation::{validate_limit, validate_min_score};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MAX_BUILD_ATTEMPTS: usize = 3;

/// Owns the collaborative-filtering snapshot and answers recommendation queries against it.
///
/// The snapshot is built lazily from the store's approved ratings and replaced wholesale on
/// [`rebuild`](Self::rebuild); readers always see either the previous or the next complete
/// snapshot. [`invalidate`](Self::invalidate) drops it so the next query rebuilds; a build
/// that read its ratings before an invalidation is never published.
pub struct RecommendationService {
    store: Arc<dyn DataStore>,
    config: RecommendationConfig,
    combiner: HybridCombiner,
    content: Arc<dyn CandidateScorer>,
    personalized: Arc<dyn CandidateScorer>,
    cache: ResponseCache,
    snapshot: RwLock<Option<Arc<CollaborativeFiltering>>>,
    rebuild_lock: Mutex<()>,
    generation: AtomicU64,
    invalidations: AtomicU64,
}

impl RecommendationService {
    pub fn new(store: Arc<dyn DataStore>, config: &Config) -> Self {
        let content: Arc<dyn CandidateScorer> = Arc::new(ContentScorer::new(store.clone()));
        let personalized: Arc<dyn CandidateScorer> = Arc::new(GoalScorer::new(store.clone()));

        Self {
            store,
            config: config.recommendation.clone(),
            combiner: HybridCombiner::new(HybridWeights::from(&config.hybrid)),
            content,
            personalized,
            cache: ResponseCache::new(&config.redis),
            snapshot: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Swaps in different content-based and personalized sources.
    pub fn with_scorers(mut self, content: Arc<dyn CandidateScorer>, personalized: Arc<dyn CandidateScorer>) -> Self {
        self.content = content;
        self.personalized = personalized;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &RecommendationConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Rebuilds the snapshot from the current approved ratings and publishes it.
    pub async fn rebuild(&self) -> RecResult<MatrixStats> {
        let _guard = self.rebuild_lock.lock().await;
        let engine = self.build_locked().await?;
        Ok(engine.stats())
    }

    pub fn invalidate(&self) {
        let mut snapshot = self.snapshot.write();
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        *snapshot = None;
        debug!("Rating matrix invalidated");
    }

    /// Stats of the published snapshot, without building one.
    pub fn matrix_stats(&self) -> Option<MatrixStats> {
        self.snapshot.read().as_ref().map(|engine| engine.stats())
    }

    /// The published snapshot, building it first if there is none.
    pub async fn engine(&self) -> RecResult<Arc<CollaborativeFiltering>> {
        let current = self.snapshot.read().clone();
        if let Some(engine) = current {
            return Ok(engine);
        }

        let _guard = self.rebuild_lock.lock().await;
        let current = self.snapshot.read().clone();
        if let Some(engine) = current {
            return Ok(engine);
        }
        self.build_locked().await
    }

    async fn build_locked(&self) -> RecResult<Arc<CollaborativeFiltering>> {
        let mut attempt = 1;
        loop {
            let epoch = self.invalidations.load(Ordering::SeqCst);
            let ratings = self.store.approved_ratings().await?;
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

            let engine = Arc::new(CollaborativeFiltering::build(
                &ratings,
                self.config.k_neighbors,
                self.config.min_co_rated,
                generation,
            )?);

            let published = {
                let mut snapshot = self.snapshot.write();
                if self.invalidations.load(Ordering::SeqCst) == epoch {
                    *snapshot = Some(engine.clone());
                    true
                } else {
                    false
                }
            };

            if published {
                self.cache.clear_local();
                info!(generation, ratings = ratings.len(), "Published rating matrix snapshot");
                return Ok(engine);
            }
            if attempt == MAX_BUILD_ATTEMPTS {
                warn!(generation, "Matrix kept being invalidated during rebuild; serving unpublished snapshot");
                return Ok(engine);
            }
            debug!(generation, attempt, "Matrix invalidated during rebuild; reading ratings again");
            attempt += 1;
        }
    }

    /// Stores a rating and drops the rater's cached hybrid results. The matrix itself only
    /// changes once the rating is approved.
    pub async fn submit_rating(&self, rating: Rating) -> RecResult<Rating> {
        let stored = self.store.submit_rating(rating).await?;
        if let Some(rater_id) = stored.rater_id {
            self.cache.forget_rater(rater_id);
        }
        Ok(stored)
    }

    /// Approves a rating and invalidates the matrix. `false` when there was no such rating.
    pub async fn approve_rating(&self, rater_id: RaterId, item_id: ItemId) -> RecResult<bool> {
        let approved = self.store.approve_rating(rater_id, item_id).await?;
        if approved {
            self.cache.forget_rater(rater_id);
            self.invalidate();
        }
        Ok(approved)
    }

    pub async fn update_profile(&self, profile: RaterProfile) -> RecResult<()> {
        let rater_id = profile.rater_id;
        self.store.upsert_profile(profile).await?;
        self.cache.forget_rater(rater_id);
        Ok(())
    }

    pub async fn recommend_collaborative(
        &self,
        rater_id: RaterId,
        limit: usize,
        min_score: f32,
    ) -> RecResult<Vec<ScoredItem>> {
        validate_limit(limit, self.config.max_limit)?;
        validate_min_score(min_score)?;
        self.collaborative_candidates(rater_id, limit, min_score).await
    }

    async fn collaborative_candidates(
        &self,
        rater_id: RaterId,
        limit: usize,
        min_score: f32,
    ) -> RecResult<Vec<ScoredItem>> {
        let engine = self.engine().await?;
        if engine.matrix().is_empty() {
            info!(rater_id, "Rating matrix is empty; no collaborative recommendations");
            return Ok(Vec::new());
        }

        let candidates: Vec<ItemId> = self
            .store
            .active_items()
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();
        let already_rated: HashSet<ItemId> = self
            .store
            .ratings_by(rater_id)
            .await?
            .into_iter()
            .map(|rating| rating.item_id)
            .collect();

        Ok(engine.recommend(
            rater_id,
            &candidates,
            &already_rated,
            RankingOptions { min_score, limit },
        ))
    }

    /// Blends collaborative, content-based and personalized candidates. Any source failing
    /// fails the whole request.
    pub async fn recommend_hybrid(&self, rater_id: RaterId, limit: usize) -> RecResult<Vec<ScoredItem>> {
        let attributed = self.recommend_hybrid_attributed(rater_id, limit).await?;
        Ok(attributed.into_iter().map(|a| a.item).collect())
    }

    /// Hybrid recommendations with each item credited to its dominant source.
    pub async fn recommend_hybrid_attributed(
        &self,
        rater_id: RaterId,
        limit: usize,
    ) -> RecResult<Vec<AttributedItem>> {
        validate_limit(limit, self.config.max_limit)?;

        let generation = self.engine().await?.generation();
        let cache_key = self.cache.key(generation, rater_id, limit);
        if let Some(cached) = self.cache.get(&cache_key).await {
            let rated: HashSet<ItemId> = self
                .store
                .ratings_by(rater_id)
                .await?
                .into_iter()
                .map(|rating| rating.item_id)
                .collect();
            if cached.iter().all(|a| !rated.contains(&a.item.item_id)) {
                debug!(rater_id, "Serving hybrid recommendations from cache");
                return Ok(cached);
            }
            debug!(rater_id, "Cached hybrid result contains rated items; recomputing");
        }

        let depth = self.config.candidate_depth;
        let (collaborative, content, personalized) = futures::try_join!(
            self.collaborative_candidates(rater_id, depth, self.config.min_predicted_rating),
            self.content.score_candidates(rater_id, depth),
            self.personalized.score_candidates(rater_id, depth),
        )?;

        debug!(
            rater_id,
            collaborative = collaborative.len(),
            content = content.len(),
            personalized = personalized.len(),
            "Collected hybrid candidates"
        );

        let labels = [
            RecommendationSource::Collaborative,
            self.content.source(),
            self.personalized.source(),
        ];
        let combined = self
            .combiner
            .combine_attributed(&collaborative, &content, &personalized, labels, limit);
        self.cache.put(&cache_key, &combined).await;
        Ok(combined)
    }

    /// Per-source lists for a page with three sections, deduplicated across sections.
    pub async fn recommendation_sections(&self, rater_id: RaterId, limit: usize) -> RecResult<RecommendationSections> {
        validate_limit(limit, self.config.max_limit)?;

        let (collaborative, content, personalized) = futures::try_join!(
            self.collaborative_candidates(rater_id, limit, self.config.min_predicted_rating),
            self.content.score_candidates(rater_id, limit),
            self.personalized.score_candidates(rater_id, limit),
        )?;

        let ids = |items: Vec<ScoredItem>| -> Vec<ItemId> { items.into_iter().map(|s| s.item_id).collect() };
        Ok(RecommendationSections {
            content_based: ids(content),
            personalized: ids(personalized),
            collaborative: ids(collaborative),
        }
        .deduplicate())
    }

    pub async fn find_neighbors(&self, rater_id: RaterId, k: usize) -> RecResult<Vec<Neighbor>> {
        validate_limit(k, self.config.max_limit)?;
        let engine = self.engine().await?;
        Ok(engine.find_neighbors(rater_id, k))
    }

    pub async fn predict_rating(&self, rater_id: RaterId, item_id: ItemId) -> RecResult<Option<f32>> {
        let engine = self.engine().await?;
        Ok(engine.predict(rater_id, item_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    /// Pauses the first `approved_ratings` call after it has read the data, until released.
    struct GatedStore {
        inner: MemoryStore,
        armed: AtomicBool,
        read_done: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RatingSource for GatedStore {
        async fn approved_ratings(&self) -> RecResult<Vec<Rating>> {
            let ratings = self.inner.approved_ratings().await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.read_done.notify_one();
                self.release.notified().await;
            }
            Ok(ratings)
        }

        async fn ratings_by(&self, rater_id: RaterId) -> RecResult<Vec<Rating>> {
            self.inner.ratings_by(rater_id).await
        }

        async fn ratings_for_item(&self, item_id: ItemId) -> RecResult<Vec<Rating>> {
            self.inner.ratings_for_item(item_id).await
        }

        async fn submit_rating(&self, rating: Rating) -> RecResult<Rating> {
            self.inner.submit_rating(rating).await
        }

        async fn approve_rating(&self, rater_id: RaterId, item_id: ItemId) -> RecResult<bool> {
            self.inner.approve_rating(rater_id, item_id).await
        }
    }

    #[async_trait]
    impl ItemCatalog for GatedStore {
        async fn active_items(&self) -> RecResult<Vec<Item>> {
            self.inner.active_items().await
        }

        async fn item(&self, item_id: ItemId) -> RecResult<Option<Item>> {
            self.inner.item(item_id).await
        }

        async fn upsert_item(&self, item: Item) -> RecResult<()> {
            self.inner.upsert_item(item).await
        }
    }

    #[async_trait]
    impl ProfileSource for GatedStore {
        async fn profile(&self, rater_id: RaterId) -> RecResult<Option<RaterProfile>> {
            self.inner.profile(rater_id).await
        }

        async fn upsert_profile(&self, profile: RaterProfile) -> RecResult<()> {
            self.inner.upsert_profile(profile).await
        }
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_data(
            vec![
                Rating::new(1, 1, 5).approved(),
                Rating::new(1, 2, 4).approved(),
                Rating::new(2, 1, 5).approved(),
                Rating::new(2, 2, 3).approved(),
                Rating::new(2, 3, 5).approved(),
            ],
            (1..=3).map(|id| Item::new(id, format!("item-{}", id), "protein")).collect(),
            Vec::new(),
        ))
    }

    #[tokio::test]
    async fn test_lazy_build_then_invalidate() {
        let store = store();
        let service = RecommendationService::new(store.clone(), &Config::default());
        assert!(service.matrix_stats().is_none());

        let recs = service.recommend_collaborative(1, 5, 3.5).await.unwrap();
        assert_eq!(recs.iter().map(|r| r.item_id).collect::<Vec<_>>(), vec![3]);
        assert_eq!(service.generation(), 1);

        service.recommend_collaborative(1, 5, 3.5).await.unwrap();
        assert_eq!(service.generation(), 1);

        store.submit_rating(Rating::new(3, 1, 4).approved()).await.unwrap();
        service.invalidate();
        assert!(service.matrix_stats().is_none());
        service.find_neighbors(1, 5).await.unwrap();
        assert_eq!(service.generation(), 2);
        assert_eq!(service.matrix_stats().unwrap().raters, 3);
    }

    #[tokio::test]
    async fn test_invalid_limit_is_an_error() {
        let service = RecommendationService::new(store(), &Config::default());
        assert!(service.recommend_collaborative(1, 0, 3.5).await.is_err());
        assert!(service.recommend_hybrid(1, 1000).await.is_err());
        assert!(service.recommend_collaborative(1, 5, f32::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_hybrid_is_cached_per_generation() {
        let service = RecommendationService::new(store(), &Config::default());
        let first = service.recommend_hybrid(1, 5).await.unwrap();
        assert_eq!(first[0].item_id, 3);
        // Same-category content match plus collaborative evidence.
        assert!(first[0].score > 0.4);

        let second = service.recommend_hybrid(1, 5).await.unwrap();
        assert_eq!(first, second);

        service.rebuild().await.unwrap();
        assert_eq!(service.generation(), 2);
        assert_eq!(service.recommend_hybrid(1, 5).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_hybrid_cache_skips_items_rated_since() {
        let store = store();
        let service = RecommendationService::new(store.clone(), &Config::default());
        let first = service.recommend_hybrid(1, 5).await.unwrap();
        assert!(first.iter().any(|s| s.item_id == 3));

        store.submit_rating(Rating::new(1, 3, 2)).await.unwrap();
        assert!(service.recommend_collaborative(1, 5, 3.5).await.unwrap().is_empty());
        let hybrid = service.recommend_hybrid(1, 5).await.unwrap();
        assert!(hybrid.iter().all(|s| s.item_id != 3));
    }

    #[tokio::test]
    async fn test_profile_update_refreshes_cached_hybrid() {
        let store = Arc::new(MemoryStore::with_data(
            vec![Rating::new(1, 1, 5).approved(), Rating::new(2, 1, 5).approved()],
            vec![
                Item::new(1, "Whey", "protein"),
                Item::new(2, "Magnesium", "health").with_goals(&["recovery"]),
            ],
            Vec::new(),
        ));
        let service = RecommendationService::new(store, &Config::default());
        assert!(service.recommend_hybrid(1, 5).await.unwrap().is_empty());

        service
            .update_profile(RaterProfile::new(1).with_goal("recovery"))
            .await
            .unwrap();
        let ids: Vec<ItemId> = service
            .recommend_hybrid(1, 5)
            .await
            .unwrap()
            .iter()
            .map(|s| s.item_id)
            .collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_invalidate_during_rebuild_is_not_lost() {
        let store = Arc::new(GatedStore {
            inner: MemoryStore::with_data(
                vec![
                    Rating::new(1, 1, 5).approved(),
                    Rating::new(2, 1, 4).approved(),
                    Rating::new(3, 1, 5),
                ],
                vec![Item::new(1, "Whey", "protein")],
                Vec::new(),
            ),
            armed: AtomicBool::new(true),
            read_done: Notify::new(),
            release: Notify::new(),
        });
        let service = Arc::new(RecommendationService::new(store.clone(), &Config::default()));

        let rebuilding = tokio::spawn({
            let service = service.clone();
            async move { service.rebuild().await }
        });

        store.read_done.notified().await;
        assert!(service.approve_rating(3, 1).await.unwrap());
        store.release.notify_one();

        let stats = rebuilding.await.unwrap().unwrap();
        assert_eq!(stats.raters, 3);

        let neighbors: Vec<RaterId> = service
            .find_neighbors(1, 5)
            .await
            .unwrap()
            .iter()
            .map(|n| n.rater_id)
            .collect();
        assert!(neighbors.contains(&3));
        assert_eq!(service.matrix_stats().unwrap().raters, 3);
    }
}
