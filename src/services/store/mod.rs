pub mod postgres;

use crate::error::RecResult;
use crate::models::*;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, info};

pub use postgres::PgStore;

#[async_trait]
pub trait RatingSource: Send + Sync {
    /// Every approved rating, anonymous ones included.
    async fn approved_ratings(&self) -> RecResult<Vec<Rating>>;

    /// All of a rater's ratings regardless of approval state.
    async fn ratings_by(&self, rater_id: RaterId) -> RecResult<Vec<Rating>>;

    /// Approved ratings of one item.
    async fn ratings_for_item(&self, item_id: ItemId) -> RecResult<Vec<Rating>>;

    /// Identified raters hold at most one rating per item; a resubmission replaces it.
    async fn submit_rating(&self, rating: Rating) -> RecResult<Rating>;

    /// Returns `false` when the rater has no rating for the item.
    async fn approve_rating(&self, rater_id: RaterId, item_id: ItemId) -> RecResult<bool>;
}

#[async_trait]
pub trait ItemCatalog: Send + Sync {
    async fn active_items(&self) -> RecResult<Vec<Item>>;
    async fn item(&self, item_id: ItemId) -> RecResult<Option<Item>>;
    async fn upsert_item(&self, item: Item) -> RecResult<()>;
}

#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn profile(&self, rater_id: RaterId) -> RecResult<Option<RaterProfile>>;
    async fn upsert_profile(&self, profile: RaterProfile) -> RecResult<()>;
}

/// Everything the recommendation service reads from.
pub trait DataStore: RatingSource + ItemCatalog + ProfileSource {}

impl<T: RatingSource + ItemCatalog + ProfileSource> DataStore for T {}

#[derive(Default)]
pub struct MemoryStore {
    ratings: RwLock<Vec<Rating>>,
    items: RwLock<BTreeMap<ItemId, Item>>,
    profiles: RwLock<HashMap<RaterId, RaterProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store as-is; ratings are not deduplicated.
    pub fn with_data(ratings: Vec<Rating>, items: Vec<Item>, profiles: Vec<RaterProfile>) -> Self {
        info!(
            ratings = ratings.len(),
            items = items.len(),
            profiles = profiles.len(),
            "Initialized in-memory store"
        );

        Self {
            ratings: RwLock::new(ratings),
            items: RwLock::new(items.into_iter().map(|item| (item.id, item)).collect()),
            profiles: RwLock::new(profiles.into_iter().map(|p| (p.rater_id, p)).collect()),
        }
    }

    pub async fn rating_count(&self) -> usize {
        self.ratings.read().await.len()
    }
}

#[async_trait]
impl RatingSource for MemoryStore {
    async fn approved_ratings(&self) -> RecResult<Vec<Rating>> {
        let ratings = self.ratings.read().await;
        Ok(ratings.iter().filter(|r| r.approved).cloned().collect())
    }

    async fn ratings_by(&self, rater_id: RaterId) -> RecResult<Vec<Rating>> {
        let ratings = self.ratings.read().await;
        Ok(ratings
            .iter()
            .filter(|r| r.rater_id == Some(rater_id))
            .cloned()
            .collect())
    }

    async fn ratings_for_item(&self, item_id: ItemId) -> RecResult<Vec<Rating>> {
        let ratings = self.ratings.read().await;
        Ok(ratings
            .iter()
            .filter(|r| r.item_id == item_id && r.approved)
            .cloned()
            .collect())
    }

    async fn submit_rating(&self, rating: Rating) -> RecResult<Rating> {
        let mut ratings = self.ratings.write().await;

        if rating.rater_id.is_some() {
            if let Some(existing) = ratings
                .iter_mut()
                .find(|r| r.rater_id == rating.rater_id && r.item_id == rating.item_id)
            {
                debug!(rater_id = ?rating.rater_id, item_id = rating.item_id, "Replacing existing rating");
                *existing = rating.clone();
                return Ok(rating);
            }
        }

        ratings.push(rating.clone());
        Ok(rating)
    }

    async fn approve_rating(&self, rater_id: RaterId, item_id: ItemId) -> RecResult<bool> {
        let mut ratings = self.ratings.write().await;
        match ratings
            .iter_mut()
            .find(|r| r.rater_id == Some(rater_id) && r.item_id == item_id)
        {
            Some(rating) => {
                rating.approved = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ItemCatalog for MemoryStore {
    async fn active_items(&self) -> RecResult<Vec<Item>> {
        let items = self.items.read().await;
        Ok(items.values().filter(|item| item.is_active()).cloned().collect())
    }

    async fn item(&self, item_id: ItemId) -> RecResult<Option<Item>> {
        let items = self.items.read().await;
        Ok(items.get(&item_id).cloned())
    }

    async fn upsert_item(&self, item: Item) -> RecResult<()> {
        let mut items = self.items.write().await;
        items.insert(item.id, item);
        Ok(())
    }
}

#[async_trait]
impl ProfileSource for MemoryStore {
    async fn profile(&self, rater_id: RaterId) -> RecResult<Option<RaterProfile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(&rater_id).cloned())
    }

    async fn upsert_profile(&self, profile: RaterProfile) -> RecResult<()> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.rater_id, profile);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_replaces_rating_per_rater_and_item() {
        let store = MemoryStore::new();
        store.submit_rating(Rating::new(1, 10, 2)).await.unwrap();
        store.submit_rating(Rating::new(1, 10, 5)).await.unwrap();
        store.submit_rating(Rating::anonymous(10, 4)).await.unwrap();
        store.submit_rating(Rating::anonymous(10, 3)).await.unwrap();

        assert_eq!(store.rating_count().await, 3);
        let mine = store.ratings_by(1).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].score, 5);
    }

    #[tokio::test]
    async fn test_approval_controls_visibility() {
        let store = MemoryStore::new();
        store.submit_rating(Rating::new(1, 10, 4)).await.unwrap();
        assert!(store.approved_ratings().await.unwrap().is_empty());
        assert!(store.ratings_for_item(10).await.unwrap().is_empty());

        assert!(store.approve_rating(1, 10).await.unwrap());
        assert!(!store.approve_rating(2, 10).await.unwrap());
        assert_eq!(store.approved_ratings().await.unwrap().len(), 1);
        assert_eq!(store.ratings_for_item(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_catalog_lists_active_items_only() {
        let store = MemoryStore::with_data(
            Vec::new(),
            vec![
                Item::new(1, "Whey", "protein"),
                Item::new(2, "Creatine", "performance").with_status(ItemStatus::OutOfStock),
            ],
            vec![RaterProfile::new(7).with_goal("muscle_gain")],
        );

        let active: Vec<ItemId> = store.active_items().await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(active, vec![1]);
        assert!(store.item(2).await.unwrap().is_some());
        assert_eq!(
            store.profile(7).await.unwrap().and_then(|p| p.goal),
            Some("muscle_gain".to_string())
        );
    }
}
