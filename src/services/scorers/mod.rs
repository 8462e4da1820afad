use crate::algorithms::CandidateScorer;
use crate::error::RecResult;
use crate::models::*;
use crate::services::store::{DataStore, ItemCatalog, ProfileSource, RatingSource};
use crate::utils::sort_scored_desc;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Ratings at or above this mark an item as liked for content matching.
pub const LIKED_RATING: u8 = 4;

/// Scores unrated active items by how much metadata they share with items the rater liked.
pub struct ContentScorer {
    store: Arc<dyn DataStore>,
}

impl ContentScorer {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }
}

fn overlap(liked: &Item, candidate: &Item) -> f32 {
    let mut score = 0.0;
    if !liked.category.is_empty() && liked.category == candidate.category {
        score += 1.0;
    }
    if !liked.supplement_type.is_empty() && liked.supplement_type == candidate.supplement_type {
        score += 1.0;
    }
    score += candidate
        .goals
        .iter()
        .filter(|goal| liked.goals.contains(goal))
        .count() as f32;
    score
}

#[async_trait]
impl CandidateScorer for ContentScorer {
    fn source(&self) -> RecommendationSource {
        RecommendationSource::Content
    }

    async fn score_candidates(&self, rater_id: RaterId, limit: usize) -> RecResult<Vec<ScoredItem>> {
        let own = self.store.ratings_by(rater_id).await?;
        let rated: HashSet<ItemId> = own.iter().map(|r| r.item_id).collect();

        let catalog = self.store.active_items().await?;
        let mut liked = Vec::new();
        for rating in own.iter().filter(|r| r.score >= LIKED_RATING) {
            match catalog.iter().find(|item| item.id == rating.item_id) {
                Some(item) => liked.push(item.clone()),
                None => {
                    if let Some(item) = self.store.item(rating.item_id).await? {
                        liked.push(item);
                    }
                }
            }
        }

        if liked.is_empty() {
            debug!(rater_id, "No liked items to match content against");
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredItem> = catalog
            .iter()
            .filter(|item| !rated.contains(&item.id))
            .map(|item| {
                let score = liked.iter().map(|l| overlap(l, item)).sum();
                ScoredItem::new(item.id, score)
            })
            .filter(|scored| scored.score > 0.0)
            .collect();

        sort_scored_desc(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Items serving the rater's stated goal, minus anything tagged with one of their dietary
/// restrictions, ranked by approved review volume and average rating.
pub struct GoalScorer {
    store: Arc<dyn DataStore>,
}

impl GoalScorer {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CandidateScorer for GoalScorer {
    fn source(&self) -> RecommendationSource {
        RecommendationSource::Personalized
    }

    async fn score_candidates(&self, rater_id: RaterId, limit: usize) -> RecResult<Vec<ScoredItem>> {
        let Some(profile) = self.store.profile(rater_id).await? else {
            debug!(rater_id, "No profile; skipping goal-based candidates");
            return Ok(Vec::new());
        };
        let Some(goal) = profile.goal.as_deref() else {
            return Ok(Vec::new());
        };

        let rated: HashSet<ItemId> = self
            .store
            .ratings_by(rater_id)
            .await?
            .iter()
            .map(|r| r.item_id)
            .collect();

        let matching: Vec<Item> = self
            .store
            .active_items()
            .await?
            .into_iter()
            .filter(|item| !rated.contains(&item.id))
            .filter(|item| item.goals.iter().any(|g| g == goal))
            .filter(|item| {
                !profile
                    .dietary_restrictions
                    .iter()
                    .any(|restriction| item.goals.iter().any(|g| g == restriction.trim()))
            })
            .collect();

        let mut scored = Vec::with_capacity(matching.len());
        for item in matching {
            let reviews = self.store.ratings_for_item(item.id).await?;
            let average = if reviews.is_empty() {
                0.0
            } else {
                reviews.iter().map(|r| r.score as f32).sum::<f32>() / reviews.len() as f32
            };
            scored.push(ScoredItem::new(item.id, reviews.len() as f32 + average / MAX_RATING as f32));
        }

        sort_scored_desc(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;

    fn catalog() -> Vec<Item> {
        vec![
            Item::new(1, "Whey Isolate", "protein")
                .with_supplement_type("powder")
                .with_goals(&["muscle_gain"]),
            Item::new(2, "Casein", "protein")
                .with_supplement_type("powder")
                .with_goals(&["muscle_gain", "recovery"]),
            Item::new(3, "Fish Oil", "health")
                .with_supplement_type("capsule")
                .with_goals(&["general_fitness"]),
            Item::new(4, "Plant Protein", "protein")
                .with_supplement_type("powder")
                .with_goals(&["muscle_gain", "vegan"]),
            Item::new(5, "Mass Gainer", "protein")
                .with_goals(&["muscle_gain"])
                .with_status(ItemStatus::Inactive),
        ]
    }

    #[tokio::test]
    async fn test_content_scores_shared_metadata() {
        let store = Arc::new(MemoryStore::with_data(
            vec![Rating::new(7, 1, 5).approved()],
            catalog(),
            Vec::new(),
        ));
        let scorer = ContentScorer::new(store);

        let scored = scorer.score_candidates(7, 10).await.unwrap();
        let ids: Vec<ItemId> = scored.iter().map(|s| s.item_id).collect();
        // category + type + goal for both protein powders; fish oil shares nothing.
        assert_eq!(ids, vec![2, 4]);
        assert_eq!(scored[0].score, 3.0);
        assert_eq!(scorer.source(), RecommendationSource::Content);
    }

    #[tokio::test]
    async fn test_content_without_liked_items_is_empty() {
        let store = Arc::new(MemoryStore::with_data(
            vec![Rating::new(7, 1, 2).approved()],
            catalog(),
            Vec::new(),
        ));
        assert!(ContentScorer::new(store).score_candidates(7, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_goal_scorer_respects_restrictions() {
        let store = Arc::new(MemoryStore::with_data(
            vec![
                Rating::new(1, 2, 5).approved(),
                Rating::new(2, 2, 4).approved(),
                Rating::new(3, 1, 5).approved(),
                Rating::new(4, 1, 1),
            ],
            catalog(),
            vec![RaterProfile::new(9)
                .with_goal("muscle_gain")
                .with_restrictions(&["vegan"])],
        ));
        let scorer = GoalScorer::new(store);

        let scored = scorer.score_candidates(9, 10).await.unwrap();
        let ids: Vec<ItemId> = scored.iter().map(|s| s.item_id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert!((scored[0].score - (2.0 + 4.5 / 5.0)).abs() < 1e-6);
        assert!((scored[1].score - (1.0 + 5.0 / 5.0)).abs() < 1e-6);

        assert!(scorer.score_candidates(404, 10).await.unwrap().is_empty());
    }
}
