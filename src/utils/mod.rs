use crate::models::{ItemId, RaterId, Rating, ScoredItem};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;

pub mod metrics;
pub mod validation;

/// Descending by score, ascending by item id on ties.
pub fn sort_scored_desc(items: &mut [ScoredItem]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
}

pub fn lookback_cutoff(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days.max(0))
}

/// Approved ratings for `raters` x `items`, each cell filled with probability `density`.
/// Raters fall into taste groups keyed on `rater_id % 3`, which makes neighborhoods
/// meaningful; the same seed always yields the same data.
pub fn synthetic_ratings(raters: usize, items: usize, density: f64, seed: u64) -> Vec<Rating> {
    let mut rng = StdRng::seed_from_u64(seed);
    let now = Utc::now();
    let mut ratings = Vec::new();

    for rater in 1..=raters as RaterId {
        for item in 1..=items as ItemId {
            if !rng.gen_bool(density.clamp(0.0, 1.0)) {
                continue;
            }
            let liked = (item % 3) == (rater % 3);
            let base: i32 = if liked { 4 } else { 2 };
            let score = (base + rng.gen_range(-1..=1)).clamp(1, 5) as u8;
            let age = Duration::minutes(rng.gen_range(0..60 * 24 * 30));
            ratings.push(Rating::new(rater, item, score).approved().at(now - age));
        }
    }

    ratings
}

pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    max_retries: usize,
    initial_delay: std::time::Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let mut delay = initial_delay;

    for attempt in 0..max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                tracing::warn!("Operation failed (attempt {}), retrying in {:?}: {:?}",
                              attempt + 1, delay, e);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }

    operation().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[test]
    fn test_sort_scored_desc_breaks_ties_by_id() {
        let mut items = vec![
            ScoredItem::new(9, 0.5),
            ScoredItem::new(2, 0.9),
            ScoredItem::new(4, 0.5),
        ];
        sort_scored_desc(&mut items);
        let ids: Vec<i64> = items.iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec![2, 4, 9]);
    }

    #[test]
    fn test_lookback_cutoff_is_in_the_past() {
        let cutoff = lookback_cutoff(7);
        let expected = Utc::now() - Duration::days(7);
        assert!((cutoff - expected).num_seconds().abs() <= 1);
        assert!(lookback_cutoff(-3) <= Utc::now());
    }

    #[test]
    fn test_synthetic_ratings_are_reproducible() {
        let a = synthetic_ratings(20, 30, 0.3, 42);
        let b = synthetic_ratings(20, 30, 0.3, 42);
        assert!(!a.is_empty());
        assert_eq!(a.len(), b.len());
        assert!(a.iter().zip(&b).all(|(x, y)| (x.rater_id, x.item_id, x.score) == (y.rater_id, y.item_id, y.score)));
        assert!(a.iter().all(|r| r.approved && r.is_in_range()));
        assert!(synthetic_ratings(5, 5, 0.0, 1).is_empty());
    }

    #[tokio::test]
    async fn test_retry_with_backoff_eventually_succeeds() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result: Result<usize, String> = retry_with_backoff(
            || async move {
                let n = attempts.fetch_add(1, AtomicOrdering::SeqCst);
                if n < 2 { Err(format!("attempt {}", n)) } else { Ok(n) }
            },
            3,
            std::time::Duration::from_millis(1),
        )
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 3);
    }
}
