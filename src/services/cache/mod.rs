use crate::algorithms::AttributedItem;
use crate::config::RedisConfig;
use crate::error::RecResult;
use crate::models::RaterId;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Two-tier cache for hybrid results: a local map in front of an optional Redis. Keys embed
/// a per-process instance id, the matrix generation and a per-rater epoch, so a rebuild, a
/// restart or a write touching the rater makes older entries unreachable. Cache failures
/// are logged and treated as misses.
pub struct ResponseCache {
    redis: Option<redis::Client>,
    ttl: Duration,
    instance: u64,
    rater_epochs: DashMap<RaterId, u64>,
    local: DashMap<String, (Instant, Vec<AttributedItem>)>,
}

impl ResponseCache {
    pub fn new(config: &RedisConfig) -> Self {
        let redis = if config.enabled {
            match redis::Client::open(config.url.as_str()) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!("Invalid Redis URL, continuing with the local cache only: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self::with_client(redis, Duration::from_secs(config.ttl_seconds))
    }

    pub fn local_only(ttl: Duration) -> Self {
        Self::with_client(None, ttl)
    }

    fn with_client(redis: Option<redis::Client>, ttl: Duration) -> Self {
        Self {
            redis,
            ttl,
            instance: rand::random(),
            rater_epochs: DashMap::new(),
            local: DashMap::new(),
        }
    }

    pub fn key(&self, generation: u64, rater_id: RaterId, limit: usize) -> String {
        let epoch = self.rater_epochs.get(&rater_id).map(|e| *e).unwrap_or(0);
        format!(
            "recs:{:016x}:{}:{}:{}:{}",
            self.instance, generation, rater_id, epoch, limit
        )
    }

    /// Makes every entry cached for `rater_id` unreachable.
    pub fn forget_rater(&self, rater_id: RaterId) {
        *self.rater_epochs.entry(rater_id).or_insert(0) += 1;
        debug!(rater_id, "Dropped cached recommendations for rater");
    }

    pub async fn get(&self, key: &str) -> Option<Vec<AttributedItem>> {
        if let Some(entry) = self.local.get(key) {
            let (stored_at, items) = entry.value();
            if stored_at.elapsed() < self.ttl {
                return Some(items.clone());
            }
        }
        self.local.remove_if(key, |_, (stored_at, _)| stored_at.elapsed() >= self.ttl);

        let client = self.redis.as_ref()?;
        match Self::redis_get(client, key).await {
            Ok(Some(items)) => {
                debug!(key, "Redis cache hit");
                self.local.insert(key.to_string(), (Instant::now(), items.clone()));
                Some(items)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, "Redis read failed, treating as miss: {}", e);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, items: &[AttributedItem]) {
        self.local.insert(key.to_string(), (Instant::now(), items.to_vec()));

        if let Some(client) = &self.redis {
            if let Err(e) = Self::redis_set(client, key, items, self.ttl.as_secs()).await {
                warn!(key, "Redis write failed: {}", e);
            }
        }
    }

    /// Drops local entries; Redis entries age out through their TTL.
    pub fn clear_local(&self) {
        self.local.clear();
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    async fn redis_get(client: &redis::Client, key: &str) -> RecResult<Option<Vec<AttributedItem>>> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key).await?;
        Ok(match cached {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    async fn redis_set(client: &redis::Client, key: &str, items: &[AttributedItem], ttl_seconds: u64) -> RecResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let json = serde_json::to_string(items)?;
        let _: () = conn.set_ex(key, json, ttl_seconds).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecommendationSource, ScoredItem};

    fn entry(item_id: i64, score: f32) -> AttributedItem {
        AttributedItem {
            item: ScoredItem::new(item_id, score),
            source: RecommendationSource::Collaborative,
        }
    }

    #[test]
    fn test_local_tier_hits_and_clears() {
        tokio_test::block_on(async {
            let cache = ResponseCache::local_only(Duration::from_secs(60));
            let key = cache.key(3, 7, 5);
            assert!(cache.get(&key).await.is_none());

            cache.put(&key, &[entry(1, 0.9)]).await;
            assert_eq!(cache.get(&key).await.unwrap()[0].item.item_id, 1);
            assert!(cache.get(&cache.key(4, 7, 5)).await.is_none());

            cache.clear_local();
            assert!(cache.get(&key).await.is_none());
        });
    }

    #[test]
    fn test_keys_are_scoped_to_instance_and_rater_epoch() {
        let first = ResponseCache::local_only(Duration::from_secs(60));
        let second = ResponseCache::local_only(Duration::from_secs(60));
        assert_ne!(first.key(1, 7, 5), second.key(1, 7, 5));

        let before = first.key(1, 7, 5);
        let other_rater = first.key(1, 8, 5);
        first.forget_rater(7);
        assert_ne!(first.key(1, 7, 5), before);
        assert_eq!(first.key(1, 8, 5), other_rater);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let cache = ResponseCache::local_only(Duration::ZERO);
        cache.put("k", &[entry(1, 0.5)]).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.local_len(), 0);
    }

    #[test]
    fn test_disabled_redis_is_not_contacted() {
        let cache = ResponseCache::new(&RedisConfig {
            url: "redis://localhost:6379".to_string(),
            ttl_seconds: 60,
            enabled: false,
        });
        assert!(cache.redis.is_none());
    }
}
