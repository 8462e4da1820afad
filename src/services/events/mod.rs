pub mod postgres;

use crate::config::EventConfig;
use crate::error::RecResult;
use crate::models::*;
use crate::utils::lookback_cutoff;
use crate::utils::validation::{validate_batch_size, validate_new_event};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub use postgres::PgEventStore;

/// Persistence for logged interactions. Implementations keep at most one record per
/// [`EventKey`] and must make the presence check and the insert a single atomic step.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_if_absent(&self, event: NewEvent) -> RecResult<Option<EventRecord>>;

    /// Inserts the whole batch in one operation, skipping keys that already exist.
    async fn insert_many_if_absent(&self, events: Vec<NewEvent>) -> RecResult<Vec<EventRecord>>;

    async fn existing_keys(&self, keys: &[EventKey]) -> RecResult<HashSet<EventKey>>;

    async fn events_since(
        &self,
        rater_id: RaterId,
        since: DateTime<Utc>,
        event_type: Option<EventType>,
    ) -> RecResult<Vec<EventRecord>>;

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> RecResult<u64>;
}

#[derive(Default)]
pub struct MemoryEventStore {
    records: DashMap<EventKey, EventRecord>,
    next_id: AtomicI64,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert_locked(&self, event: NewEvent) -> Option<EventRecord> {
        match self.records.entry(event.key()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let record = EventRecord {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                    rater_id: event.rater_id,
                    item_id: event.item_id,
                    event_type: event.event_type,
                    scope_key: event.scope_key,
                    metadata: event.metadata,
                    timestamp: event.occurred_at.unwrap_or_else(Utc::now),
                };
                slot.insert(record.clone());
                Some(record)
            }
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_if_absent(&self, event: NewEvent) -> RecResult<Option<EventRecord>> {
        Ok(self.insert_locked(event))
    }

    async fn insert_many_if_absent(&self, events: Vec<NewEvent>) -> RecResult<Vec<EventRecord>> {
        Ok(events
            .into_iter()
            .filter_map(|event| self.insert_locked(event))
            .collect())
    }

    async fn existing_keys(&self, keys: &[EventKey]) -> RecResult<HashSet<EventKey>> {
        Ok(keys
            .iter()
            .filter(|key| self.records.contains_key(*key))
            .cloned()
            .collect())
    }

    async fn events_since(
        &self,
        rater_id: RaterId,
        since: DateTime<Utc>,
        event_type: Option<EventType>,
    ) -> RecResult<Vec<EventRecord>> {
        let mut events: Vec<EventRecord> = self
            .records
            .iter()
            .filter(|entry| {
                let record = entry.value();
                record.rater_id == rater_id
                    && record.timestamp >= since
                    && event_type.map_or(true, |t| record.event_type == t)
            })
            .map(|entry| entry.value().clone())
            .collect();

        events.sort_by_key(|record| record.id);
        Ok(events)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> RecResult<u64> {
        let mut removed = 0u64;
        self.records.retain(|_, record| {
            let keep = record.timestamp >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

/// Keeps interaction logs free of repeats: one record per (rater, item, event type, scope).
pub struct EventDeduplicator {
    store: Arc<dyn EventStore>,
    config: EventConfig,
}

impl EventDeduplicator {
    pub fn new(store: Arc<dyn EventStore>, config: EventConfig) -> Self {
        Self { store, config }
    }

    pub fn in_memory(config: EventConfig) -> Self {
        Self::new(Arc::new(MemoryEventStore::new()), config)
    }

    /// `None` when an identical event was already logged. The scope key is copied into the
    /// metadata so it survives exports that drop the key columns.
    pub async fn log_event_if_new(
        &self,
        rater_id: RaterId,
        item_id: ItemId,
        event_type: EventType,
        scope_key: &str,
        metadata: Value,
    ) -> RecResult<Option<EventRecord>> {
        let event = NewEvent::new(rater_id, item_id, event_type, scope_key)
            .with_metadata(stamp_scope(metadata, scope_key));
        self.log_new_event(event).await
    }

    pub async fn log_new_event(&self, event: NewEvent) -> RecResult<Option<EventRecord>> {
        validate_new_event(&event)?;

        let (rater_id, item_id, event_type) = (event.rater_id, event.item_id, event.event_type);
        match self.store.insert_if_absent(event).await {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                debug!(rater_id, item_id, %event_type, "Duplicate event skipped");
                Ok(None)
            }
            Err(e) if e.is_duplicate_key() => {
                debug!(rater_id, item_id, %event_type, "Duplicate event rejected by store");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Logs a batch, collapsing repeats inside it and skipping events already stored.
    /// Returns only the records that were actually created.
    pub async fn bulk_log_events(&self, events: Vec<NewEvent>) -> RecResult<Vec<EventRecord>> {
        validate_batch_size(events.len(), self.config.max_batch_size)?;
        for event in &events {
            validate_new_event(event)?;
        }

        let submitted = events.len();
        let mut seen = HashSet::with_capacity(submitted);
        let unique: Vec<NewEvent> = events
            .into_iter()
            .filter(|event| seen.insert(event.key()))
            .map(|event| {
                let scope_key = event.scope_key.clone();
                let metadata = stamp_scope(event.metadata.clone(), &scope_key);
                event.with_metadata(metadata)
            })
            .collect();

        let keys: Vec<EventKey> = unique.iter().map(NewEvent::key).collect();
        let existing = self.store.existing_keys(&keys).await?;
        let fresh: Vec<NewEvent> = unique
            .into_iter()
            .filter(|event| !existing.contains(&event.key()))
            .collect();

        if fresh.is_empty() {
            debug!(submitted, "Bulk batch contained only known events");
            return Ok(Vec::new());
        }

        let created = self.store.insert_many_if_absent(fresh).await?;
        info!(submitted, created = created.len(), "Bulk logged events");
        Ok(created)
    }

    /// Most recent record per item for one event type, newest first. Defaults to the
    /// shown-recommendation lookback.
    pub async fn latest_per_item(
        &self,
        rater_id: RaterId,
        event_type: EventType,
        days: Option<i64>,
    ) -> RecResult<Vec<EventRecord>> {
        let since = lookback_cutoff(days.unwrap_or(self.config.shown_lookback_days));
        let events = self.store.events_since(rater_id, since, Some(event_type)).await?;
        Ok(collapse_latest(events, |record| record.item_id))
    }

    /// Most recent record per (item, event type), newest first. Defaults to the history lookback.
    pub async fn latest_per_item_and_type(
        &self,
        rater_id: RaterId,
        days: Option<i64>,
    ) -> RecResult<Vec<EventRecord>> {
        let since = lookback_cutoff(days.unwrap_or(self.config.history_lookback_days));
        let events = self.store.events_since(rater_id, since, None).await?;
        Ok(collapse_latest(events, |record| (record.item_id, record.event_type)))
    }

    pub async fn event_stats(&self, rater_id: RaterId, days: Option<i64>) -> RecResult<EventStats> {
        let days = days.unwrap_or(self.config.history_lookback_days);
        let events = self.store.events_since(rater_id, lookback_cutoff(days), None).await?;

        let mut events_by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut items = HashSet::new();
        for record in &events {
            *events_by_type.entry(record.event_type.to_string()).or_insert(0) += 1;
            items.insert(record.item_id);
        }

        let last_event = events
            .iter()
            .max_by_key(|record| (record.timestamp, record.id))
            .cloned();

        Ok(EventStats {
            total_events: events.len() as u64,
            unique_items: items.len() as u64,
            events_by_type,
            last_event,
            days,
        })
    }

    /// Deletes records older than `days` (the configured retention when `None`).
    pub async fn purge_older_than(&self, days: Option<i64>) -> RecResult<u64> {
        let days = days.unwrap_or(self.config.retention_days);
        let removed = self.store.purge_before(lookback_cutoff(days)).await?;
        info!(removed, days, "Purged old event records");
        Ok(removed)
    }
}

fn stamp_scope(metadata: Value, scope_key: &str) -> Value {
    match metadata {
        Value::Object(mut map) => {
            map.entry("scope_key")
                .or_insert_with(|| Value::String(scope_key.to_string()));
            Value::Object(map)
        }
        Value::Null => serde_json::json!({ "scope_key": scope_key }),
        other => other,
    }
}

/// Keeps the highest-id record per group and orders the survivors newest first.
fn collapse_latest<K, F>(events: Vec<EventRecord>, group: F) -> Vec<EventRecord>
where
    K: std::hash::Hash + Eq,
    F: Fn(&EventRecord) -> K,
{
    let mut latest: HashMap<K, EventRecord> = HashMap::new();
    for record in events {
        match latest.entry(group(&record)) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if record.id > slot.get().id {
                    slot.insert(record);
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    let mut collapsed: Vec<EventRecord> = latest.into_values().collect();
    collapsed.sort_by_key(|record| Reverse((record.timestamp, record.id)));
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn dedup() -> EventDeduplicator {
        EventDeduplicator::in_memory(EventConfig::default())
    }

    #[tokio::test]
    async fn test_log_event_if_new_is_idempotent() {
        let dedup = dedup();
        let first = dedup
            .log_event_if_new(1, 10, EventType::RecShown, "session-1", json!({"section": "content"}))
            .await
            .unwrap();
        let second = dedup
            .log_event_if_new(1, 10, EventType::RecShown, "session-1", json!({"section": "content"}))
            .await
            .unwrap();

        let record = first.unwrap();
        assert_eq!(record.metadata["scope_key"], "session-1");
        assert_eq!(record.metadata["section"], "content");
        assert!(second.is_none());

        let other_scope = dedup
            .log_event_if_new(1, 10, EventType::RecShown, "session-2", Value::Null)
            .await
            .unwrap();
        assert!(other_scope.is_some());
    }

    #[tokio::test]
    async fn test_empty_scope_key_is_rejected() {
        let result = dedup()
            .log_event_if_new(1, 10, EventType::ProductView, "", Value::Null)
            .await;
        assert!(matches!(result, Err(e) if e.is_invalid_input()));
    }

    #[tokio::test]
    async fn test_bulk_collapses_batch_and_skips_stored() {
        let dedup = dedup();
        dedup
            .log_event_if_new(1, 10, EventType::RecShown, "s", Value::Null)
            .await
            .unwrap();

        let batch = vec![
            NewEvent::new(1, 10, EventType::RecShown, "s"),
            NewEvent::new(1, 11, EventType::RecShown, "s"),
            NewEvent::new(1, 11, EventType::RecShown, "s"),
            NewEvent::new(1, 12, EventType::RecShown, "s"),
        ];
        let created = dedup.bulk_log_events(batch).await.unwrap();
        let ids: Vec<ItemId> = created.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec![11, 12]);

        let again = dedup
            .bulk_log_events(vec![NewEvent::new(1, 12, EventType::RecShown, "s")])
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_rejects_oversized_batch() {
        let dedup = EventDeduplicator::in_memory(EventConfig {
            max_batch_size: 2,
            ..EventConfig::default()
        });
        let batch = (0..3)
            .map(|i| NewEvent::new(1, i + 1, EventType::ProductView, "s"))
            .collect();
        assert!(dedup.bulk_log_events(batch).await.is_err());
    }

    #[tokio::test]
    async fn test_latest_per_item_collapses_and_orders() {
        let dedup = dedup();
        let now = Utc::now();
        dedup
            .bulk_log_events(vec![
                NewEvent::new(1, 10, EventType::RecShown, "a").at(now - Duration::hours(3)),
                NewEvent::new(1, 10, EventType::RecShown, "b").at(now - Duration::hours(1)),
                NewEvent::new(1, 20, EventType::RecShown, "a").at(now - Duration::hours(2)),
                NewEvent::new(1, 30, EventType::RecShown, "a").at(now - Duration::days(20)),
                NewEvent::new(1, 20, EventType::RecClicked, "a").at(now),
            ])
            .await
            .unwrap();

        let shown = dedup.latest_per_item(1, EventType::RecShown, None).await.unwrap();
        let items: Vec<(ItemId, String)> = shown.iter().map(|r| (r.item_id, r.scope_key.clone())).collect();
        assert_eq!(items, vec![(10, "b".to_string()), (20, "a".to_string())]);

        let history = dedup.latest_per_item_and_type(1, None).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].event_type, EventType::RecClicked);
    }

    #[tokio::test]
    async fn test_stats_and_purge() {
        let dedup = dedup();
        let now = Utc::now();
        dedup
            .bulk_log_events(vec![
                NewEvent::new(1, 10, EventType::ProductView, "a").at(now - Duration::days(1)),
                NewEvent::new(1, 11, EventType::ProductView, "a").at(now),
                NewEvent::new(1, 11, EventType::ProductClick, "a").at(now),
                NewEvent::new(1, 12, EventType::ProductView, "a").at(now - Duration::days(200)),
            ])
            .await
            .unwrap();

        let stats = dedup.event_stats(1, Some(7)).await.unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.unique_items, 2);
        assert_eq!(stats.events_by_type["product_view"], 2);
        assert!(stats.last_event.is_some());

        assert_eq!(dedup.purge_older_than(None).await.unwrap(), 1);
        assert_eq!(dedup.event_stats(1, Some(365)).await.unwrap().total_events, 3);
    }
}
