use super::EventStore;
use crate::error::{RecError, RecResult};
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use tracing::{debug, info};

const EVENT_COLUMNS: &str = "id, rater_id, item_id, event_type, scope_key, metadata, timestamp";

/// Event log in PostgreSQL. The unique index on the key columns makes
/// `ON CONFLICT DO NOTHING` the atomic check-and-insert.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> RecResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_records (
                id BIGSERIAL PRIMARY KEY,
                rater_id BIGINT NOT NULL,
                item_id BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                scope_key TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT event_records_key UNIQUE (rater_id, item_id, event_type, scope_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS event_records_rater_time_idx ON event_records (rater_id, timestamp DESC)",
        )
        .execute(&self.pool)
        .await?;

        info!("Event table ready");
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> RecResult<EventRecord> {
    let event_type: String = row.try_get("event_type")?;
    let event_type = event_type
        .parse::<EventType>()
        .map_err(|e| RecError::Other(anyhow::anyhow!(e)))?;

    Ok(EventRecord {
        id: row.try_get("id")?,
        rater_id: row.try_get("rater_id")?,
        item_id: row.try_get("item_id")?,
        event_type,
        scope_key: row.try_get("scope_key")?,
        metadata: row.try_get("metadata")?,
        timestamp: row.try_get("timestamp")?,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert_if_absent(&self, event: NewEvent) -> RecResult<Option<EventRecord>> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO event_records (rater_id, item_id, event_type, scope_key, metadata, timestamp)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, NOW()))
            ON CONFLICT (rater_id, item_id, event_type, scope_key) DO NOTHING
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(event.rater_id)
        .bind(event.item_id)
        .bind(event.event_type.as_str())
        .bind(&event.scope_key)
        .bind(&event.metadata)
        .bind(event.occurred_at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn insert_many_if_absent(&self, events: Vec<NewEvent>) -> RecResult<Vec<EventRecord>> {
        let now = Utc::now();
        let mut rater_ids = Vec::with_capacity(events.len());
        let mut item_ids = Vec::with_capacity(events.len());
        let mut event_types = Vec::with_capacity(events.len());
        let mut scope_keys = Vec::with_capacity(events.len());
        let mut metadata: Vec<String> = Vec::with_capacity(events.len());
        let mut timestamps: Vec<DateTime<Utc>> = Vec::with_capacity(events.len());

        for event in events {
            rater_ids.push(event.rater_id);
            item_ids.push(event.item_id);
            event_types.push(event.event_type.as_str().to_string());
            scope_keys.push(event.scope_key);
            metadata.push(serde_json::to_string(&event.metadata)?);
            timestamps.push(event.occurred_at.unwrap_or(now));
        }

        let rows = sqlx::query(&format!(
            r#"
            INSERT INTO event_records (rater_id, item_id, event_type, scope_key, metadata, timestamp)
            SELECT r, i, t, s, m::jsonb, ts
            FROM UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::text[], $5::text[], $6::timestamptz[])
                AS u(r, i, t, s, m, ts)
            ON CONFLICT (rater_id, item_id, event_type, scope_key) DO NOTHING
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(&rater_ids)
        .bind(&item_ids)
        .bind(&event_types)
        .bind(&scope_keys)
        .bind(&metadata)
        .bind(&timestamps)
        .fetch_all(&self.pool)
        .await?;

        debug!(requested = rater_ids.len(), inserted = rows.len(), "Bulk event insert");
        let mut records = rows.iter().map(record_from_row).collect::<RecResult<Vec<_>>>()?;
        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    async fn existing_keys(&self, keys: &[EventKey]) -> RecResult<HashSet<EventKey>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }

        let rater_ids: Vec<i64> = keys.iter().map(|k| k.rater_id).collect();
        let item_ids: Vec<i64> = keys.iter().map(|k| k.item_id).collect();
        let event_types: Vec<String> = keys.iter().map(|k| k.event_type.as_str().to_string()).collect();
        let scope_keys: Vec<String> = keys.iter().map(|k| k.scope_key.clone()).collect();

        let rows = sqlx::query(
            r#"
            SELECT e.rater_id, e.item_id, e.event_type, e.scope_key
            FROM event_records e
            JOIN UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::text[])
                AS k(rater_id, item_id, event_type, scope_key)
              ON e.rater_id = k.rater_id
             AND e.item_id = k.item_id
             AND e.event_type = k.event_type
             AND e.scope_key = k.scope_key
            "#,
        )
        .bind(&rater_ids)
        .bind(&item_ids)
        .bind(&event_types)
        .bind(&scope_keys)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> RecResult<EventKey> {
                let event_type: String = row.try_get("event_type")?;
                Ok(EventKey {
                    rater_id: row.try_get("rater_id")?,
                    item_id: row.try_get("item_id")?,
                    event_type: event_type
                        .parse()
                        .map_err(|e: String| RecError::Other(anyhow::anyhow!(e)))?,
                    scope_key: row.try_get("scope_key")?,
                })
            })
            .collect()
    }

    async fn events_since(
        &self,
        rater_id: RaterId,
        since: DateTime<Utc>,
        event_type: Option<EventType>,
    ) -> RecResult<Vec<EventRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM event_records
            WHERE rater_id = $1
              AND timestamp >= $2
              AND ($3::text IS NULL OR event_type = $3)
            ORDER BY id
            "#,
            EVENT_COLUMNS
        ))
        .bind(rater_id)
        .bind(since)
        .bind(event_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> RecResult<u64> {
        let result = sqlx::query("DELETE FROM event_records WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
