use super::{ItemCatalog, ProfileSource, RatingSource};
use crate::config::PostgresConfig;
use crate::error::{RecError, RecResult};
use crate::models::*;
use crate::utils::retry_with_backoff;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id BIGINT PRIMARY KEY,
        name TEXT NOT NULL,
        category TEXT NOT NULL,
        supplement_type TEXT NOT NULL DEFAULT '',
        goals TEXT[] NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'active'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ratings (
        id BIGSERIAL PRIMARY KEY,
        rater_id BIGINT,
        item_id BIGINT NOT NULL,
        score SMALLINT NOT NULL CHECK (score BETWEEN 1 AND 5),
        approved BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS ratings_rater_item_idx
        ON ratings (rater_id, item_id) WHERE rater_id IS NOT NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rater_profiles (
        rater_id BIGINT PRIMARY KEY,
        goal TEXT,
        dietary_restrictions TEXT[] NOT NULL DEFAULT '{}'
    )
    "#,
];

const RATING_COLUMNS: &str = "rater_id, item_id, score, approved, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &PostgresConfig) -> RecResult<Self> {
        let pool = retry_with_backoff(
            || {
                PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(&config.url)
            },
            3,
            Duration::from_millis(200),
        )
        .await?;

        info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> RecResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Catalog and rating tables ready");
        Ok(())
    }
}

fn rating_from_row(row: &PgRow) -> RecResult<Rating> {
    let score: i16 = row.try_get("score")?;
    let score = u8::try_from(score)
        .map_err(|_| RecError::InvalidRating(format!("stored score {} out of range", score)))?;

    Ok(Rating {
        rater_id: row.try_get("rater_id")?,
        item_id: row.try_get("item_id")?,
        score,
        approved: row.try_get("approved")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn item_from_row(row: &PgRow) -> RecResult<Item> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<ItemStatus>()
        .map_err(|e| RecError::Other(anyhow::anyhow!(e)))?;

    Ok(Item {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        supplement_type: row.try_get("supplement_type")?,
        goals: row.try_get("goals")?,
        status,
    })
}

#[async_trait]
impl RatingSource for PgStore {
    async fn approved_ratings(&self) -> RecResult<Vec<Rating>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ratings WHERE approved ORDER BY id",
            RATING_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rating_from_row).collect()
    }

    async fn ratings_by(&self, rater_id: RaterId) -> RecResult<Vec<Rating>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ratings WHERE rater_id = $1 ORDER BY id",
            RATING_COLUMNS
        ))
        .bind(rater_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rating_from_row).collect()
    }

    async fn ratings_for_item(&self, item_id: ItemId) -> RecResult<Vec<Rating>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ratings WHERE item_id = $1 AND approved ORDER BY id",
            RATING_COLUMNS
        ))
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rating_from_row).collect()
    }

    async fn submit_rating(&self, rating: Rating) -> RecResult<Rating> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO ratings (rater_id, item_id, score, approved, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (rater_id, item_id) WHERE rater_id IS NOT NULL
            DO UPDATE SET score = EXCLUDED.score,
                          approved = EXCLUDED.approved,
                          created_at = EXCLUDED.created_at
            RETURNING {}
            "#,
            RATING_COLUMNS
        ))
        .bind(rating.rater_id)
        .bind(rating.item_id)
        .bind(rating.score as i16)
        .bind(rating.approved)
        .bind(rating.created_at)
        .fetch_one(&self.pool)
        .await?;

        rating_from_row(&row)
    }

    async fn approve_rating(&self, rater_id: RaterId, item_id: ItemId) -> RecResult<bool> {
        let result = sqlx::query("UPDATE ratings SET approved = TRUE WHERE rater_id = $1 AND item_id = $2")
            .bind(rater_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ItemCatalog for PgStore {
    async fn active_items(&self) -> RecResult<Vec<Item>> {
        let rows = sqlx::query(
            "SELECT id, name, category, supplement_type, goals, status FROM items WHERE status = 'active' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    async fn item(&self, item_id: ItemId) -> RecResult<Option<Item>> {
        let row = sqlx::query(
            "SELECT id, name, category, supplement_type, goals, status FROM items WHERE id = $1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn upsert_item(&self, item: Item) -> RecResult<()> {
        sqlx::query(
            r#"
            INSERT INTO items (id, name, category, supplement_type, goals, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                category = EXCLUDED.category,
                supplement_type = EXCLUDED.supplement_type,
                goals = EXCLUDED.goals,
                status = EXCLUDED.status
            "#,
        )
        .bind(item.id)
        .bind(&item.name)
        .bind(&item.category)
        .bind(&item.supplement_type)
        .bind(&item.goals)
        .bind(item.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ProfileSource for PgStore {
    async fn profile(&self, rater_id: RaterId) -> RecResult<Option<RaterProfile>> {
        let row = sqlx::query("SELECT rater_id, goal, dietary_restrictions FROM rater_profiles WHERE rater_id = $1")
            .bind(rater_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(RaterProfile {
            rater_id: row.try_get("rater_id")?,
            goal: row.try_get("goal")?,
            dietary_restrictions: row.try_get("dietary_restrictions")?,
        }))
    }

    async fn upsert_profile(&self, profile: RaterProfile) -> RecResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rater_profiles (rater_id, goal, dietary_restrictions)
            VALUES ($1, $2, $3)
            ON CONFLICT (rater_id) DO UPDATE SET
                goal = EXCLUDED.goal,
                dietary_restrictions = EXCLUDED.dietary_restrictions
            "#,
        )
        .bind(profile.rater_id)
        .bind(&profile.goal)
        .bind(&profile.dietary_restrictions)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
