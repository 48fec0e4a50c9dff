//! PostgreSQL persistence for click events.
//!
//! The store owns both tables: `click_events` is an append-only log of every
//! ingested event, `click_aggregates` keeps one continuously-updated row per
//! short code. Nothing in here knows about Kafka.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use thiserror::Error;

use crate::event::ClickEvent;
use crate::settings::Settings;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to connect to postgres: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("{statement} failed: {source}")]
    Query {
        statement: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// The two writes the ingestion loop performs per message. Split out as a
/// trait so loop behavior can be exercised without a database.
#[async_trait]
pub trait ClickStore {
    /// Appends one row to the raw event log and returns its id.
    async fn append_event(&self, event: &ClickEvent) -> Result<i64, StorageError>;

    /// Creates the aggregate row for `short_code` with `total_clicks = 1`,
    /// or atomically increments it. `last_seen` is overwritten with
    /// `occurred_at` unconditionally: last-ingested-wins, so a late-arriving
    /// older event still installs its own, older timestamp.
    async fn upsert_aggregate(
        &self,
        short_code: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Aggregate row as served by the stats queries.
#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRow {
    pub short_code: String,
    pub total_clicks: i64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TrendingRow {
    pub short_code: String,
    pub clicks: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReferrerCount {
    pub referrer: String,
    pub clicks: i64,
}

/// Everything the per-code stats endpoint reports.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeStats {
    pub short_code: String,
    pub total_clicks: i64,
    pub last_24_hours: i64,
    pub last_seen: DateTime<Utc>,
    pub top_referrers: Vec<ReferrerCount>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &Settings) -> Result<Self, StorageError> {
        let opts = PgConnectOptions::new()
            .host(&settings.postgres_host)
            .port(settings.postgres_port)
            .database(&settings.postgres_db)
            .username(&settings.postgres_user)
            .password(&settings.postgres_password);
        let pool = PgPoolOptions::new()
            .max_connections(settings.postgres_max_connections)
            .connect_with(opts)
            .await
            .map_err(StorageError::Connection)?;
        Ok(Self::new(pool))
    }

    /// Creates both tables if absent. Safe to run on every startup.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS click_events (
    id          BIGSERIAL PRIMARY KEY,
    short_code  TEXT        NOT NULL,
    user_id     INTEGER,
    ip          TEXT,
    referrer    TEXT,
    user_agent  TEXT,
    occurred_at TIMESTAMPTZ NOT NULL
)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|source| StorageError::Query {
            statement: "CREATE TABLE click_events",
            source,
        })?;

        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS click_aggregates (
    short_code   TEXT PRIMARY KEY,
    total_clicks BIGINT      NOT NULL DEFAULT 0,
    last_seen    TIMESTAMPTZ NOT NULL
)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|source| StorageError::Query {
            statement: "CREATE TABLE click_aggregates",
            source,
        })?;

        Ok(())
    }

    /// Top aggregates by total clicks.
    pub async fn top_aggregates(&self, limit: i64) -> Result<Vec<AggregateRow>, StorageError> {
        sqlx::query_as(
            r#"
SELECT short_code, total_clicks, last_seen
FROM   click_aggregates
ORDER  BY total_clicks DESC
LIMIT  $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| StorageError::Query {
            statement: "SELECT top aggregates",
            source,
        })
    }

    /// Codes with the most clicks inside the trailing window, counted from
    /// the raw log rather than the aggregates.
    pub async fn trending(&self, hours: i32, limit: i64) -> Result<Vec<TrendingRow>, StorageError> {
        sqlx::query_as(
            r#"
SELECT   short_code, COUNT(*) AS clicks
FROM     click_events
WHERE    occurred_at > NOW() - make_interval(hours => $1)
GROUP BY short_code
ORDER BY clicks DESC
LIMIT    $2
            "#,
        )
        .bind(hours)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| StorageError::Query {
            statement: "SELECT trending codes",
            source,
        })
    }

    /// Full stats for one code, or `None` if it has never been clicked.
    pub async fn code_stats(&self, short_code: &str) -> Result<Option<CodeStats>, StorageError> {
        let aggregate: Option<AggregateRow> = sqlx::query_as(
            "SELECT short_code, total_clicks, last_seen FROM click_aggregates WHERE short_code = $1",
        )
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| StorageError::Query {
            statement: "SELECT aggregate",
            source,
        })?;
        let Some(aggregate) = aggregate else {
            return Ok(None);
        };

        let last_24_hours: i64 = sqlx::query_scalar(
            r#"
SELECT COUNT(*)
FROM   click_events
WHERE  short_code = $1
AND    occurred_at > NOW() - INTERVAL '24 hours'
            "#,
        )
        .bind(short_code)
        .fetch_one(&self.pool)
        .await
        .map_err(|source| StorageError::Query {
            statement: "SELECT 24h count",
            source,
        })?;

        let top_referrers: Vec<ReferrerCount> = sqlx::query_as(
            r#"
SELECT   referrer, COUNT(*) AS clicks
FROM     click_events
WHERE    short_code = $1 AND referrer IS NOT NULL AND referrer != ''
GROUP BY referrer
ORDER BY clicks DESC
LIMIT    5
            "#,
        )
        .bind(short_code)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| StorageError::Query {
            statement: "SELECT top referrers",
            source,
        })?;

        Ok(Some(CodeStats {
            short_code: aggregate.short_code,
            total_clicks: aggregate.total_clicks,
            last_24_hours,
            last_seen: aggregate.last_seen,
            top_referrers,
        }))
    }
}

#[async_trait]
impl ClickStore for PgStore {
    async fn append_event(&self, event: &ClickEvent) -> Result<i64, StorageError> {
        sqlx::query_scalar(
            r#"
INSERT INTO click_events (short_code, user_id, ip, referrer, user_agent, occurred_at)
VALUES ($1, $2, $3, $4, $5, $6)
RETURNING id
            "#,
        )
        .bind(&event.short_code)
        .bind(event.user_id)
        .bind(&event.ip)
        .bind(&event.referrer)
        .bind(&event.user_agent)
        .bind(event.occurred_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|source| StorageError::Query {
            statement: "INSERT INTO click_events",
            source,
        })
    }

    async fn upsert_aggregate(
        &self,
        short_code: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        // single statement, so concurrent consumers never lose an increment
        sqlx::query(
            r#"
INSERT INTO click_aggregates (short_code, total_clicks, last_seen)
VALUES ($1, 1, $2)
ON CONFLICT (short_code)
DO UPDATE SET
    total_clicks = click_aggregates.total_clicks + 1,
    last_seen    = EXCLUDED.last_seen
            "#,
        )
        .bind(short_code)
        .bind(occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|source| StorageError::Query {
            statement: "UPSERT click_aggregates",
            source,
        })?;
        Ok(())
    }
}
