//! Postgres stores.
//!
//! The summary merge runs as a single `INSERT ... ON CONFLICT DO UPDATE ...
//! WHERE` statement, so the watermark check and the write are atomic and
//! concurrent or retried deliveries of the same event cannot race.
//!
//! Timestamps are stored as `TIMESTAMPTZ`, which keeps the instant but not
//! the source offset. Summaries read back carry a `+00:00` offset; they
//! compare equal to the written values because `DateTime` equality is by
//! instant.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use super::{CursorStore, StoreError, SummaryStore};
use crate::events::{
    ApplyOutcome, EntityId, EntitySummary, EventId, ScanEvent, ScanType, INITIAL_CURSOR,
};

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const CREATE_PROCESSING_STATE: &str = r"
CREATE TABLE IF NOT EXISTS processing_state (
    id            INT         PRIMARY KEY DEFAULT 1 CHECK (id = 1),
    last_event_id BIGINT      NOT NULL DEFAULT 1,
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const SEED_PROCESSING_STATE: &str = r"
INSERT INTO processing_state (id, last_event_id) VALUES (1, 1)
ON CONFLICT (id) DO NOTHING";

const CREATE_ENTITY_SUMMARY: &str = r"
CREATE TABLE IF NOT EXISTS entity_summary (
    entity_id          BIGINT      PRIMARY KEY,
    latest_event_id    BIGINT      NOT NULL,
    latest_type        TEXT        NOT NULL,
    latest_occurred_at TIMESTAMPTZ NOT NULL,
    latest_status_code TEXT        NOT NULL DEFAULT '',
    latest_run_id      TEXT        NOT NULL DEFAULT '',
    first_pickup_at    TIMESTAMPTZ NULL,
    first_delivery_at  TIMESTAMPTZ NULL
)";

const SELECT_CURSOR: &str = "SELECT last_event_id FROM processing_state WHERE id = 1";

const UPSERT_CURSOR: &str = r"
INSERT INTO processing_state (id, last_event_id, updated_at) VALUES (1, $1, now())
ON CONFLICT (id) DO UPDATE SET
    last_event_id = GREATEST(processing_state.last_event_id, EXCLUDED.last_event_id),
    updated_at = now()";

const UPSERT_SUMMARY: &str = r"
INSERT INTO entity_summary (
    entity_id, latest_event_id, latest_type, latest_occurred_at,
    latest_status_code, latest_run_id, first_pickup_at, first_delivery_at
)
VALUES (
    $1, $2, $3, $4, $5, $6,
    CASE WHEN $3 = 'PICKUP' THEN $4 END,
    CASE WHEN $3 = 'DELIVERY' THEN $4 END
)
ON CONFLICT (entity_id) DO UPDATE SET
    latest_event_id    = EXCLUDED.latest_event_id,
    latest_type        = EXCLUDED.latest_type,
    latest_occurred_at = EXCLUDED.latest_occurred_at,
    latest_status_code = EXCLUDED.latest_status_code,
    latest_run_id      = EXCLUDED.latest_run_id,
    first_pickup_at    = COALESCE(entity_summary.first_pickup_at, EXCLUDED.first_pickup_at),
    first_delivery_at  = COALESCE(entity_summary.first_delivery_at, EXCLUDED.first_delivery_at)
WHERE EXCLUDED.latest_event_id > entity_summary.latest_event_id
RETURNING entity_id";

const SELECT_SUMMARY: &str = r"
SELECT entity_id, latest_event_id, latest_type, latest_occurred_at,
       latest_status_code, latest_run_id, first_pickup_at, first_delivery_at
FROM entity_summary
WHERE entity_id = $1";

/// A row of `entity_summary`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SummaryRow {
    /// Entity key.
    pub entity_id: i64,
    /// Watermark.
    pub latest_event_id: i64,
    /// Latest classification.
    pub latest_type: String,
    /// Latest timestamp.
    pub latest_occurred_at: DateTime<FixedOffset>,
    /// Latest status code.
    pub latest_status_code: String,
    /// Latest run id.
    pub latest_run_id: String,
    /// First pickup timestamp.
    pub first_pickup_at: Option<DateTime<FixedOffset>>,
    /// First delivery timestamp.
    pub first_delivery_at: Option<DateTime<FixedOffset>>,
}

impl From<SummaryRow> for EntitySummary {
    fn from(row: SummaryRow) -> Self {
        Self {
            entity_id: EntityId(row.entity_id),
            latest_event_id: EventId(row.latest_event_id),
            latest_type: Some(ScanType::parse(&row.latest_type)),
            latest_occurred_at: Some(row.latest_occurred_at),
            latest_status_code: row.latest_status_code,
            latest_run_id: row.latest_run_id,
            first_pickup_at: row.first_pickup_at.into(),
            first_delivery_at: row.first_delivery_at.into(),
        }
    }
}

/// Postgres-backed cursor and summary store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Creates the tables if missing and seeds the cursor row.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        info!("Initializing database schema");

        for statement in [CREATE_PROCESSING_STATE, SEED_PROCESSING_STATE, CREATE_ENTITY_SUMMARY] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("Database schema initialized");
        Ok(())
    }
}

#[async_trait]
impl CursorStore for PgStore {
    async fn last_event_id(&self) -> Result<EventId, StoreError> {
        let value: Option<i64> = sqlx::query_scalar(SELECT_CURSOR)
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some(id) => Ok(EventId(id)),
            None => {
                warn!(
                    default = %INITIAL_CURSOR,
                    "processing_state row not found, using initial cursor"
                );
                Ok(INITIAL_CURSOR)
            }
        }
    }

    async fn set_last_event_id(&self, event_id: EventId) -> Result<(), StoreError> {
        sqlx::query(UPSERT_CURSOR)
            .bind(event_id.value())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SummaryStore for PgStore {
    async fn upsert(&self, event: &ScanEvent) -> Result<ApplyOutcome, StoreError> {
        let touched: Option<i64> = sqlx::query_scalar(UPSERT_SUMMARY)
            .bind(event.entity_id.value())
            .bind(event.event_id.value())
            .bind(event.scan_type.as_str())
            .bind(event.occurred_at)
            .bind(&event.status_code)
            .bind(&event.run_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(if touched.is_some() {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Ignored
        })
    }

    async fn get(&self, entity_id: EntityId) -> Result<Option<EntitySummary>, StoreError> {
        let row: Option<SummaryRow> = sqlx::query_as(SELECT_SUMMARY)
            .bind(entity_id.value())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(EntitySummary::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(ts).expect("timestamp")
    }

    #[test]
    fn test_summary_row_conversion() {
        let row = SummaryRow {
            entity_id: 7,
            latest_event_id: 12,
            latest_type: "DELIVERY".to_string(),
            latest_occurred_at: at("2025-06-01T12:00:00Z"),
            latest_status_code: "OK".to_string(),
            latest_run_id: "run-3".to_string(),
            first_pickup_at: Some(at("2025-06-01T08:00:00Z")),
            first_delivery_at: None,
        };

        let summary = EntitySummary::from(row);
        assert_eq!(summary.entity_id, EntityId(7));
        assert_eq!(summary.latest_event_id, EventId(12));
        assert_eq!(summary.latest_type, Some(ScanType::Delivery));
        assert!(summary.is_picked_up());
        assert!(!summary.is_delivered());
    }

    #[test]
    fn test_upsert_is_conditioned_on_watermark() {
        assert!(UPSERT_SUMMARY.contains("WHERE EXCLUDED.latest_event_id > entity_summary.latest_event_id"));
        assert!(UPSERT_SUMMARY.contains("COALESCE(entity_summary.first_pickup_at"));
        assert!(UPSERT_SUMMARY.contains("COALESCE(entity_summary.first_delivery_at"));
    }

    #[test]
    fn test_cursor_upsert_never_regresses() {
        assert!(UPSERT_CURSOR.contains("GREATEST(processing_state.last_event_id"));
    }
}
