//! Durable state boundary.
//!
//! Two stores back the pipeline: the [`CursorStore`] holding the poller's
//! restart position and the [`SummaryStore`] holding one
//! [`EntitySummary`] per entity.
//!
//! # Components
//!
//! - [`memory`]: in-process stores
//! - [`postgres`]: Postgres stores with a single-statement conditional upsert

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::events::{ApplyOutcome, EntityId, EntitySummary, EventId, ScanEvent};

pub use memory::{InMemoryCursorStore, InMemorySummaryStore};
pub use postgres::PgStore;

/// Store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The database rejected or failed the operation.
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be decoded.
    #[error("failed to decode row: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Decode(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

/// Durable single-value cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Returns the last forwarded event id, or the initial cursor if none was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn last_event_id(&self) -> Result<EventId, StoreError>;

    /// Persists the last forwarded event id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    async fn set_last_event_id(&self, event_id: EventId) -> Result<(), StoreError>;
}

/// Durable per-entity summaries.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Applies an event to its entity's summary atomically.
    ///
    /// Creates the summary on the first event for an entity. Events at or
    /// below the stored watermark leave the row unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    async fn upsert(&self, event: &ScanEvent) -> Result<ApplyOutcome, StoreError>;

    /// Returns the summary for an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn get(&self, entity_id: EntityId) -> Result<Option<EntitySummary>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_from_sqlx() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Database("connection refused".to_string());
        assert_eq!(err.to_string(), "database error: connection refused");
    }
}
