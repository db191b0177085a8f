//! In-process stores.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CursorStore, StoreError, SummaryStore};
use crate::events::{ApplyOutcome, EntityId, EntitySummary, EventId, ScanEvent, INITIAL_CURSOR};

/// In-process cursor store.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    value: Mutex<Option<EventId>>,
}

impl InMemoryCursorStore {
    /// Creates an uninitialised store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the given cursor.
    #[must_use]
    pub fn with_value(event_id: EventId) -> Self {
        Self {
            value: Mutex::new(Some(event_id)),
        }
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn last_event_id(&self) -> Result<EventId, StoreError> {
        Ok(self.value.lock().await.unwrap_or(INITIAL_CURSOR))
    }

    async fn set_last_event_id(&self, event_id: EventId) -> Result<(), StoreError> {
        let mut value = self.value.lock().await;
        *value = Some(value.map_or(event_id, |current| current.max(event_id)));
        Ok(())
    }
}

/// In-process summary store.
#[derive(Debug, Default)]
pub struct InMemorySummaryStore {
    rows: Mutex<HashMap<EntityId, EntitySummary>>,
}

impl InMemorySummaryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of summaries.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    /// Returns true if no summaries exist.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SummaryStore for InMemorySummaryStore {
    async fn upsert(&self, event: &ScanEvent) -> Result<ApplyOutcome, StoreError> {
        let mut rows = self.rows.lock().await;
        let summary = rows
            .entry(event.entity_id)
            .or_insert_with(|| EntitySummary::new(event.entity_id));
        Ok(summary.apply_event(event))
    }

    async fn get(&self, entity_id: EntityId) -> Result<Option<EntitySummary>, StoreError> {
        Ok(self.rows.lock().await.get(&entity_id).cloned())
    }
}
