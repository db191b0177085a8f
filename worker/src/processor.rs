//! Scan event processor.
//!
//! Applies scan events to the summary store. Each event is handled
//! independently; the store's conditional upsert makes repeated or
//! out-of-order application safe.

use std::sync::Arc;

use scanrelay::{ApplyOutcome, EventId, ScanEvent, StoreError, SummaryStore};
use tracing::{debug, warn};

/// Processing errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessError {
    /// The summary store rejected the event.
    #[error("failed to apply event {event_id}: {source}")]
    Store {
        /// Event that failed.
        event_id: EventId,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

/// Result of processing a batch of events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Events applied or ignored without error.
    pub processed: usize,
    /// Events among the processed that changed a summary.
    pub applied: usize,
    /// Failed events with their error messages.
    pub failures: Vec<(EventId, String)>,
}

impl BatchOutcome {
    /// Returns true if every event succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies scan events to entity summaries.
#[derive(Clone)]
pub struct ScanEventProcessor {
    store: Arc<dyn SummaryStore>,
}

impl std::fmt::Debug for ScanEventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEventProcessor").finish_non_exhaustive()
    }
}

impl ScanEventProcessor {
    /// Creates a processor writing to the given store.
    #[must_use]
    pub fn new(store: Arc<dyn SummaryStore>) -> Self {
        Self { store }
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the store upsert fails.
    pub async fn process_single(&self, event: &ScanEvent) -> Result<ApplyOutcome, ProcessError> {
        let outcome = self
            .store
            .upsert(event)
            .await
            .map_err(|source| ProcessError::Store {
                event_id: event.event_id,
                source,
            })?;

        match outcome {
            ApplyOutcome::Applied => debug!(
                event_id = %event.event_id,
                entity_id = %event.entity_id,
                scan_type = %event.scan_type,
                "Applied scan event"
            ),
            ApplyOutcome::Ignored => debug!(
                event_id = %event.event_id,
                entity_id = %event.entity_id,
                "Scan event at or below watermark, ignored"
            ),
        }

        Ok(outcome)
    }

    /// Applies a batch of events.
    ///
    /// One event's failure does not stop the rest.
    pub async fn process_batch(&self, events: &[ScanEvent]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for event in events {
            match self.process_single(event).await {
                Ok(applied) => {
                    outcome.processed += 1;
                    if applied.is_applied() {
                        outcome.applied += 1;
                    }
                }
                Err(e) => {
                    warn!(event_id = %event.event_id, error = %e, "Failed to process scan event");
                    outcome.failures.push((event.event_id, e.to_string()));
                }
            }
        }

        outcome
    }
}
