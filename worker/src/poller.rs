//! API poller.
//!
//! Fetches pages of scan events after the cursor, forwards each event to
//! the queue in ascending order and only then advances and persists the
//! cursor. A failed send leaves the cursor in place so the next iteration
//! refetches the same page.

use std::sync::Arc;
use std::time::Duration;

use scanrelay::{CursorStore, EventId, EventSource, MessageQueue, PollCursor, ScanEvent};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics::PollerMetrics;

/// Poller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Maximum events requested per poll.
    pub batch_size: usize,

    /// Wait after an empty page.
    pub poll_interval: Duration,

    /// Wait after a failed iteration.
    pub error_retry_interval: Duration,

    /// Whether events at or below the cursor are still forwarded.
    pub forward_stale_events: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(5),
            error_retry_interval: Duration::from_secs(30),
            forward_stale_events: true,
        }
    }
}

/// Result of one poll iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The page was forwarded and the cursor persisted.
    Forwarded {
        /// Events sent to the queue.
        forwarded: usize,
        /// Events at or below the cursor.
        stale: usize,
        /// Cursor after the iteration.
        cursor: EventId,
        /// Whether the cursor moved.
        advanced: bool,
    },
    /// The source had nothing after the cursor.
    Empty,
    /// The source could not be read.
    FetchFailed(String),
    /// A send failed after `sent` events went out.
    ForwardFailed {
        /// Events sent before the failure.
        sent: usize,
        /// Error message.
        error: String,
    },
    /// Every event was sent but the cursor write failed.
    CursorPersistFailed(String),
}

impl PollOutcome {
    /// Returns true if the iteration failed.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed(_) | Self::ForwardFailed { .. } | Self::CursorPersistFailed(_)
        )
    }
}

/// A fetched page after ordering and stale handling.
#[derive(Debug)]
struct PreparedPage {
    events: Vec<ScanEvent>,
    stale: usize,
    page_max: EventId,
}

/// Polls the scan event source and forwards events to the queue.
pub struct ApiPoller {
    source: Arc<dyn EventSource>,
    cursor_store: Arc<dyn CursorStore>,
    queue: Arc<dyn MessageQueue<ScanEvent>>,
    config: PollerConfig,
    metrics: Arc<PollerMetrics>,
}

impl std::fmt::Debug for ApiPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiPoller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApiPoller {
    /// Creates a new poller.
    #[must_use]
    pub fn new(
        source: Arc<dyn EventSource>,
        cursor_store: Arc<dyn CursorStore>,
        queue: Arc<dyn MessageQueue<ScanEvent>>,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            cursor_store,
            queue,
            config,
            metrics: Arc::new(PollerMetrics::new()),
        }
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<PollerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Runs the poll loop until cancelled.
    ///
    /// The cursor is read from the store once; afterwards the in-memory
    /// copy is authoritative.
    pub async fn run(&self, ctx: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Starting API poller"
        );

        let Some(start) = self.load_cursor(&ctx).await else {
            info!("API poller stopped before start");
            return;
        };
        let mut cursor = PollCursor::new(start);
        info!(cursor = %start, "Resuming from cursor");

        loop {
            let outcome = tokio::select! {
                _ = ctx.cancelled() => break,
                outcome = self.poll_once(&mut cursor) => outcome,
            };

            if let Some(delay) = self.delay_after(&outcome) {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!(
            cursor = %cursor.last_forwarded,
            events_forwarded = cursor.events_forwarded,
            "API poller stopped gracefully"
        );
    }

    /// Reads the persisted cursor, retrying until it succeeds or the loop is cancelled.
    async fn load_cursor(&self, ctx: &CancellationToken) -> Option<EventId> {
        loop {
            let result = tokio::select! {
                _ = ctx.cancelled() => return None,
                result = self.cursor_store.last_event_id() => result,
            };

            match result {
                Ok(event_id) => return Some(event_id),
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_secs = self.config.error_retry_interval.as_secs(),
                        "Failed to read cursor, retrying"
                    );
                    tokio::select! {
                        _ = ctx.cancelled() => return None,
                        _ = tokio::time::sleep(self.config.error_retry_interval) => {}
                    }
                }
            }
        }
    }

    fn delay_after(&self, outcome: &PollOutcome) -> Option<Duration> {
        match outcome {
            PollOutcome::Forwarded { advanced: true, .. } => None,
            PollOutcome::Forwarded { advanced: false, .. } | PollOutcome::Empty => {
                Some(self.config.poll_interval)
            }
            PollOutcome::FetchFailed(_)
            | PollOutcome::ForwardFailed { .. }
            | PollOutcome::CursorPersistFailed(_) => Some(self.config.error_retry_interval),
        }
    }

    /// Runs a single poll iteration against the given cursor.
    ///
    /// The cursor is only modified once every event has been sent and the
    /// new position has been persisted.
    pub async fn poll_once(&self, cursor: &mut PollCursor) -> PollOutcome {
        self.metrics.record_poll();
        let after = cursor.last_forwarded;

        let page = match self.source.fetch(after, self.config.batch_size).await {
            Ok(page) => page,
            Err(e) => {
                self.metrics.record_fetch_error();
                warn!(
                    cursor = %after,
                    error = %e,
                    retry_in_secs = self.config.error_retry_interval.as_secs(),
                    "Failed to fetch scan events"
                );
                return PollOutcome::FetchFailed(e.to_string());
            }
        };

        if page.is_empty() {
            debug!(cursor = %after, "No new scan events");
            return PollOutcome::Empty;
        }

        self.metrics.record_fetched(page.len());
        debug!(cursor = %after, count = page.len(), "Fetched scan events");

        let prepared = self.prepare_page(page, cursor);

        for (sent, event) in prepared.events.iter().enumerate() {
            if let Err(e) = self.queue.send(event).await {
                self.metrics.record_forward_error();
                warn!(
                    event_id = %event.event_id,
                    sent,
                    error = %e,
                    "Failed to forward scan event, cursor not advanced"
                );
                return PollOutcome::ForwardFailed {
                    sent,
                    error: e.to_string(),
                };
            }
            self.metrics.record_forwarded();
        }

        let next = cursor.next_position(prepared.page_max);
        let advanced = next > cursor.last_forwarded;

        if advanced {
            if let Err(e) = self.cursor_store.set_last_event_id(next).await {
                self.metrics.record_cursor_error();
                warn!(
                    cursor = %next,
                    error = %e,
                    "Failed to persist cursor, page will be forwarded again"
                );
                return PollOutcome::CursorPersistFailed(e.to_string());
            }
            self.metrics.record_cursor_advance(next.value());
        }

        cursor.advance(prepared.page_max, prepared.events.len());

        if advanced {
            info!(
                count = prepared.events.len(),
                cursor = %cursor.last_forwarded,
                "Forwarded scan events"
            );
        } else {
            debug!(
                count = prepared.events.len(),
                cursor = %cursor.last_forwarded,
                "Page did not move the cursor"
            );
        }

        PollOutcome::Forwarded {
            forwarded: prepared.events.len(),
            stale: prepared.stale,
            cursor: cursor.last_forwarded,
            advanced,
        }
    }

    fn prepare_page(&self, mut page: Vec<ScanEvent>, cursor: &PollCursor) -> PreparedPage {
        if !page.is_sorted_by_key(|e| e.event_id) {
            warn!(count = page.len(), "Scan event page out of order, sorting");
            page.sort_by_key(|e| e.event_id);
        }

        let page_max = page
            .last()
            .map_or(cursor.last_forwarded, |e| e.event_id);

        let stale = page
            .iter()
            .filter(|e| cursor.is_stale(e.event_id))
            .count();

        if stale > 0 {
            self.metrics.record_stale(stale);
            warn!(
                cursor = %cursor.last_forwarded,
                stale,
                forwarding = self.config.forward_stale_events,
                "Scan events at or below cursor"
            );
            if !self.config.forward_stale_events {
                page.retain(|e| !cursor.is_stale(e.event_id));
            }
        }

        PreparedPage {
            events: page,
            stale,
            page_max,
        }
    }
}
