//! Relay worker metrics.
//!
//! Atomic counters for the poller and consumer loops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for the API poller.
#[derive(Debug)]
pub struct PollerMetrics {
    /// Poll iterations started.
    polls: AtomicU64,

    /// Events returned by the source.
    events_fetched: AtomicU64,

    /// Events sent to the queue.
    events_forwarded: AtomicU64,

    /// Events at or below the cursor.
    stale_events: AtomicU64,

    /// Failed fetches.
    fetch_errors: AtomicU64,

    /// Failed sends.
    forward_errors: AtomicU64,

    /// Failed cursor writes.
    cursor_errors: AtomicU64,

    /// Persisted cursor moves.
    cursor_advances: AtomicU64,

    /// Last persisted cursor.
    last_cursor: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for PollerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PollerMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            polls: AtomicU64::new(0),
            events_fetched: AtomicU64::new(0),
            events_forwarded: AtomicU64::new(0),
            stale_events: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            forward_errors: AtomicU64::new(0),
            cursor_errors: AtomicU64::new(0),
            cursor_advances: AtomicU64::new(0),
            last_cursor: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a poll iteration.
    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a fetched page.
    pub fn record_fetched(&self, count: usize) {
        self.events_fetched
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a forwarded event.
    pub fn record_forwarded(&self) {
        self.events_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records stale events seen in a page.
    pub fn record_stale(&self, count: usize) {
        self.stale_events.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a failed fetch.
    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed send.
    pub fn record_forward_error(&self) {
        self.forward_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed cursor write.
    pub fn record_cursor_error(&self) {
        self.cursor_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a persisted cursor move.
    pub fn record_cursor_advance(&self, event_id: i64) {
        self.cursor_advances.fetch_add(1, Ordering::Relaxed);
        self.last_cursor
            .store(u64::try_from(event_id).unwrap_or(0), Ordering::Relaxed);
    }

    /// Returns poll iterations.
    #[must_use]
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Returns events fetched.
    #[must_use]
    pub fn events_fetched(&self) -> u64 {
        self.events_fetched.load(Ordering::Relaxed)
    }

    /// Returns events forwarded.
    #[must_use]
    pub fn events_forwarded(&self) -> u64 {
        self.events_forwarded.load(Ordering::Relaxed)
    }

    /// Returns stale events.
    #[must_use]
    pub fn stale_events(&self) -> u64 {
        self.stale_events.load(Ordering::Relaxed)
    }

    /// Returns failed fetches.
    #[must_use]
    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }

    /// Returns failed sends.
    #[must_use]
    pub fn forward_errors(&self) -> u64 {
        self.forward_errors.load(Ordering::Relaxed)
    }

    /// Returns failed cursor writes.
    #[must_use]
    pub fn cursor_errors(&self) -> u64 {
        self.cursor_errors.load(Ordering::Relaxed)
    }

    /// Returns persisted cursor moves.
    #[must_use]
    pub fn cursor_advances(&self) -> u64 {
        self.cursor_advances.load(Ordering::Relaxed)
    }

    /// Returns the last persisted cursor.
    #[must_use]
    pub fn last_cursor(&self) -> u64 {
        self.last_cursor.load(Ordering::Relaxed)
    }

    /// Returns the uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> PollerMetricsSnapshot {
        PollerMetricsSnapshot {
            polls: self.polls(),
            events_fetched: self.events_fetched(),
            events_forwarded: self.events_forwarded(),
            stale_events: self.stale_events(),
            fetch_errors: self.fetch_errors(),
            forward_errors: self.forward_errors(),
            cursor_errors: self.cursor_errors(),
            cursor_advances: self.cursor_advances(),
            last_cursor: self.last_cursor(),
            uptime: self.uptime(),
        }
    }
}

/// A point-in-time snapshot of poller metrics.
#[derive(Debug, Clone)]
pub struct PollerMetricsSnapshot {
    /// Poll iterations.
    pub polls: u64,
    /// Events fetched.
    pub events_fetched: u64,
    /// Events forwarded.
    pub events_forwarded: u64,
    /// Stale events.
    pub stale_events: u64,
    /// Failed fetches.
    pub fetch_errors: u64,
    /// Failed sends.
    pub forward_errors: u64,
    /// Failed cursor writes.
    pub cursor_errors: u64,
    /// Persisted cursor moves.
    pub cursor_advances: u64,
    /// Last persisted cursor.
    pub last_cursor: u64,
    /// Uptime.
    pub uptime: Duration,
}

/// Metrics for the queue consumer.
#[derive(Debug)]
pub struct ConsumerMetrics {
    /// Messages received.
    received: AtomicU64,

    /// Events that changed a summary.
    applied: AtomicU64,

    /// Events at or below the watermark.
    ignored: AtomicU64,

    /// Events whose processing failed.
    failed: AtomicU64,

    /// Failed acknowledgments.
    delete_errors: AtomicU64,

    /// Failed receives.
    receive_errors: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            delete_errors: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records received messages.
    pub fn record_received(&self, count: usize) {
        self.received.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records an applied event.
    pub fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an ignored event.
    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a processing failure.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed acknowledgment.
    pub fn record_delete_error(&self) {
        self.delete_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed receive.
    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns messages received.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Returns applied events.
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Returns ignored events.
    #[must_use]
    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    /// Returns processing failures.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Returns failed acknowledgments.
    #[must_use]
    pub fn delete_errors(&self) -> u64 {
        self.delete_errors.load(Ordering::Relaxed)
    }

    /// Returns failed receives.
    #[must_use]
    pub fn receive_errors(&self) -> u64 {
        self.receive_errors.load(Ordering::Relaxed)
    }

    /// Returns the uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the fraction of processed events that succeeded (0.0 to 1.0).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let succeeded = self.applied() + self.ignored();
        let total = succeeded + self.failed();
        if total > 0 {
            succeeded as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> ConsumerMetricsSnapshot {
        ConsumerMetricsSnapshot {
            received: self.received(),
            applied: self.applied(),
            ignored: self.ignored(),
            failed: self.failed(),
            delete_errors: self.delete_errors(),
            receive_errors: self.receive_errors(),
            uptime: self.uptime(),
            success_rate: self.success_rate(),
        }
    }
}

/// A point-in-time snapshot of consumer metrics.
#[derive(Debug, Clone)]
pub struct ConsumerMetricsSnapshot {
    /// Messages received.
    pub received: u64,
    /// Applied events.
    pub applied: u64,
    /// Ignored events.
    pub ignored: u64,
    /// Processing failures.
    pub failed: u64,
    /// Failed acknowledgments.
    pub delete_errors: u64,
    /// Failed receives.
    pub receive_errors: u64,
    /// Uptime.
    pub uptime: Duration,
    /// Success rate.
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_metrics_new() {
        let metrics = PollerMetrics::new();
        assert_eq!(metrics.polls(), 0);
        assert_eq!(metrics.events_forwarded(), 0);
    }

    #[test]
    fn test_poller_metrics_record() {
        let metrics = PollerMetrics::default();

        metrics.record_poll();
        metrics.record_fetched(3);
        metrics.record_forwarded();
        metrics.record_forwarded();
        metrics.record_stale(1);
        metrics.record_fetch_error();
        metrics.record_forward_error();
        metrics.record_cursor_error();
        metrics.record_cursor_advance(42);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.polls, 1);
        assert_eq!(snapshot.events_fetched, 3);
        assert_eq!(snapshot.events_forwarded, 2);
        assert_eq!(snapshot.stale_events, 1);
        assert_eq!(snapshot.fetch_errors, 1);
        assert_eq!(snapshot.forward_errors, 1);
        assert_eq!(snapshot.cursor_errors, 1);
        assert_eq!(snapshot.cursor_advances, 1);
        assert_eq!(snapshot.last_cursor, 42);
    }

    #[test]
    fn test_consumer_metrics_record() {
        let metrics = ConsumerMetrics::new();

        metrics.record_received(4);
        metrics.record_applied();
        metrics.record_ignored();
        metrics.record_failure();
        metrics.record_delete_error();
        metrics.record_receive_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 4);
        assert_eq!(snapshot.applied, 1);
        assert_eq!(snapshot.ignored, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.delete_errors, 1);
        assert_eq!(snapshot.receive_errors, 1);
    }

    #[test]
    fn test_consumer_metrics_success_rate() {
        let metrics = ConsumerMetrics::new();

        // No events
        assert_eq!(metrics.success_rate(), 0.0);

        metrics.record_applied();
        metrics.record_ignored();
        metrics.record_failure();

        let rate = metrics.success_rate();
        assert!((rate - 0.666).abs() < 0.01);
    }
}
