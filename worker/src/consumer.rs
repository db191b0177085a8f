//! Queue consumer.
//!
//! Leases batches of scan events, applies each through the processor and
//! deletes only the messages that were applied successfully. Failed
//! messages stay leased until their visibility timeout expires and are
//! redelivered or dead-lettered by the queue.

use std::sync::Arc;
use std::time::Duration;

use scanrelay::queue::DEFAULT_MAX_RECEIVE_COUNT;
use scanrelay::{ApplyOutcome, MessageQueue, QueueError, ScanEvent};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::metrics::ConsumerMetrics;
use super::processor::ScanEventProcessor;

/// Consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Maximum messages leased per receive.
    pub lease_batch_size: usize,

    /// Receives before the queue dead-letters a message.
    pub max_receive_count: u32,

    /// Wait after a failed receive.
    pub receive_error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            lease_batch_size: 10,
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
            receive_error_backoff: Duration::from_secs(1),
        }
    }
}

/// Result of one receive-and-apply pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// Messages leased.
    pub received: usize,
    /// Events that changed a summary.
    pub applied: usize,
    /// Events at or below the watermark.
    pub ignored: usize,
    /// Events left for redelivery.
    pub failed: usize,
    /// Successful events whose delete failed.
    pub delete_failed: usize,
}

/// Consumes scan events from the queue into the summary store.
pub struct EventConsumer {
    queue: Arc<dyn MessageQueue<ScanEvent>>,
    processor: ScanEventProcessor,
    config: ConsumerConfig,
    metrics: Arc<ConsumerMetrics>,
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventConsumer {
    /// Creates a new consumer.
    #[must_use]
    pub fn new(
        queue: Arc<dyn MessageQueue<ScanEvent>>,
        processor: ScanEventProcessor,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            config,
            metrics: Arc::new(ConsumerMetrics::new()),
        }
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs the consume loop until cancelled.
    pub async fn run(&self, ctx: CancellationToken) {
        info!(
            lease_batch_size = self.config.lease_batch_size,
            "Starting event consumer"
        );

        loop {
            let result = tokio::select! {
                _ = ctx.cancelled() => break,
                result = self.consume_once() => result,
            };

            if let Err(e) = result {
                self.metrics.record_receive_error();
                warn!(
                    error = %e,
                    retry_in_ms = self.config.receive_error_backoff.as_millis() as u64,
                    "Failed to receive scan events"
                );
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(self.config.receive_error_backoff) => {}
                }
            }
        }

        info!("Event consumer stopped gracefully");
    }

    /// Leases one batch and applies every message in it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the receive itself fails. Per-message
    /// failures are counted in the outcome.
    pub async fn consume_once(&self) -> Result<ConsumeOutcome, QueueError> {
        let messages = self.queue.receive(self.config.lease_batch_size).await?;

        let mut outcome = ConsumeOutcome {
            received: messages.len(),
            ..ConsumeOutcome::default()
        };

        if messages.is_empty() {
            debug!("No scan events leased");
            return Ok(outcome);
        }

        self.metrics.record_received(messages.len());
        debug!(count = messages.len(), "Leased scan events");

        for message in messages {
            let event = &message.payload;

            match self.processor.process_single(event).await {
                Ok(applied) => {
                    match applied {
                        ApplyOutcome::Applied => {
                            outcome.applied += 1;
                            self.metrics.record_applied();
                        }
                        ApplyOutcome::Ignored => {
                            outcome.ignored += 1;
                            self.metrics.record_ignored();
                        }
                    }

                    if let Err(e) = self.queue.delete(&message.handle).await {
                        outcome.delete_failed += 1;
                        self.metrics.record_delete_error();
                        warn!(
                            event_id = %event.event_id,
                            error = %e,
                            "Failed to delete scan event, it will be redelivered"
                        );
                    }
                }
                Err(e) => {
                    outcome.failed += 1;
                    self.metrics.record_failure();

                    if message.receive_count >= self.config.max_receive_count {
                        error!(
                            event_id = %event.event_id,
                            entity_id = %event.entity_id,
                            receive_count = message.receive_count,
                            error = %e,
                            "Failed to apply scan event, it will be dead-lettered"
                        );
                    } else {
                        warn!(
                            event_id = %event.event_id,
                            entity_id = %event.entity_id,
                            receive_count = message.receive_count,
                            error = %e,
                            "Failed to apply scan event, it will be redelivered"
                        );
                    }
                }
            }
        }

        info!(
            received = outcome.received,
            applied = outcome.applied,
            ignored = outcome.ignored,
            failed = outcome.failed,
            "Processed scan event batch"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use scanrelay::{
        EntityId, EventId, InMemoryQueue, InMemorySummaryStore, Leased, QueueConfig,
        ReceiptHandle, ScanType, SummaryStore,
    };
    use tokio::sync::Mutex;

    use super::*;
    use crate::processor::tests::{at, event, FailingStore};

    fn queue(visibility_timeout: Duration) -> Arc<InMemoryQueue<ScanEvent>> {
        Arc::new(InMemoryQueue::new(
            QueueConfig::new("test")
                .with_visibility_timeout(visibility_timeout)
                .with_max_receive_count(3)
                .with_receive_wait(Duration::ZERO),
        ))
    }

    /// Queue wrapper whose deletes always fail.
    struct NoDeleteQueue {
        inner: Arc<InMemoryQueue<ScanEvent>>,
        delete_attempts: Mutex<usize>,
    }

    #[async_trait]
    impl MessageQueue<ScanEvent> for NoDeleteQueue {
        async fn send(&self, payload: &ScanEvent) -> Result<(), QueueError> {
            self.inner.send(payload).await
        }

        async fn receive(&self, max: usize) -> Result<Vec<Leased<ScanEvent>>, QueueError> {
            self.inner.receive(max).await
        }

        async fn delete(&self, _handle: &ReceiptHandle) -> Result<(), QueueError> {
            *self.delete_attempts.lock().await += 1;
            Err(QueueError::Transport("connection closed".to_string()))
        }
    }

    /// Queue whose receive always fails.
    struct BrokenQueue;

    #[async_trait]
    impl MessageQueue<ScanEvent> for BrokenQueue {
        async fn send(&self, _payload: &ScanEvent) -> Result<(), QueueError> {
            Ok(())
        }

        async fn receive(&self, _max: usize) -> Result<Vec<Leased<ScanEvent>>, QueueError> {
            Err(QueueError::Transport("connection refused".to_string()))
        }

        async fn delete(&self, _handle: &ReceiptHandle) -> Result<(), QueueError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_consume_applies_and_deletes() {
        let queue = queue(Duration::from_secs(30));
        let store = Arc::new(InMemorySummaryStore::new());
        let consumer = EventConsumer::new(
            queue.clone(),
            ScanEventProcessor::new(store.clone()),
            ConsumerConfig::default(),
        );

        queue.send(&event(5, 1, ScanType::Pickup)).await.expect("send");
        queue.send(&event(10, 1, ScanType::Delivery)).await.expect("send");

        let outcome = consumer.consume_once().await.expect("consume");

        assert_eq!(outcome.received, 2);
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.failed, 0);
        assert!(queue.is_empty().await);

        let summary = store.get(EntityId(1)).await.expect("get").expect("summary");
        assert_eq!(summary.latest_event_id, EventId(10));
        assert_eq!(summary.latest_type, Some(ScanType::Delivery));
        assert!(summary.is_picked_up());
        assert!(summary.is_delivered());
    }

    #[tokio::test]
    async fn test_consume_failure_is_not_deleted_and_does_not_block_batch() {
        let queue = queue(Duration::from_secs(30));
        let store = Arc::new(FailingStore::new(vec![EventId(6)]));
        let consumer = EventConsumer::new(
            queue.clone(),
            ScanEventProcessor::new(store.clone()),
            ConsumerConfig::default(),
        );

        queue.send(&event(5, 1, ScanType::Pickup)).await.expect("send");
        queue.send(&event(6, 2, ScanType::Pickup)).await.expect("send");
        queue.send(&event(7, 3, ScanType::Pickup)).await.expect("send");

        let outcome = consumer.consume_once().await.expect("consume");

        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.failed, 1);
        // Only the failed message remains, still leased.
        assert_eq!(queue.len().await, 1);
        assert!(store.get(EntityId(3)).await.expect("get").is_some());
        assert_eq!(consumer.metrics().failed(), 1);
    }

    #[tokio::test]
    async fn test_consume_duplicate_is_deleted() {
        let queue = queue(Duration::from_secs(30));
        let store = Arc::new(InMemorySummaryStore::new());
        let consumer = EventConsumer::new(
            queue.clone(),
            ScanEventProcessor::new(store.clone()),
            ConsumerConfig::default(),
        );

        let e = event(5, 1, ScanType::Status);
        queue.send(&e).await.expect("send");
        queue.send(&e).await.expect("send");

        let outcome = consumer.consume_once().await.expect("consume");

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.ignored, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_consume_out_of_order_keeps_latest_and_write_once() {
        let queue = queue(Duration::from_secs(30));
        let store = Arc::new(InMemorySummaryStore::new());
        let consumer = EventConsumer::new(
            queue.clone(),
            ScanEventProcessor::new(store.clone()),
            ConsumerConfig::default(),
        );

        let delivery = ScanEvent::new(
            EventId(5),
            EntityId(1),
            ScanType::Delivery,
            at("2025-06-01T12:00:00Z"),
        );
        let pickup = ScanEvent::new(
            EventId(3),
            EntityId(1),
            ScanType::Pickup,
            at("2025-06-01T08:00:00Z"),
        );
        queue.send(&delivery).await.expect("send");
        queue.send(&pickup).await.expect("send");

        consumer.consume_once().await.expect("consume");

        let summary = store.get(EntityId(1)).await.expect("get").expect("summary");
        assert_eq!(summary.latest_event_id, EventId(5));
        assert_eq!(summary.first_delivery_at.get(), Some(&delivery.occurred_at));
        assert!(!summary.first_pickup_at.is_set());
    }

    #[tokio::test]
    async fn test_consume_persistent_failure_is_dead_lettered() {
        let queue = queue(Duration::ZERO);
        let consumer = EventConsumer::new(
            queue.clone(),
            ScanEventProcessor::new(Arc::new(FailingStore::new(vec![EventId(5)]))),
            ConsumerConfig::default(),
        );

        queue.send(&event(5, 1, ScanType::Pickup)).await.expect("send");

        for _ in 0..3 {
            let outcome = consumer.consume_once().await.expect("consume");
            assert_eq!(outcome.failed, 1);
        }

        let outcome = consumer.consume_once().await.expect("consume");
        assert_eq!(outcome.received, 0);
        assert_eq!(queue.dead_letter_len().await, 1);
        assert_eq!(consumer.metrics().failed(), 3);
    }

    #[tokio::test]
    async fn test_consume_delete_failure_is_reported() {
        let inner = queue(Duration::from_secs(30));
        let wrapped = Arc::new(NoDeleteQueue {
            inner: inner.clone(),
            delete_attempts: Mutex::new(0),
        });
        let store = Arc::new(InMemorySummaryStore::new());
        let consumer = EventConsumer::new(
            wrapped.clone(),
            ScanEventProcessor::new(store.clone()),
            ConsumerConfig::default(),
        );

        inner.send(&event(5, 1, ScanType::Pickup)).await.expect("send");

        let outcome = consumer.consume_once().await.expect("consume");

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.delete_failed, 1);
        assert_eq!(*wrapped.delete_attempts.lock().await, 1);
        assert_eq!(inner.len().await, 1);
        assert!(store.get(EntityId(1)).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_consume_receive_error() {
        let consumer = EventConsumer::new(
            Arc::new(BrokenQueue),
            ScanEventProcessor::new(Arc::new(InMemorySummaryStore::new())),
            ConsumerConfig::default(),
        );

        assert!(consumer.consume_once().await.is_err());
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_cancelled() {
        let queue = queue(Duration::from_secs(30));
        let store = Arc::new(InMemorySummaryStore::new());
        let consumer = Arc::new(EventConsumer::new(
            queue.clone(),
            ScanEventProcessor::new(store.clone()),
            ConsumerConfig::default(),
        ));

        for id in 1..=5 {
            queue.send(&event(id, id, ScanType::Pickup)).await.expect("send");
        }

        let ctx = CancellationToken::new();
        let handle = {
            let consumer = Arc::clone(&consumer);
            let ctx = ctx.clone();
            tokio::spawn(async move { consumer.run(ctx).await })
        };

        for _ in 0..100 {
            if queue.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        ctx.cancel();
        handle.await.expect("join");

        assert!(queue.is_empty().await);
        assert_eq!(store.len().await, 5);
    }
}
