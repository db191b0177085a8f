//! Relay service.
//!
//! Wires the poller and the consumer to their adapters and runs both loops
//! until the shared cancellation token fires.

use std::sync::Arc;

use scanrelay::{
    PgStore, QueueError, RedisQueue, ScanEvent, ScanEventClient, SourceError, StoreError,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::config::{ConfigError, RelayConfig};
use super::consumer::EventConsumer;
use super::poller::ApiPoller;
use super::processor::ScanEventProcessor;

/// Startup errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Store connection or schema bootstrap failed.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// Queue connection failed.
    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    /// Scan API client could not be built.
    #[error("scan source: {0}")]
    Source(#[from] SourceError),
}

/// The relay service: one poller and one consumer.
#[derive(Debug)]
pub struct RelayService {
    poller: Arc<ApiPoller>,
    consumer: Arc<EventConsumer>,
}

impl RelayService {
    /// Creates a service from already-built loops.
    #[must_use]
    pub fn new(poller: ApiPoller, consumer: EventConsumer) -> Self {
        Self {
            poller: Arc::new(poller),
            consumer: Arc::new(consumer),
        }
    }

    /// Connects the production adapters described by the configuration.
    ///
    /// Creates the database tables if they are missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or any adapter
    /// cannot be initialised.
    pub async fn connect(config: &RelayConfig) -> Result<Self, ServiceError> {
        config.validate()?;

        let store = Arc::new(PgStore::connect(&config.database_url).await?);
        store.ensure_schema().await?;

        let queue: Arc<RedisQueue<ScanEvent>> =
            Arc::new(RedisQueue::connect(&config.redis_url, config.queue_config()).await?);

        let source = Arc::new(ScanEventClient::new(config.source_config())?);

        info!(
            base_url = %config.scan_api_base_url,
            queue = %config.queue_name,
            "Relay adapters initialized"
        );

        let poller = ApiPoller::new(source, store.clone(), queue.clone(), config.poller_config());
        let consumer = EventConsumer::new(
            queue,
            ScanEventProcessor::new(store),
            config.consumer_config(),
        );

        Ok(Self::new(poller, consumer))
    }

    /// Returns the poller.
    #[must_use]
    pub fn poller(&self) -> Arc<ApiPoller> {
        Arc::clone(&self.poller)
    }

    /// Returns the consumer.
    #[must_use]
    pub fn consumer(&self) -> Arc<EventConsumer> {
        Arc::clone(&self.consumer)
    }

    /// Runs both loops until the token is cancelled.
    pub async fn run(&self, ctx: CancellationToken) {
        info!("Starting relay service");

        tokio::join!(self.poller.run(ctx.clone()), self.consumer.run(ctx.clone()));

        let poller = self.poller.metrics().snapshot();
        let consumer = self.consumer.metrics().snapshot();
        info!(
            forwarded = poller.events_forwarded,
            cursor = poller.last_cursor,
            applied = consumer.applied,
            failed = consumer.failed,
            "Relay service stopped"
        );
    }
}
