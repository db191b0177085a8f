//! Message queue boundary.
//!
//! A queue hands out leased messages. A lease that is not acknowledged
//! with [`MessageQueue::delete`] before the visibility timeout expires
//! makes the message visible again; after `max_receive_count` receives
//! without a delete the message is routed to the dead-letter list.
//!
//! # Components
//!
//! - [`memory`]: in-process queue with the same lease semantics
//! - [`redis_queue`]: Redis-backed queue with atomic lease scripts

pub mod memory;
pub mod redis_queue;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::memory::InMemoryQueue;
pub use self::redis_queue::RedisQueue;

/// Default visibility timeout in seconds.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 30;

/// Default number of receives before a message is dead-lettered.
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 3;

/// Default long-poll wait in seconds.
pub const DEFAULT_RECEIVE_WAIT_SECS: u64 = 20;

/// Opaque acknowledgment handle of a leased message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message received from the queue and not yet acknowledged.
#[derive(Debug, Clone)]
pub struct Leased<T> {
    /// Message payload.
    pub payload: T,
    /// Handle used to delete the message.
    pub handle: ReceiptHandle,
    /// How many times the message has been received, this lease included.
    pub receive_count: u32,
}

/// Queue errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// Payload could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The queue backend failed.
    #[error("queue transport failed: {0}")]
    Transport(String),

    /// The receipt handle is not one this queue issued.
    #[error("invalid receipt handle: {0}")]
    InvalidHandle(String),
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, used as the key prefix.
    pub name: String,

    /// How long a lease hides a message from other receivers.
    pub visibility_timeout: Duration,

    /// Receives allowed before a message is dead-lettered.
    pub max_receive_count: u32,

    /// How long a receive waits for messages before returning empty.
    pub receive_wait: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "scan-events".to_string(),
            visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
            receive_wait: Duration::from_secs(DEFAULT_RECEIVE_WAIT_SECS),
        }
    }
}

impl QueueConfig {
    /// Creates a configuration for the named queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the visibility timeout.
    #[must_use]
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Sets the maximum receive count.
    #[must_use]
    pub fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = count;
        self
    }

    /// Sets the long-poll wait.
    #[must_use]
    pub fn with_receive_wait(mut self, wait: Duration) -> Self {
        self.receive_wait = wait;
        self
    }
}

/// A queue of payloads with lease-based delivery.
#[async_trait]
pub trait MessageQueue<T>: Send + Sync {
    /// Enqueues a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the backend fails.
    async fn send(&self, payload: &T) -> Result<(), QueueError>;

    /// Leases up to `max_messages` messages.
    ///
    /// May wait up to the configured receive wait before returning empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn receive(&self, max_messages: usize) -> Result<Vec<Leased<T>>, QueueError>;

    /// Acknowledges a leased message, removing it from redelivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is invalid or the backend fails.
    async fn delete(&self, handle: &ReceiptHandle) -> Result<(), QueueError>;
}

/// Parses the numeric message id behind a receipt handle.
pub(crate) fn parse_handle(handle: &ReceiptHandle) -> Result<u64, QueueError> {
    handle
        .0
        .parse()
        .map_err(|_| QueueError::InvalidHandle(handle.0.clone()))
}
