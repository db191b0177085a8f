//! Scanrelay - scan event model and pipeline boundaries.
//!
//! This crate holds everything the relay loops depend on: the scan event
//! model with its idempotent summary merge, and the three boundaries the
//! pipeline talks to, each with an in-process and a production adapter.
//!
//! # Components
//!
//! - [`events`]: ScanEvent, EntitySummary merge, PollCursor
//! - [`source`]: EventSource trait and the scan event HTTP client
//! - [`queue`]: MessageQueue trait, in-memory and Redis lease queues
//! - [`store`]: CursorStore and SummaryStore traits, in-memory and Postgres stores

pub mod events;
pub mod queue;
pub mod source;
pub mod store;

pub use events::{
    ApplyOutcome, EntityId, EntitySummary, EventId, PollCursor, ScanEvent, ScanType, WriteOnce,
    INITIAL_CURSOR,
};
pub use queue::{InMemoryQueue, Leased, MessageQueue, QueueConfig, QueueError, ReceiptHandle, RedisQueue};
pub use source::{EventSource, ScanEventClient, SourceConfig, SourceError};
pub use store::{
    CursorStore, InMemoryCursorStore, InMemorySummaryStore, PgStore, StoreError, SummaryStore,
};
