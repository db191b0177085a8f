//! Scanrelay worker - poller and consumer loops for the scan event relay.
//!
//! The poller walks the scan event API forward from a durable cursor and
//! forwards every event to a lease queue. The consumer drains the queue
//! into per-entity summaries through an idempotent merge, acknowledging
//! only what was applied.
//!
//! # Components
//!
//! - [`config`]: Worker configuration loaded from the environment
//! - [`poller`]: API poller (fetch, forward, advance)
//! - [`consumer`]: Queue consumer (receive, apply, acknowledge)
//! - [`processor`]: Scan event processor
//! - [`service`]: Adapter wiring and the combined run loop
//! - [`metrics`]: Poller and consumer metrics

pub mod config;
pub mod consumer;
pub mod metrics;
pub mod poller;
pub mod processor;
pub mod service;

pub use config::{ConfigError, RelayConfig};
pub use consumer::{ConsumeOutcome, ConsumerConfig, EventConsumer};
pub use metrics::{ConsumerMetrics, PollerMetrics};
pub use poller::{ApiPoller, PollOutcome, PollerConfig};
pub use processor::{BatchOutcome, ProcessError, ScanEventProcessor};
pub use service::{RelayService, ServiceError};
