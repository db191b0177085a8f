//! Event source boundary.
//!
//! The poller only ever talks to an [`EventSource`]. [`ScanEventClient`]
//! is the HTTP implementation against the scan event API.
//!
//! # Example
//!
//! ```rust,ignore
//! use scanrelay::events::EventId;
//! use scanrelay::source::{EventSource, ScanEventClient, SourceConfig};
//!
//! let client = ScanEventClient::new(SourceConfig::new("http://localhost:5000"))?;
//! let page = client.fetch(EventId(1), 100).await?;
//! ```

pub mod config;
pub mod error;
pub mod http;

use async_trait::async_trait;

use crate::events::{EventId, ScanEvent};

pub use config::SourceConfig;
pub use error::SourceError;
pub use http::{map_to_domain, parse_page, ScanEventClient, ScanEventDto, UserDto};

/// A source of scan events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetches up to `limit` well-formed events with ids greater than `after`.
    ///
    /// Malformed records are dropped before they reach the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be fetched or parsed.
    async fn fetch(&self, after: EventId, limit: usize) -> Result<Vec<ScanEvent>, SourceError>;
}
