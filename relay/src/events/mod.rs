//! Scan event domain model.
//!
//! # Components
//!
//! - [`types`]: ScanEvent, EventId, EntityId, ScanType
//! - [`summary`]: EntitySummary and the idempotent merge rule
//! - [`cursor`]: PollCursor for tracking forwarding progress

pub mod cursor;
pub mod summary;
pub mod types;

pub use cursor::{PollCursor, INITIAL_CURSOR};
pub use summary::{ApplyOutcome, EntitySummary, WriteOnce};
pub use types::{EntityId, EventId, ScanEvent, ScanType};
