//! Poll cursor for tracking forwarding progress.
//!
//! Holds the in-memory high-water mark of events already forwarded to the
//! queue. The durable copy lives in a [`crate::store::CursorStore`].

use serde::{Deserialize, Serialize};

use super::types::EventId;

/// Cursor value used when nothing has been persisted yet.
pub const INITIAL_CURSOR: EventId = EventId(1);

/// Cursor for tracking forwarding progress.
///
/// The cursor only moves forward: advancing to an id at or below the
/// current position leaves it untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCursor {
    /// Last event id fully forwarded.
    pub last_forwarded: EventId,

    /// Number of events forwarded since this cursor was created.
    pub events_forwarded: u64,
}

impl Default for PollCursor {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR)
    }
}

impl PollCursor {
    /// Creates a cursor resuming after the given event id.
    #[must_use]
    pub const fn new(last_forwarded: EventId) -> Self {
        Self {
            last_forwarded,
            events_forwarded: 0,
        }
    }

    /// Returns true if the event id is at or below the cursor.
    #[must_use]
    pub fn is_stale(&self, event_id: EventId) -> bool {
        event_id <= self.last_forwarded
    }

    /// Returns the position the cursor would move to after a page ending at `page_max`.
    #[must_use]
    pub fn next_position(&self, page_max: EventId) -> EventId {
        self.last_forwarded.max(page_max)
    }

    /// Records a fully forwarded page.
    ///
    /// Returns true if the position moved.
    pub fn advance(&mut self, page_max: EventId, forwarded: usize) -> bool {
        self.events_forwarded = self.events_forwarded.saturating_add(forwarded as u64);
        let next = self.next_position(page_max);
        if next > self.last_forwarded {
            self.last_forwarded = next;
            return true;
        }
        false
    }
}
