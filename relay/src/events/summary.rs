//! Per-entity summary and the idempotent merge rule.
//!
//! [`EntitySummary::apply_event`] is the single place where a scan event
//! changes a summary. Stores that cannot call it directly (the Postgres
//! store) express the same rule as one conditional upsert statement.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::types::{EntityId, EventId, ScanEvent, ScanType};

/// An optional value that can be set once and never overwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteOnce<T>(Option<T>);

impl<T> WriteOnce<T> {
    /// Creates an unset value.
    #[must_use]
    pub const fn unset() -> Self {
        Self(None)
    }

    /// Sets the value if it is still unset.
    ///
    /// Returns true if the value was written.
    pub fn set_if_unset(&mut self, value: T) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(value);
        true
    }

    /// Returns the value if set.
    #[must_use]
    pub const fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    /// Returns true if the value has been set.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl<T> From<Option<T>> for WriteOnce<T> {
    fn from(value: Option<T>) -> Self {
        Self(value)
    }
}

/// Result of applying one event to a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event advanced the watermark.
    Applied,
    /// The event was at or below the watermark and changed nothing.
    Ignored,
}

impl ApplyOutcome {
    /// Returns true if the event changed the summary.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Rollup of every scan event seen for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySummary {
    /// Entity key.
    pub entity_id: EntityId,
    /// Highest event id applied so far.
    pub latest_event_id: EventId,
    /// Classification of the latest event.
    pub latest_type: Option<ScanType>,
    /// Timestamp of the latest event.
    pub latest_occurred_at: Option<DateTime<FixedOffset>>,
    /// Status code of the latest event.
    pub latest_status_code: String,
    /// Run id of the latest event.
    pub latest_run_id: String,
    /// Timestamp of the first applied pickup.
    pub first_pickup_at: WriteOnce<DateTime<FixedOffset>>,
    /// Timestamp of the first applied delivery.
    pub first_delivery_at: WriteOnce<DateTime<FixedOffset>>,
}

impl EntitySummary {
    /// Creates an empty summary with an unset watermark.
    #[must_use]
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            latest_event_id: EventId::ZERO,
            latest_type: None,
            latest_occurred_at: None,
            latest_status_code: String::new(),
            latest_run_id: String::new(),
            first_pickup_at: WriteOnce::unset(),
            first_delivery_at: WriteOnce::unset(),
        }
    }

    /// Creates a summary from its first event.
    #[must_use]
    pub fn from_event(event: &ScanEvent) -> Self {
        let mut summary = Self::new(event.entity_id);
        summary.apply_event(event);
        summary
    }

    /// Applies a scan event.
    ///
    /// Events at or below the watermark are ignored, so duplicates and
    /// out-of-order redeliveries converge to the same state as applying
    /// each event once in ascending id order.
    pub fn apply_event(&mut self, event: &ScanEvent) -> ApplyOutcome {
        if event.event_id <= self.latest_event_id {
            return ApplyOutcome::Ignored;
        }

        self.latest_event_id = event.event_id;
        self.latest_type = Some(event.scan_type.clone());
        self.latest_occurred_at = Some(event.occurred_at);
        self.latest_status_code.clone_from(&event.status_code);
        self.latest_run_id.clone_from(&event.run_id);

        match event.scan_type {
            ScanType::Pickup => {
                self.first_pickup_at.set_if_unset(event.occurred_at);
            }
            ScanType::Delivery => {
                self.first_delivery_at.set_if_unset(event.occurred_at);
            }
            ScanType::Status | ScanType::Other(_) => {}
        }

        ApplyOutcome::Applied
    }

    /// Returns true if a pickup has been recorded.
    #[must_use]
    pub const fn is_picked_up(&self) -> bool {
        self.first_pickup_at.is_set()
    }

    /// Returns true if a delivery has been recorded.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        self.first_delivery_at.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(ts).expect("timestamp")
    }

    fn event(id: i64, scan_type: ScanType, ts: &str) -> ScanEvent {
        ScanEvent::new(EventId(id), EntityId(1), scan_type, at(ts))
    }

    fn apply_all(events: &[ScanEvent]) -> EntitySummary {
        let mut summary = EntitySummary::new(EntityId(1));
        for e in events {
            summary.apply_event(e);
        }
        summary
    }

    #[test]
    fn test_write_once() {
        let mut value = WriteOnce::unset();
        assert!(!value.is_set());
        assert!(value.set_if_unset(1));
        assert!(!value.set_if_unset(2));
        assert_eq!(value.get(), Some(&1));
    }

    #[test]
    fn test_summary_new() {
        let summary = EntitySummary::new(EntityId(9));
        assert_eq!(summary.latest_event_id, EventId::ZERO);
        assert!(summary.latest_type.is_none());
        assert!(!summary.is_picked_up());
        assert!(!summary.is_delivered());
    }

    #[test]
    fn test_apply_overwrites_latest_fields() {
        let mut summary = EntitySummary::new(EntityId(1));
        let e = event(3, ScanType::Status, "2025-06-01T10:00:00Z")
            .with_status_code("DELAYED")
            .with_run_id("run-7");

        assert_eq!(summary.apply_event(&e), ApplyOutcome::Applied);
        assert_eq!(summary.latest_event_id, EventId(3));
        assert_eq!(summary.latest_type, Some(ScanType::Status));
        assert_eq!(summary.latest_occurred_at, Some(e.occurred_at));
        assert_eq!(summary.latest_status_code, "DELAYED");
        assert_eq!(summary.latest_run_id, "run-7");
        assert!(!summary.is_picked_up());
        assert!(!summary.is_delivered());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let e = event(5, ScanType::Pickup, "2025-06-01T10:00:00Z");
        let mut summary = EntitySummary::from_event(&e);
        let before = summary.clone();

        assert_eq!(summary.apply_event(&e), ApplyOutcome::Ignored);
        assert_eq!(summary, before);

        let older = event(4, ScanType::Delivery, "2025-06-01T09:00:00Z");
        assert_eq!(summary.apply_event(&older), ApplyOutcome::Ignored);
        assert_eq!(summary, before);
    }

    #[test]
    fn test_first_pickup_is_write_once() {
        let first = event(1, ScanType::Pickup, "2025-06-01T10:00:00Z");
        let second = event(2, ScanType::Pickup, "2025-06-01T11:00:00Z");

        let summary = apply_all(&[first.clone(), second.clone()]);
        assert_eq!(summary.first_pickup_at.get(), Some(&first.occurred_at));
        assert_eq!(summary.latest_occurred_at, Some(second.occurred_at));
    }

    #[test]
    fn test_first_delivery_is_write_once() {
        let first = event(10, ScanType::Delivery, "2025-06-02T10:00:00Z");
        let second = event(11, ScanType::Delivery, "2025-06-02T12:00:00Z");

        let summary = apply_all(&[first.clone(), second]);
        assert_eq!(summary.first_delivery_at.get(), Some(&first.occurred_at));
    }

    #[test]
    fn test_unknown_type_only_updates_latest() {
        let pickup = event(1, ScanType::Pickup, "2025-06-01T10:00:00Z");
        let other = event(2, ScanType::parse("CUSTOMS"), "2025-06-01T11:00:00Z");

        let summary = apply_all(&[pickup.clone(), other]);
        assert_eq!(summary.latest_type, Some(ScanType::Other("CUSTOMS".to_string())));
        assert_eq!(summary.first_pickup_at.get(), Some(&pickup.occurred_at));
        assert!(!summary.is_delivered());
    }

    #[test]
    fn test_order_and_duplicates_converge() {
        let events = vec![
            event(1, ScanType::Pickup, "2025-06-01T08:00:00Z"),
            event(4, ScanType::Status, "2025-06-01T09:00:00Z"),
            event(7, ScanType::Delivery, "2025-06-01T10:00:00Z"),
        ];
        let in_order = apply_all(&events);

        let shuffled = vec![
            events[2].clone(),
            events[0].clone(),
            events[2].clone(),
            events[1].clone(),
            events[0].clone(),
        ];
        let out_of_order = apply_all(&shuffled);

        assert_eq!(in_order.latest_event_id, EventId(7));
        assert_eq!(out_of_order.latest_event_id, EventId(7));
        assert_eq!(in_order.latest_type, out_of_order.latest_type);
        assert_eq!(in_order.latest_occurred_at, out_of_order.latest_occurred_at);
    }

    #[test]
    fn test_late_pickup_after_delivery_is_ignored() {
        let delivery = event(5, ScanType::Delivery, "2025-06-01T10:00:00Z");
        let late_pickup = event(3, ScanType::Pickup, "2025-06-01T08:00:00Z");

        let mut summary = EntitySummary::from_event(&delivery);
        assert_eq!(summary.apply_event(&late_pickup), ApplyOutcome::Ignored);
        assert!(!summary.is_picked_up());
        assert_eq!(summary.first_delivery_at.get(), Some(&delivery.occurred_at));
        assert_eq!(summary.latest_event_id, EventId(5));
    }
}
