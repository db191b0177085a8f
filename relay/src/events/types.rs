//! Types for scan events.
//!
//! Defines the event identifiers, the scan classification, and the
//! immutable [`ScanEvent`] record relayed from the source to the store.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Identifier assigned to a scan event by the source.
///
/// Strictly increasing and globally unique, so it doubles as the
/// ordering key for cursors and summary watermarks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

impl EventId {
    /// Unset watermark of a fresh summary.
    pub const ZERO: Self = Self(0);

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the aggregate a scan event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl EntityId {
    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a scan event.
///
/// Only pickups and deliveries drive the write-once timestamps of a
/// summary. Every other value is carried through as [`ScanType::Other`]
/// and is never rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScanType {
    /// Entity was picked up.
    Pickup,
    /// Entity was delivered.
    Delivery,
    /// Status update.
    Status,
    /// Any other classification.
    Other(String),
}

impl ScanType {
    /// Wire value for pickups.
    pub const PICKUP: &'static str = "PICKUP";
    /// Wire value for deliveries.
    pub const DELIVERY: &'static str = "DELIVERY";
    /// Wire value for status updates.
    pub const STATUS: &'static str = "STATUS";

    /// Parses a classification, normalising case and surrounding whitespace.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_uppercase();
        match normalized.as_str() {
            Self::PICKUP => Self::Pickup,
            Self::DELIVERY => Self::Delivery,
            Self::STATUS => Self::Status,
            _ => Self::Other(normalized),
        }
    }

    /// Returns the wire value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pickup => Self::PICKUP,
            Self::Delivery => Self::DELIVERY,
            Self::Status => Self::STATUS,
            Self::Other(value) => value,
        }
    }
}

impl From<String> for ScanType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ScanType> for String {
    fn from(value: ScanType) -> Self {
        match value {
            ScanType::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single scan event as produced by the source.
///
/// Serialized with camelCase field names when placed on the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    /// Source-assigned event id.
    pub event_id: EventId,
    /// Entity the event belongs to.
    pub entity_id: EntityId,
    /// Event classification.
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    /// When the scan happened, as reported by the source.
    pub occurred_at: DateTime<FixedOffset>,
    /// Free-form status code, possibly empty.
    #[serde(default)]
    pub status_code: String,
    /// Correlation id of the run that produced the scan, possibly empty.
    #[serde(default)]
    pub run_id: String,
}

impl ScanEvent {
    /// Creates an event with empty status code and run id.
    #[must_use]
    pub fn new(
        event_id: EventId,
        entity_id: EntityId,
        scan_type: ScanType,
        occurred_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            event_id,
            entity_id,
            scan_type,
            occurred_at,
            status_code: String::new(),
            run_id: String::new(),
        }
    }

    /// Sets the status code.
    #[must_use]
    pub fn with_status_code(mut self, status_code: impl Into<String>) -> Self {
        self.status_code = status_code.into();
        self
    }

    /// Sets the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(ts).expect("timestamp")
    }

    #[test]
    fn test_event_id_ordering() {
        assert!(EventId(5) < EventId(10));
        assert_eq!(EventId::default(), EventId::ZERO);
        assert_eq!(EventId(42).to_string(), "42");
    }

    #[test]
    fn test_scan_type_parse_known() {
        assert_eq!(ScanType::parse("PICKUP"), ScanType::Pickup);
        assert_eq!(ScanType::parse(" delivery "), ScanType::Delivery);
        assert_eq!(ScanType::parse("Status"), ScanType::Status);
    }

    #[test]
    fn test_scan_type_parse_other() {
        let scan_type = ScanType::parse("in_transit");
        assert_eq!(scan_type, ScanType::Other("IN_TRANSIT".to_string()));
        assert_eq!(scan_type.as_str(), "IN_TRANSIT");
    }

    #[test]
    fn test_scan_event_json_is_camel_case() {
        let event = ScanEvent::new(
            EventId(7),
            EntityId(3),
            ScanType::Pickup,
            at("2025-06-01T12:00:00+10:00"),
        )
        .with_status_code("OK")
        .with_run_id("run-1");

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["eventId"], 7);
        assert_eq!(json["entityId"], 3);
        assert_eq!(json["type"], "PICKUP");
        assert_eq!(json["statusCode"], "OK");
        assert_eq!(json["runId"], "run-1");

        let back: ScanEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, event);
        assert_eq!(back.occurred_at.offset().local_minus_utc(), 10 * 3600);
    }

    #[test]
    fn test_scan_event_unknown_type_survives_queue_encoding() {
        let json = r#"{"eventId":1,"entityId":2,"type":"CUSTOMS","occurredAt":"2025-06-01T00:00:00Z"}"#;
        let event: ScanEvent = serde_json::from_str(json).expect("deserialize");
        assert_eq!(event.scan_type, ScanType::Other("CUSTOMS".to_string()));
        assert!(event.status_code.is_empty());
        assert!(event.run_id.is_empty());
    }
}
