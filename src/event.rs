//! Event wire shapes and shared identity helpers.
//!
//! This module provides the foundational data types the event store,
//! subscriptions, and the replay runner all depend on. No I/O occurs here.

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventStoreError;

/// Fixed namespace UUID for deterministic stream ID derivation.
///
/// All stream IDs are UUID v5 values derived from this namespace and the
/// `"{owner_type}/{instance_id}"` string. This ensures the same aggregate
/// identity always maps to the same stream UUID, regardless of which
/// process performs the mapping.
const STREAM_NAMESPACE: Uuid = Uuid::from_bytes([
    0x9a, 0x1e, 0x7c, 0x3b, 0x4d, 0x2f, 0x4a, 0x8e, 0xb5, 0x6c, 0x1f, 0x3d, 0x7e, 0x9a, 0x0b, 0xc4,
]);

/// Derive a deterministic stream UUID from an owner type and instance ID.
///
/// Uses UUID v5 (SHA-1 based) with [`STREAM_NAMESPACE`] to produce a stable,
/// collision-resistant stream identifier.
///
/// # Examples
///
/// ```
/// use grainstore::stream_uuid;
/// let id = stream_uuid("app", "a-1");
/// assert_eq!(id, stream_uuid("app", "a-1")); // deterministic
/// ```
pub fn stream_uuid(owner_type: &str, instance_id: &str) -> Uuid {
    let name = format!("{owner_type}/{instance_id}");
    Uuid::new_v5(&STREAM_NAMESPACE, name.as_bytes())
}

/// A proposed event, not yet recorded in the log.
///
/// The `event_type` is the logical type name used for subscription filter
/// matching and variant dispatch. Domain events serialized with the
/// adjacently-tagged convention (`{"type": ..., "data": ...}`) map their
/// `"type"` tag here and their `"data"` portion to `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Logical event type name (e.g. `"AppCreated"`).
    pub event_type: String,
    /// Opaque serialized payload; `null` for fieldless events.
    pub payload: serde_json::Value,
}

impl EventData {
    /// Build an event from a type name and JSON payload.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// An event as recorded in the log and delivered to subscribers.
///
/// `stream_version` is zero-based, strictly increasing, and gapless within
/// its stream. `global_position` is zero-based and strictly increasing
/// across the whole log; positions are never reassigned, so replay in
/// global order is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Stream the event belongs to (one stream per aggregate identity).
    pub stream_id: String,
    /// Zero-based version within the stream.
    pub stream_version: u64,
    /// Zero-based position in the global log.
    pub global_position: u64,
    /// Logical event type name.
    pub event_type: String,
    /// Opaque serialized payload.
    pub payload: serde_json::Value,
}

/// A compiled pattern over logical event type names.
///
/// Subscriptions match each stored event's `event_type` against this
/// filter. The pattern is an unanchored regex; `".*"` matches everything.
#[derive(Debug, Clone)]
pub struct TypeFilter {
    pattern: Regex,
}

impl TypeFilter {
    /// Compile a filter from a regex pattern.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Filter`] if the pattern is not a valid
    /// regex.
    pub fn new(pattern: &str) -> Result<Self, EventStoreError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// The catch-all filter (`".*"`), used by the replay runner.
    pub fn match_all() -> Self {
        Self {
            pattern: Regex::new(".*").expect("'.*' is a valid regex"),
        }
    }

    /// Whether the given event type name matches this filter.
    pub fn matches(&self, event_type: &str) -> bool {
        self.pattern.is_match(event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_uuid_is_deterministic() {
        let a = stream_uuid("app", "a-1");
        let b = stream_uuid("app", "a-1");
        assert_eq!(a, b, "same inputs must produce the same UUID");
    }

    #[test]
    fn stream_uuid_differs_by_instance_id() {
        let a = stream_uuid("app", "a-1");
        let b = stream_uuid("app", "a-2");
        assert_ne!(a, b, "different instance IDs must produce different UUIDs");
    }

    #[test]
    fn stream_uuid_differs_by_owner_type() {
        let a = stream_uuid("app", "a-1");
        let b = stream_uuid("schema", "a-1");
        assert_ne!(a, b, "different owner types must produce different UUIDs");
    }

    #[test]
    fn match_all_matches_anything() {
        let filter = TypeFilter::match_all();
        assert!(filter.matches("AppCreated"));
        assert!(filter.matches(""));
        assert!(filter.matches("weird/type.name"));
    }

    #[test]
    fn filter_matches_by_pattern() {
        let filter = TypeFilter::new("^App").expect("valid pattern");
        assert!(filter.matches("AppCreated"));
        assert!(filter.matches("AppDeleted"));
        assert!(!filter.matches("SchemaCreated"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = TypeFilter::new("([unclosed").expect_err("pattern should not compile");
        assert!(matches!(err, EventStoreError::Filter(_)));
    }

    #[test]
    fn event_data_serde_roundtrip() {
        let event = EventData::new("AppCreated", serde_json::json!({"name": "blog"}));
        let json = serde_json::to_string(&event).expect("serialize should succeed");
        let back: EventData = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(back, event);
    }
}
