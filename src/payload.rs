//! Wire-level event payloads for the core aggregate categories.
//!
//! Events are serialized adjacently tagged, `{"type": ..., "data": ...}`,
//! matching the shape [`EventData`] carries into the event store. Reading
//! a [`StoredEvent`] back reassembles that shape and decodes it; payloads
//! whose type is unknown to this version of the code decode to `None` and
//! are skipped by consumers rather than failing the whole stream.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{EventData, StoredEvent};

/// The aggregate category an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    App,
    Schema,
    Content,
    Asset,
}

impl Category {
    /// The owner type string used for snapshot storage and stream IDs.
    pub fn owner_type(self) -> &'static str {
        match self {
            Category::App => "app",
            Category::Schema => "schema",
            Category::Content => "content",
            Category::Asset => "asset",
        }
    }
}

/// Every event type the core aggregates emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CoreEvent {
    // App lifecycle.
    AppCreated {
        app_id: Uuid,
        name: String,
    },
    ContributorAdded {
        app_id: Uuid,
        contributor_id: String,
    },
    ClientAttached {
        app_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    // Schema definition.
    SchemaCreated {
        schema_id: Uuid,
        app_id: Uuid,
        name: String,
    },
    FieldAdded {
        schema_id: Uuid,
        field_id: u64,
        name: String,
        type_name: String,
    },
    SchemaPublished {
        schema_id: Uuid,
    },

    // Content items.
    ContentCreated {
        content_id: Uuid,
        schema_id: Uuid,
        data: serde_json::Value,
    },
    ContentUpdated {
        content_id: Uuid,
        data: serde_json::Value,
    },
    ContentDeleted {
        content_id: Uuid,
    },

    // Binary assets.
    AssetCreated {
        asset_id: Uuid,
        file_name: String,
        file_size: u64,
    },
    AssetRenamed {
        asset_id: Uuid,
        file_name: String,
    },
    AssetDeleted {
        asset_id: Uuid,
    },
}

impl CoreEvent {
    /// The aggregate category this event mutates.
    pub fn category(&self) -> Category {
        match self {
            CoreEvent::AppCreated { .. }
            | CoreEvent::ContributorAdded { .. }
            | CoreEvent::ClientAttached { .. } => Category::App,
            CoreEvent::SchemaCreated { .. }
            | CoreEvent::FieldAdded { .. }
            | CoreEvent::SchemaPublished { .. } => Category::Schema,
            CoreEvent::ContentCreated { .. }
            | CoreEvent::ContentUpdated { .. }
            | CoreEvent::ContentDeleted { .. } => Category::Content,
            CoreEvent::AssetCreated { .. }
            | CoreEvent::AssetRenamed { .. }
            | CoreEvent::AssetDeleted { .. } => Category::Asset,
        }
    }

    /// The identity of the aggregate this event targets.
    pub fn target_id(&self) -> Uuid {
        match self {
            CoreEvent::AppCreated { app_id, .. }
            | CoreEvent::ContributorAdded { app_id, .. }
            | CoreEvent::ClientAttached { app_id, .. } => *app_id,
            CoreEvent::SchemaCreated { schema_id, .. }
            | CoreEvent::FieldAdded { schema_id, .. }
            | CoreEvent::SchemaPublished { schema_id } => *schema_id,
            CoreEvent::ContentCreated { content_id, .. }
            | CoreEvent::ContentUpdated { content_id, .. }
            | CoreEvent::ContentDeleted { content_id } => *content_id,
            CoreEvent::AssetCreated { asset_id, .. }
            | CoreEvent::AssetRenamed { asset_id, .. }
            | CoreEvent::AssetDeleted { asset_id } => *asset_id,
        }
    }

    /// Decode a stored event back into a typed payload.
    ///
    /// Returns `None` when the event type is not one this version of the
    /// code knows, or when the payload does not match the expected shape.
    /// Unknown events are a normal condition during replay of old logs.
    pub fn from_stored(event: &StoredEvent) -> Option<CoreEvent> {
        let tagged = serde_json::json!({
            "type": event.event_type,
            "data": event.payload,
        });
        serde_json::from_value(tagged).ok()
    }

    /// Encode this payload for appending to the event store.
    ///
    /// # Errors
    ///
    /// Fails only if the payload cannot be represented as JSON, which the
    /// derive-based serialization here never produces in practice.
    pub fn to_event_data(&self) -> Result<EventData, serde_json::Error> {
        let tagged = serde_json::to_value(self)?;
        // Adjacently tagged: {"type": "...", "data": {...}}.
        let event_type = tagged["type"]
            .as_str()
            .unwrap_or_default()
            .to_owned();
        let payload = tagged.get("data").cloned().unwrap_or(serde_json::Value::Null);
        Ok(EventData::new(&event_type, payload))
    }
}
