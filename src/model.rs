//! Materialized states for the core aggregate categories and their pure
//! apply functions.
//!
//! Each state type implements [`DomainState`] and folds [`CoreEvent`]s
//! through a pure `apply(self, event) -> Self`: no I/O, no version
//! bookkeeping, events for other identities or categories pass through
//! unchanged. Schema states additionally take a [`FieldTypeResolver`] so
//! the mapping from field type names to concrete kinds can differ between
//! live operation and replay of old logs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::DomainState;
use crate::payload::CoreEvent;

/// Maps a persisted field type name to a concrete field kind.
///
/// Injected rather than hard-coded so replay can resolve type names that
/// have since been renamed or retired. Returning `None` skips the field.
pub trait FieldTypeResolver: Send + Sync + 'static {
    fn resolve(&self, type_name: &str) -> Option<FieldKind>;
}

/// The concrete kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    DateTime,
    Json,
    References,
}

/// Default resolver covering the built-in field type names.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFieldRegistry;

impl FieldTypeResolver for StaticFieldRegistry {
    fn resolve(&self, type_name: &str) -> Option<FieldKind> {
        match type_name {
            "String" => Some(FieldKind::String),
            "Number" => Some(FieldKind::Number),
            "Boolean" => Some(FieldKind::Boolean),
            "DateTime" => Some(FieldKind::DateTime),
            "Json" => Some(FieldKind::Json),
            "References" => Some(FieldKind::References),
            _ => None,
        }
    }
}

/// Materialized state of an app aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub name: String,
    pub contributors: Vec<String>,
    pub clients: Vec<String>,
}

impl DomainState for AppState {
    const OWNER_TYPE: &'static str = "app";
}

impl AppState {
    /// Fold one event into this state. Events for other apps or other
    /// categories leave the state unchanged.
    pub fn apply(mut self, event: &CoreEvent) -> Self {
        match event {
            CoreEvent::AppCreated { name, .. } => {
                self.name = name.clone();
            }
            CoreEvent::ContributorAdded { contributor_id, .. } => {
                if !self.contributors.contains(contributor_id) {
                    self.contributors.push(contributor_id.clone());
                }
            }
            CoreEvent::ClientAttached { client_id, .. } => {
                if let Some(client_id) = client_id
                    && !self.clients.contains(client_id)
                {
                    self.clients.push(client_id.clone());
                }
            }
            _ => {}
        }
        self
    }
}

/// A single field within a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub field_id: u64,
    pub name: String,
    pub kind: FieldKind,
}

/// Materialized state of a schema aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaState {
    pub name: String,
    pub app_id: Option<Uuid>,
    pub published: bool,
    pub fields: Vec<SchemaField>,
}

impl DomainState for SchemaState {
    const OWNER_TYPE: &'static str = "schema";
}

impl SchemaState {
    /// Fold one event into this state.
    ///
    /// `FieldAdded` events whose type name the resolver does not know are
    /// skipped; the rest of the schema still materializes.
    pub fn apply(mut self, event: &CoreEvent, resolver: &dyn FieldTypeResolver) -> Self {
        match event {
            CoreEvent::SchemaCreated { app_id, name, .. } => {
                self.name = name.clone();
                self.app_id = Some(*app_id);
            }
            CoreEvent::FieldAdded {
                field_id,
                name,
                type_name,
                ..
            } => match resolver.resolve(type_name) {
                Some(kind) => self.fields.push(SchemaField {
                    field_id: *field_id,
                    name: name.clone(),
                    kind,
                }),
                None => {
                    tracing::warn!(
                        field = %name,
                        type_name = %type_name,
                        "unresolvable field type, skipping field"
                    );
                }
            },
            CoreEvent::SchemaPublished { .. } => {
                self.published = true;
            }
            _ => {}
        }
        self
    }
}

/// Materialized state of a content item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentState {
    pub schema_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub deleted: bool,
}

impl DomainState for ContentState {
    const OWNER_TYPE: &'static str = "content";
}

impl ContentState {
    pub fn apply(mut self, event: &CoreEvent) -> Self {
        match event {
            CoreEvent::ContentCreated {
                schema_id, data, ..
            } => {
                self.schema_id = Some(*schema_id);
                self.data = data.clone();
            }
            CoreEvent::ContentUpdated { data, .. } => {
                self.data = data.clone();
            }
            CoreEvent::ContentDeleted { .. } => {
                self.deleted = true;
            }
            _ => {}
        }
        self
    }
}

/// Materialized state of a binary asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetState {
    pub file_name: String,
    pub file_size: u64,
    pub deleted: bool,
}

impl DomainState for AssetState {
    const OWNER_TYPE: &'static str = "asset";
}

impl AssetState {
    pub fn apply(mut self, event: &CoreEvent) -> Self {
        match event {
            CoreEvent::AssetCreated {
                file_name,
                file_size,
                ..
            } => {
                self.file_name = file_name.clone();
                self.file_size = *file_size;
            }
            CoreEvent::AssetRenamed { file_name, .. } => {
                self.file_name = file_name.clone();
            }
            CoreEvent::AssetDeleted { .. } => {
                self.deleted = true;
            }
            _ => {}
        }
        self
    }
}
