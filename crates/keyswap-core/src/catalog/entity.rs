//! Entity definitions.

use super::field::{FieldDef, FieldRef};
use rkyv::Archive;

/// Identifies an entity by application label and entity name.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct EntityRef {
    /// Application label.
    pub app: String,
    /// Entity name as declared (case preserved).
    pub name: String,
}

impl EntityRef {
    /// Create a new entity reference.
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }

    /// Reference a field on this entity.
    pub fn field(&self, name: impl Into<String>) -> FieldRef {
        FieldRef::new(self.clone(), name)
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.app, self.name)
    }
}

/// An entity definition (model / table schema).
#[derive(
    Debug,
    Clone,
    PartialEq,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct EntityDef {
    /// Application label.
    pub app: String,
    /// Entity name (unique within its application).
    pub name: String,
    /// Name of the primary identity field.
    pub identity_field: String,
    /// Field definitions, in declaration order.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(
        app: impl Into<String>,
        name: impl Into<String>,
        identity_field: impl Into<String>,
    ) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
            identity_field: identity_field.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// The reference identifying this entity.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(&self.app, &self.name)
    }

    /// Check whether this definition is the one `entity` points at.
    pub fn is(&self, entity: &EntityRef) -> bool {
        self.app == entity.app && self.name == entity.name
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get the identity field definition.
    pub fn get_identity_field(&self) -> Option<&FieldDef> {
        self.get_field(&self.identity_field)
    }

    /// Fields that are foreign keys pointing at `target`.
    pub fn foreign_keys_to<'a>(
        &'a self,
        target: &'a EntityRef,
    ) -> impl Iterator<Item = &'a FieldDef> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.is_foreign_key() && f.kind.related_entity() == Some(target))
    }

    /// Many-to-many fields declared on this entity.
    pub fn many_to_many_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.kind.is_many_to_many())
    }
}
