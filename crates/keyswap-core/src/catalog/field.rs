//! Field definitions for entities.

use super::entity::EntityRef;
use super::types::{DeleteBehavior, FieldKind};
use rkyv::Archive;

/// Identifies a field on an entity.
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
pub struct FieldRef {
    /// Owning entity.
    pub entity: EntityRef,
    /// Field name.
    pub field: String,
}

impl FieldRef {
    /// Create a new field reference.
    pub fn new(entity: EntityRef, field: impl Into<String>) -> Self {
        Self {
            entity,
            field: field.into(),
        }
    }

    /// A sibling field on the same entity.
    pub fn sibling(&self, field: impl Into<String>) -> Self {
        Self::new(self.entity.clone(), field)
    }
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.entity, self.field)
    }
}

/// A field definition within an entity.
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
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// What the field holds.
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Whether the column accepts null.
    #[serde(default)]
    pub nullable: bool,
    /// Whether this field is the entity's primary key.
    #[serde(default)]
    pub primary_key: bool,
}

impl FieldDef {
    /// Create a new non-nullable field.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            primary_key: false,
        }
    }

    /// Create a nullable field.
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            primary_key: false,
        }
    }

    /// Mark as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Set the delete behavior of a foreign key. No effect on other kinds.
    pub fn with_on_delete(mut self, behavior: DeleteBehavior) -> Self {
        if let FieldKind::ForeignKey { on_delete, .. } = &mut self.kind {
            *on_delete = behavior;
        }
        self
    }

    /// Check if this field is a foreign key.
    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, FieldKind::ForeignKey { .. })
    }

    /// Delete behavior of a foreign key field.
    pub fn on_delete(&self) -> Option<DeleteBehavior> {
        match &self.kind {
            FieldKind::ForeignKey { on_delete, .. } => Some(*on_delete),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScalarType;

    #[test]
    fn test_field_def_builder() {
        let field = FieldDef::new("id", FieldKind::scalar(ScalarType::Int64)).primary_key();

        assert_eq!(field.name, "id");
        assert!(field.primary_key);
        assert!(!field.nullable);
        assert!(!field.is_foreign_key());
    }

    #[test]
    fn test_foreign_key_on_delete() {
        let order = EntityRef::new("shop", "Order");
        let field = FieldDef::optional("order", FieldKind::foreign_key(order))
            .with_on_delete(DeleteBehavior::SetNull);

        assert!(field.nullable);
        assert!(field.is_foreign_key());
        assert_eq!(field.on_delete(), Some(DeleteBehavior::SetNull));

        let scalar = FieldDef::new("note", FieldKind::scalar(ScalarType::String))
            .with_on_delete(DeleteBehavior::SetNull);
        assert_eq!(scalar.on_delete(), None);
    }

    #[test]
    fn test_field_ref_display() {
        let field = EntityRef::new("shop", "LineItem").field("order");
        assert_eq!(field.to_string(), "shop.LineItem.order");
        assert_eq!(field.sibling("order_uuid").field, "order_uuid");
    }
}
