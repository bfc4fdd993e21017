//! Core type definitions for the catalog.

use super::entity::EntityRef;
use rkyv::Archive;

/// Scalar data types a registry field can carry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    String,
    /// Binary data.
    Bytes,
    /// Timestamp (microseconds since Unix epoch).
    Timestamp,
    /// UUID (128-bit identifier).
    Uuid,
}

impl ScalarType {
    /// Check if this type is an integer type usable as an auto-increment key.
    pub fn is_integer(&self) -> bool {
        matches!(self, ScalarType::Int32 | ScalarType::Int64)
    }
}

/// Behavior when a referenced row is deleted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeleteBehavior {
    /// Delete related rows.
    #[default]
    Cascade,
    /// Prevent deletion if related rows exist.
    Restrict,
    /// Set the foreign key to null.
    SetNull,
}

impl std::fmt::Display for DeleteBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteBehavior::Cascade => write!(f, "cascade"),
            DeleteBehavior::Restrict => write!(f, "restrict"),
            DeleteBehavior::SetNull => write!(f, "set null"),
        }
    }
}

/// How a many-to-many relation stores its pairs.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JoinTable {
    /// Join table generated by the framework, not addressable as an entity.
    Auto,
    /// Join table materialized as a first-class entity with two foreign keys.
    Entity(EntityRef),
}

/// What a field holds.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// A plain column.
    Scalar {
        /// Column type.
        scalar: ScalarType,
    },
    /// A foreign key to another entity's identity field.
    ForeignKey {
        /// Referenced entity.
        to: EntityRef,
        /// Delete behavior.
        #[serde(default)]
        on_delete: DeleteBehavior,
        /// One-to-one (unique foreign key).
        #[serde(default)]
        unique: bool,
    },
    /// A many-to-many relation.
    ManyToMany {
        /// Entity on the other side.
        to: EntityRef,
        /// Join storage.
        through: JoinTable,
    },
}

impl FieldKind {
    /// Create a scalar field kind.
    pub fn scalar(scalar: ScalarType) -> Self {
        FieldKind::Scalar { scalar }
    }

    /// Create a foreign key kind with cascade delete.
    pub fn foreign_key(to: EntityRef) -> Self {
        FieldKind::ForeignKey {
            to,
            on_delete: DeleteBehavior::Cascade,
            unique: false,
        }
    }

    /// Create a many-to-many kind.
    pub fn many_to_many(to: EntityRef, through: JoinTable) -> Self {
        FieldKind::ManyToMany { to, through }
    }

    /// Check if this kind relates to another entity.
    pub fn is_relation(&self) -> bool {
        !matches!(self, FieldKind::Scalar { .. })
    }

    /// Check if this kind is a many-to-many relation.
    pub fn is_many_to_many(&self) -> bool {
        matches!(self, FieldKind::ManyToMany { .. })
    }

    /// The entity this kind relates to, if any.
    pub fn related_entity(&self) -> Option<&EntityRef> {
        match self {
            FieldKind::Scalar { .. } => None,
            FieldKind::ForeignKey { to, .. } | FieldKind::ManyToMany { to, .. } => Some(to),
        }
    }

    /// Get the scalar type if this is a plain column.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            FieldKind::Scalar { scalar } => Some(*scalar),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_type_checks() {
        assert!(ScalarType::Int32.is_integer());
        assert!(ScalarType::Int64.is_integer());
        assert!(!ScalarType::Uuid.is_integer());
        assert!(!ScalarType::Float64.is_integer());
    }

    #[test]
    fn test_field_kind_relations() {
        let tag = EntityRef::new("shop", "Tag");

        let scalar = FieldKind::scalar(ScalarType::String);
        assert!(!scalar.is_relation());
        assert!(scalar.related_entity().is_none());
        assert_eq!(scalar.scalar_type(), Some(ScalarType::String));

        let fk = FieldKind::foreign_key(tag.clone());
        assert!(fk.is_relation());
        assert!(!fk.is_many_to_many());
        assert_eq!(fk.related_entity(), Some(&tag));

        let m2m = FieldKind::many_to_many(tag.clone(), JoinTable::Auto);
        assert!(m2m.is_many_to_many());
        assert_eq!(m2m.related_entity(), Some(&tag));
    }

    #[test]
    fn test_field_kind_json_shape() {
        let kind = FieldKind::foreign_key(EntityRef::new("shop", "Order"));
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "foreign_key");
        assert_eq!(json["to"]["app"], "shop");
        assert_eq!(json["on_delete"], "cascade");
    }
}
