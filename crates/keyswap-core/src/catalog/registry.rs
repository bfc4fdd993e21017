//! Registry snapshot - a point-in-time description of every known entity.

use super::entity::{EntityDef, EntityRef};
use super::field::FieldDef;
use crate::error::Error;
use rkyv::Archive;
use std::collections::HashSet;
use std::path::Path;

/// A snapshot of all entity definitions known to the application registry.
///
/// Entities keep their declaration order; discovery walks them in that order.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Default,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct RegistrySnapshot {
    /// Snapshot version, as reported by whoever exported it.
    #[serde(default)]
    pub version: u64,
    /// Entity definitions in declaration order.
    #[serde(default)]
    pub entities: Vec<EntityDef>,
}

impl RegistrySnapshot {
    /// Create an empty snapshot.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            entities: Vec::new(),
        }
    }

    /// Add an entity to the snapshot.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Get an entity by reference.
    pub fn get_entity(&self, entity: &EntityRef) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.is(entity))
    }

    /// Get a field by entity reference and field name.
    pub fn get_field(&self, entity: &EntityRef, field: &str) -> Option<&FieldDef> {
        self.get_entity(entity).and_then(|e| e.get_field(field))
    }

    /// Check whether the snapshot contains `entity`.
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.get_entity(entity).is_some()
    }

    /// Verify internal consistency.
    ///
    /// Rejects duplicate entities or fields, identity fields that are not
    /// declared, and relations pointing at entities outside the snapshot.
    pub fn check(&self) -> Result<(), Error> {
        let mut seen = HashSet::new();
        for entity in &self.entities {
            let entity_ref = entity.entity_ref();
            if !seen.insert(entity_ref.clone()) {
                return Err(Error::DuplicateEntity(entity_ref));
            }

            let mut field_names = HashSet::new();
            for field in &entity.fields {
                if !field_names.insert(field.name.as_str()) {
                    return Err(Error::DuplicateField {
                        entity: entity_ref,
                        field: field.name.clone(),
                    });
                }
            }

            if entity.get_identity_field().is_none() {
                return Err(Error::MissingIdentityField {
                    entity: entity_ref,
                    field: entity.identity_field.clone(),
                });
            }
        }

        for entity in &self.entities {
            for field in &entity.fields {
                let mut targets: Vec<&EntityRef> = field.kind.related_entity().into_iter().collect();
                if let super::FieldKind::ManyToMany {
                    through: super::JoinTable::Entity(join),
                    ..
                } = &field.kind
                {
                    targets.push(join);
                }

                for target in targets {
                    if !seen.contains(target) {
                        return Err(Error::DanglingReference {
                            field: entity.entity_ref().field(&field.name),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Parse a snapshot from JSON and check it.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.check()?;
        Ok(snapshot)
    }

    /// Render the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a JSON snapshot from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize the snapshot to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a snapshot from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldKind, JoinTable, ScalarType};

    fn sample_snapshot() -> RegistrySnapshot {
        let order = EntityRef::new("shop", "Order");
        let tag = EntityRef::new("shop", "Tag");

        RegistrySnapshot::new(1)
            .with_entity(
                EntityDef::new("shop", "Order", "id")
                    .with_field(
                        FieldDef::new("id", FieldKind::scalar(ScalarType::Int64)).primary_key(),
                    )
                    .with_field(FieldDef::new(
                        "tags",
                        FieldKind::many_to_many(tag.clone(), JoinTable::Auto),
                    )),
            )
            .with_entity(
                EntityDef::new("shop", "Tag", "id").with_field(
                    FieldDef::new("id", FieldKind::scalar(ScalarType::Int64)).primary_key(),
                ),
            )
            .with_entity(
                EntityDef::new("shop", "LineItem", "id")
                    .with_field(
                        FieldDef::new("id", FieldKind::scalar(ScalarType::Int64)).primary_key(),
                    )
                    .with_field(FieldDef::new("order", FieldKind::foreign_key(order))),
            )
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = sample_snapshot();

        assert!(snapshot.contains(&EntityRef::new("shop", "Order")));
        assert!(!snapshot.contains(&EntityRef::new("billing", "Order")));
        assert!(snapshot
            .get_field(&EntityRef::new("shop", "LineItem"), "order")
            .is_some());
        assert_eq!(snapshot.entities.len(), 3);
        assert!(snapshot.check().is_ok());
    }

    #[test]
    fn test_check_rejects_duplicate_entity() {
        let snapshot = sample_snapshot().with_entity(
            EntityDef::new("shop", "Tag", "id")
                .with_field(FieldDef::new("id", FieldKind::scalar(ScalarType::Int64))),
        );

        assert!(matches!(snapshot.check(), Err(Error::DuplicateEntity(e)) if e.name == "Tag"));
    }

    #[test]
    fn test_check_rejects_duplicate_field() {
        let snapshot = RegistrySnapshot::new(1).with_entity(
            EntityDef::new("shop", "Tag", "id")
                .with_field(FieldDef::new("id", FieldKind::scalar(ScalarType::Int64)))
                .with_field(FieldDef::new("id", FieldKind::scalar(ScalarType::Int32))),
        );

        assert!(matches!(snapshot.check(), Err(Error::DuplicateField { field, .. }) if field == "id"));
    }

    #[test]
    fn test_check_rejects_missing_identity() {
        let snapshot = RegistrySnapshot::new(1).with_entity(
            EntityDef::new("shop", "Tag", "pk")
                .with_field(FieldDef::new("id", FieldKind::scalar(ScalarType::Int64))),
        );

        assert!(matches!(
            snapshot.check(),
            Err(Error::MissingIdentityField { field, .. }) if field == "pk"
        ));
    }

    #[test]
    fn test_check_rejects_dangling_reference() {
        let snapshot = RegistrySnapshot::new(1).with_entity(
            EntityDef::new("shop", "LineItem", "id")
                .with_field(FieldDef::new("id", FieldKind::scalar(ScalarType::Int64)))
                .with_field(FieldDef::new(
                    "order",
                    FieldKind::foreign_key(EntityRef::new("shop", "Order")),
                )),
        );

        assert!(matches!(
            snapshot.check(),
            Err(Error::DanglingReference { target, .. }) if target.name == "Order"
        ));
    }

    #[test]
    fn test_json_roundtrip_preserves_order() {
        let snapshot = sample_snapshot();
        let json = snapshot.to_json().unwrap();
        let decoded = RegistrySnapshot::from_json(&json).unwrap();

        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.entities[2].name, "LineItem");
    }

    #[test]
    fn test_from_json_handwritten() {
        let json = r#"{
            "version": 3,
            "entities": [
                {
                    "app": "shop",
                    "name": "Order",
                    "identity_field": "id",
                    "fields": [
                        { "name": "id", "kind": "scalar", "scalar": "int64", "primary_key": true }
                    ]
                },
                {
                    "app": "shop",
                    "name": "LineItem",
                    "identity_field": "id",
                    "fields": [
                        { "name": "id", "kind": "scalar", "scalar": "int64", "primary_key": true },
                        {
                            "name": "order",
                            "kind": "foreign_key",
                            "to": { "app": "shop", "name": "Order" },
                            "nullable": true,
                            "on_delete": "set_null"
                        }
                    ]
                }
            ]
        }"#;

        let snapshot = RegistrySnapshot::from_json(json).unwrap();
        let field = snapshot
            .get_field(&EntityRef::new("shop", "LineItem"), "order")
            .unwrap();

        assert_eq!(snapshot.version, 3);
        assert!(field.nullable);
        assert_eq!(
            field.on_delete(),
            Some(crate::catalog::DeleteBehavior::SetNull)
        );
    }

    #[test]
    fn test_binary_roundtrip() {
        let snapshot = sample_snapshot();
        let bytes = snapshot.to_bytes().unwrap();
        let decoded = RegistrySnapshot::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, snapshot);
    }
}
