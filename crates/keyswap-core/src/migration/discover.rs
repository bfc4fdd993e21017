//! Relationship discovery.
//!
//! Walks a registry snapshot and classifies every relation touching a target
//! entity as a foreign key, an implicit many-to-many relation, or an explicit
//! many-to-many relation realized through a join entity.

use super::error::MigrationError;
use crate::catalog::{
    DeleteBehavior, EntityDef, EntityRef, FieldDef, FieldKind, FieldRef, JoinTable,
    RegistrySnapshot,
};
use std::collections::HashSet;
use tracing::debug;

/// A foreign key on another entity (or the target itself) pointing at the target.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ForeignKeyRelation {
    /// The foreign key field.
    pub field: FieldRef,
    /// Whether the foreign key column accepts null.
    pub nullable: bool,
    /// Delete behavior declared on the foreign key.
    pub on_delete: DeleteBehavior,
}

impl ForeignKeyRelation {
    /// Entity holding the foreign key.
    pub fn source_entity(&self) -> &EntityRef {
        &self.field.entity
    }
}

/// A many-to-many relation whose join table is framework-managed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImplicitManyToMany {
    /// The many-to-many field, on the entity that declares it.
    pub field: FieldRef,
    /// The entity the field points at.
    pub related: EntityRef,
}

impl ImplicitManyToMany {
    /// Entity declaring the many-to-many field.
    pub fn source_entity(&self) -> &EntityRef {
        &self.field.entity
    }
}

/// A many-to-many relation realized through an addressable join entity.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExplicitManyToMany {
    /// The join entity.
    pub join_entity: EntityRef,
    /// Field on the join entity pointing at the target.
    pub target_field: String,
    /// Field on the join entity pointing at the other side, when present.
    pub other_field: Option<String>,
    /// Whether the join entity's target field accepts null.
    pub nullable: bool,
    /// The many-to-many field that names the join entity.
    pub declared_by: FieldRef,
}

impl ExplicitManyToMany {
    /// Reference to the join entity's field pointing at the target.
    pub fn target_field_ref(&self) -> FieldRef {
        self.join_entity.field(&self.target_field)
    }
}

/// One relation touching the target entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationDescriptor {
    /// Direct foreign key reference.
    ForeignKey(ForeignKeyRelation),
    /// Many-to-many relation without an addressable join entity.
    ImplicitManyToMany(ImplicitManyToMany),
    /// Many-to-many relation through a visible join entity.
    ExplicitManyToMany(ExplicitManyToMany),
}

/// Every relation touching a target entity, partitioned by kind.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Discovery {
    /// The entity whose key is being migrated.
    pub target: EntityRef,
    /// Direct foreign key references.
    pub foreign_keys: Vec<ForeignKeyRelation>,
    /// Implicit many-to-many relations.
    pub implicit_many_to_many: Vec<ImplicitManyToMany>,
    /// Explicit many-to-many relations.
    pub explicit_many_to_many: Vec<ExplicitManyToMany>,
}

impl Discovery {
    /// Check if nothing references the target.
    pub fn is_empty(&self) -> bool {
        self.foreign_keys.is_empty()
            && self.implicit_many_to_many.is_empty()
            && self.explicit_many_to_many.is_empty()
    }

    /// Total number of relations found.
    pub fn len(&self) -> usize {
        self.foreign_keys.len() + self.implicit_many_to_many.len() + self.explicit_many_to_many.len()
    }

    /// All relations as tagged descriptors.
    pub fn relations(&self) -> Vec<RelationDescriptor> {
        let mut relations = Vec::with_capacity(self.len());
        relations.extend(
            self.foreign_keys
                .iter()
                .cloned()
                .map(RelationDescriptor::ForeignKey),
        );
        relations.extend(
            self.implicit_many_to_many
                .iter()
                .cloned()
                .map(RelationDescriptor::ImplicitManyToMany),
        );
        relations.extend(
            self.explicit_many_to_many
                .iter()
                .cloned()
                .map(RelationDescriptor::ExplicitManyToMany),
        );
        relations
    }
}

/// Discover every relation touching `target`.
///
/// Pure read of the snapshot; the same snapshot always yields the same result.
pub fn discover(registry: &RegistrySnapshot, target: &EntityRef) -> Result<Discovery, MigrationError> {
    if !registry.contains(target) {
        return Err(MigrationError::UnresolvedEntity {
            entity: target.clone(),
        });
    }

    let mut discovery = Discovery {
        target: target.clone(),
        foreign_keys: Vec::new(),
        implicit_many_to_many: Vec::new(),
        explicit_many_to_many: Vec::new(),
    };

    // Many-to-many first: join entity keys claimed here are not plain foreign keys.
    let mut claimed: HashSet<FieldRef> = HashSet::new();
    for entity in &registry.entities {
        for field in entity.many_to_many_fields() {
            let FieldKind::ManyToMany { to, through } = &field.kind else {
                continue;
            };
            let declared_on_target = entity.is(target);
            if to != target && !declared_on_target {
                continue;
            }

            let declared = entity.entity_ref().field(&field.name);
            let other = if declared_on_target {
                to.clone()
            } else {
                entity.entity_ref()
            };

            match through {
                JoinTable::Auto => {
                    debug!(field = %declared, related = %to, "implicit many-to-many");
                    discovery.implicit_many_to_many.push(ImplicitManyToMany {
                        field: declared,
                        related: to.clone(),
                    });
                }
                JoinTable::Entity(join) => {
                    let join_def = registry.get_entity(join).ok_or_else(|| {
                        MigrationError::UnresolvedEntity {
                            entity: join.clone(),
                        }
                    })?;
                    for relation in explicit_relations(join_def, target, &other, &declared)? {
                        if claimed.insert(relation.target_field_ref()) {
                            debug!(
                                join_entity = %relation.join_entity,
                                field = %relation.target_field,
                                "explicit many-to-many"
                            );
                            discovery.explicit_many_to_many.push(relation);
                        }
                    }
                }
            }
        }
    }

    for entity in &registry.entities {
        for field in entity.foreign_keys_to(target) {
            let field_ref = entity.entity_ref().field(&field.name);
            if claimed.contains(&field_ref) {
                continue;
            }
            debug!(field = %field_ref, nullable = field.nullable, "foreign key dependent");
            discovery.foreign_keys.push(ForeignKeyRelation {
                field: field_ref,
                nullable: field.nullable,
                on_delete: field.on_delete().unwrap_or_default(),
            });
        }
    }

    debug!(
        entity = %target,
        foreign_keys = discovery.foreign_keys.len(),
        implicit = discovery.implicit_many_to_many.len(),
        explicit = discovery.explicit_many_to_many.len(),
        "relationship discovery complete"
    );

    Ok(discovery)
}

/// Locate the join entity's key(s) pointing at `target` by relation identity,
/// never by declaration position.
fn explicit_relations(
    join: &EntityDef,
    target: &EntityRef,
    other: &EntityRef,
    declared_by: &FieldRef,
) -> Result<Vec<ExplicitManyToMany>, MigrationError> {
    let target_fields: Vec<&FieldDef> = join.foreign_keys_to(target).collect();
    if target_fields.is_empty() {
        return Err(MigrationError::MalformedJoinEntity {
            join_entity: join.entity_ref(),
            target: target.clone(),
        });
    }

    Ok(target_fields
        .iter()
        .map(|target_field| {
            let other_field = join
                .foreign_keys_to(other)
                .find(|f| f.name != target_field.name)
                .map(|f| f.name.clone());

            ExplicitManyToMany {
                join_entity: join.entity_ref(),
                target_field: target_field.name.clone(),
                other_field,
                nullable: target_field.nullable,
                declared_by: declared_by.clone(),
            }
        })
        .collect())
}
