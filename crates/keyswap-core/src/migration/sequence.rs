//! Operation sequencing.
//!
//! Turns validated relations into the fixed-order key swap:
//!
//! 1. add a nullable surrogate to the target
//! 2. generate a surrogate for every target row
//! 3. tighten the surrogate's constraints
//! 4. repoint every dependent (join entities first, then foreign keys)
//! 5. drop the old key, rename the surrogate into its place, mark it primary
//! 6. restore every dependent foreign key (foreign keys first, then join entities)

use super::error::MigrationError;
use super::plan::{
    FieldConstraints, FieldTransform, MigrationPlan, MissingParentPolicy, Operation,
};
use super::validate::ValidatedRelations;
use crate::catalog::{DeleteBehavior, EntityRef, FieldKind, FieldRef, RegistrySnapshot};
use std::collections::HashSet;
use tracing::debug;

/// A field whose integer reference to the target must be rewritten.
struct Dependent {
    field: FieldRef,
    nullable: bool,
    on_delete: DeleteBehavior,
}

/// Sequence the key swap for `target`.
///
/// `relations` must come from validating a discovery of the same target;
/// anything else is rejected with [`MigrationError::SequencingPrecondition`]
/// before a single operation is emitted.
pub fn sequence(
    registry: &RegistrySnapshot,
    target: &EntityRef,
    pk_field: &str,
    surrogate_suffix: &str,
    relations: &ValidatedRelations,
) -> Result<MigrationPlan, MigrationError> {
    if relations.target() != target {
        return Err(MigrationError::SequencingPrecondition {
            reason: format!(
                "relations were validated for {}, not {}",
                relations.target(),
                target
            ),
        });
    }

    let surrogate = check_primary_key(registry, target, pk_field, surrogate_suffix)?;

    let join_dependents = relations
        .explicit_many_to_many()
        .iter()
        .map(|relation| {
            dependent(registry, target, relation.target_field_ref(), relation.nullable)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let fk_dependents = relations
        .foreign_keys()
        .iter()
        .map(|relation| dependent(registry, target, relation.field.clone(), relation.nullable))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    for dep in join_dependents.iter().chain(&fk_dependents) {
        if !seen.insert(&dep.field) {
            return Err(MigrationError::SequencingPrecondition {
                reason: format!("dependent {} listed twice", dep.field),
            });
        }
        let dep_surrogate = format!("{}{}", dep.field.field, surrogate_suffix);
        if registry.get_field(&dep.field.entity, &dep_surrogate).is_some() {
            return Err(MigrationError::SurrogateConflict {
                field: dep.field.sibling(dep_surrogate),
            });
        }
    }

    let mut operations = Vec::with_capacity(6 + 5 * seen.len());

    operations.push(Operation::AddNullableField {
        field: surrogate.clone(),
    });
    operations.push(Operation::PopulateField {
        field: surrogate.clone(),
        transform: FieldTransform::GenerateSurrogate,
    });
    operations.push(Operation::AlterFieldConstraints {
        field: surrogate.clone(),
        constraints: FieldConstraints::surrogate_key(),
    });

    for dep in join_dependents.iter().chain(&fk_dependents) {
        debug!(field = %dep.field, nullable = dep.nullable, "repointing dependent");
        let dep_surrogate = dep
            .field
            .sibling(format!("{}{}", dep.field.field, surrogate_suffix));

        operations.push(Operation::AddNullableField {
            field: dep_surrogate.clone(),
        });
        operations.push(Operation::PopulateField {
            field: dep_surrogate.clone(),
            transform: FieldTransform::LookupParentSurrogate {
                source_field: dep.field.field.clone(),
                parent: target.clone(),
                parent_key: pk_field.to_string(),
                parent_surrogate: surrogate.field.clone(),
                on_missing: MissingParentPolicy::for_nullable(dep.nullable),
            },
        });
        operations.push(Operation::RemoveField {
            field: dep.field.clone(),
        });
        operations.push(Operation::RenameField {
            field: dep_surrogate,
            to: dep.field.field.clone(),
        });
    }

    operations.push(Operation::RemoveField {
        field: target.field(pk_field),
    });
    operations.push(Operation::RenameField {
        field: surrogate,
        to: pk_field.to_string(),
    });
    operations.push(Operation::SetPrimaryKey {
        field: target.field(pk_field),
    });

    for dep in fk_dependents.iter().chain(&join_dependents) {
        operations.push(Operation::SetForeignKey {
            field: dep.field.clone(),
            references: target.clone(),
            on_delete: dep.on_delete,
            nullable: dep.nullable,
        });
    }

    Ok(MigrationPlan {
        target: target.clone(),
        primary_key: pk_field.to_string(),
        dependencies: Vec::new(),
        operations,
    })
}

/// Check the key field can be swapped and return the surrogate's reference.
fn check_primary_key(
    registry: &RegistrySnapshot,
    target: &EntityRef,
    pk_field: &str,
    surrogate_suffix: &str,
) -> Result<FieldRef, MigrationError> {
    let entity = registry
        .get_entity(target)
        .ok_or_else(|| MigrationError::UnresolvedEntity {
            entity: target.clone(),
        })?;
    let field = entity
        .get_field(pk_field)
        .ok_or_else(|| MigrationError::UnresolvedField {
            field: target.field(pk_field),
        })?;

    if !field.primary_key {
        return Err(MigrationError::UnsupportedPrimaryKey {
            field: target.field(pk_field),
            reason: "field is not the primary key".into(),
        });
    }
    if !field.kind.scalar_type().is_some_and(|s| s.is_integer()) {
        return Err(MigrationError::UnsupportedPrimaryKey {
            field: target.field(pk_field),
            reason: "only integer keys can be replaced".into(),
        });
    }

    let surrogate = format!("{}{}", pk_field, surrogate_suffix);
    if entity.get_field(&surrogate).is_some() {
        return Err(MigrationError::SurrogateConflict {
            field: target.field(surrogate),
        });
    }
    Ok(target.field(surrogate))
}

fn dependent(
    registry: &RegistrySnapshot,
    target: &EntityRef,
    field: FieldRef,
    nullable: bool,
) -> Result<Dependent, MigrationError> {
    let def = registry
        .get_field(&field.entity, &field.field)
        .ok_or_else(|| MigrationError::SequencingPrecondition {
            reason: format!("dependent {} is not declared", field),
        })?;
    match &def.kind {
        FieldKind::ForeignKey { to, on_delete, .. } if to == target => Ok(Dependent {
            field,
            nullable,
            on_delete: *on_delete,
        }),
        _ => Err(MigrationError::SequencingPrecondition {
            reason: format!("{} is not a foreign key to {}", field, target),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DefaultNaming, EntityDef, FieldDef, JoinTable, ScalarType};
    use crate::migration::discover::{discover, ForeignKeyRelation};
    use crate::migration::plan::MigrationPhase;
    use crate::migration::validate::validate;

    fn id() -> FieldDef {
        FieldDef::new("id", FieldKind::scalar(ScalarType::Int64)).primary_key()
    }

    fn order() -> EntityRef {
        EntityRef::new("shop", "Order")
    }

    fn shop_registry() -> RegistrySnapshot {
        let tag = EntityRef::new("shop", "Tag");
        let through = EntityRef::new("shop", "OrderTagThrough");
        RegistrySnapshot::new(1)
            .with_entity(
                EntityDef::new("shop", "Order", "id")
                    .with_field(id())
                    .with_field(FieldDef::new(
                        "tags",
                        FieldKind::many_to_many(tag.clone(), JoinTable::Entity(through)),
                    )),
            )
            .with_entity(EntityDef::new("shop", "Tag", "id").with_field(id()))
            .with_entity(
                EntityDef::new("shop", "OrderTagThrough", "id")
                    .with_field(id())
                    .with_field(FieldDef::new("tag", FieldKind::foreign_key(tag)))
                    .with_field(FieldDef::new("order", FieldKind::foreign_key(order()))),
            )
            .with_entity(
                EntityDef::new("shop", "LineItem", "id")
                    .with_field(id())
                    .with_field(
                        FieldDef::new("order", FieldKind::foreign_key(order()))
                            .with_on_delete(DeleteBehavior::Restrict),
                    ),
            )
    }

    fn plan_for(registry: &RegistrySnapshot) -> Result<MigrationPlan, MigrationError> {
        let relations = validate(discover(registry, &order())?, &DefaultNaming)?;
        sequence(registry, &order(), "id", "_uuid", &relations)
    }

    fn kinds(plan: &MigrationPlan) -> Vec<String> {
        plan.operations
            .iter()
            .map(|op| format!("{}({})", op.kind(), op.entity().name))
            .collect()
    }

    #[test]
    fn test_zero_dependents() {
        let registry = RegistrySnapshot::new(1)
            .with_entity(EntityDef::new("shop", "Order", "id").with_field(id()));
        let plan = plan_for(&registry).unwrap();

        assert_eq!(
            kinds(&plan),
            vec![
                "add_field(Order)",
                "populate(Order)",
                "alter(Order)",
                "remove_field(Order)",
                "rename_field(Order)",
                "set_primary_key(Order)",
            ]
        );
        assert!(plan.steps_in_phase(MigrationPhase::Constrain).iter().all(|op| !matches!(
            op,
            Operation::SetForeignKey { .. }
        )));
    }

    #[test]
    fn test_order_line_item_and_join_entity() {
        let plan = plan_for(&shop_registry()).unwrap();

        assert_eq!(plan.step_count(), 16);
        assert_eq!(
            kinds(&plan),
            vec![
                "add_field(Order)",
                "populate(Order)",
                "alter(Order)",
                "add_field(OrderTagThrough)",
                "populate(OrderTagThrough)",
                "remove_field(OrderTagThrough)",
                "rename_field(OrderTagThrough)",
                "add_field(LineItem)",
                "populate(LineItem)",
                "remove_field(LineItem)",
                "rename_field(LineItem)",
                "remove_field(Order)",
                "rename_field(Order)",
                "set_primary_key(Order)",
                "set_foreign_key(LineItem)",
                "set_foreign_key(OrderTagThrough)",
            ]
        );

        assert_eq!(
            plan.operations[8],
            Operation::PopulateField {
                field: EntityRef::new("shop", "LineItem").field("order_uuid"),
                transform: FieldTransform::LookupParentSurrogate {
                    source_field: "order".into(),
                    parent: order(),
                    parent_key: "id".into(),
                    parent_surrogate: "id_uuid".into(),
                    on_missing: MissingParentPolicy::Fail,
                },
            }
        );
        assert_eq!(
            plan.operations[14],
            Operation::SetForeignKey {
                field: EntityRef::new("shop", "LineItem").field("order"),
                references: order(),
                on_delete: DeleteBehavior::Restrict,
                nullable: false,
            }
        );
        // Join entity keys are located by identity, not by declaration order.
        assert_eq!(
            plan.operations[5],
            Operation::RemoveField {
                field: EntityRef::new("shop", "OrderTagThrough").field("order"),
            }
        );
    }

    #[test]
    fn test_ordering_invariant() {
        let plan = plan_for(&shop_registry()).unwrap();
        let target_pk = order().field("id");

        let drop_pk = plan
            .position(|op| matches!(op, Operation::RemoveField { field } if *field == target_pk))
            .unwrap();
        let set_pk = plan
            .position(|op| matches!(op, Operation::SetPrimaryKey { .. }))
            .unwrap();

        for dependent in ["LineItem", "OrderTagThrough"] {
            let entity = EntityRef::new("shop", dependent);
            let drop_fk = plan
                .position(|op| matches!(op, Operation::RemoveField { .. }) && *op.entity() == entity)
                .unwrap();
            let restore = plan
                .position(|op| {
                    matches!(op, Operation::SetForeignKey { .. }) && *op.entity() == entity
                })
                .unwrap();
            assert!(drop_fk < drop_pk, "{} dropped its key too late", dependent);
            assert!(restore > set_pk, "{} restored its key too early", dependent);
        }
    }

    #[test]
    fn test_nullable_dependent_tolerates_orphans() {
        let registry = RegistrySnapshot::new(1)
            .with_entity(EntityDef::new("shop", "Order", "id").with_field(id()))
            .with_entity(
                EntityDef::new("billing", "Invoice", "id")
                    .with_field(id())
                    .with_field(
                        FieldDef::optional("order", FieldKind::foreign_key(order()))
                            .with_on_delete(DeleteBehavior::SetNull),
                    ),
            );
        let plan = plan_for(&registry).unwrap();

        let on_missing = plan.operations.iter().find_map(|op| match op {
            Operation::PopulateField {
                transform: FieldTransform::LookupParentSurrogate { on_missing, .. },
                ..
            } => Some(*on_missing),
            _ => None,
        });
        assert_eq!(on_missing, Some(MissingParentPolicy::SetNull));

        // The restored key keeps accepting null, so emptied rows stay valid.
        assert_eq!(
            plan.operations.last(),
            Some(&Operation::SetForeignKey {
                field: EntityRef::new("billing", "Invoice").field("order"),
                references: order(),
                on_delete: DeleteBehavior::SetNull,
                nullable: true,
            })
        );
    }

    #[test]
    fn test_rejects_relations_for_another_target() {
        let registry = shop_registry();
        let tag = EntityRef::new("shop", "Tag");
        let relations = validate(discover(&registry, &tag).unwrap(), &DefaultNaming).unwrap();

        let err = sequence(&registry, &order(), "id", "_uuid", &relations).unwrap_err();
        assert!(matches!(err, MigrationError::SequencingPrecondition { .. }));
    }

    #[test]
    fn test_rejects_non_foreign_key_dependent() {
        let registry = shop_registry();
        let relations = ValidatedRelations::manual(
            order(),
            vec![ForeignKeyRelation {
                field: EntityRef::new("shop", "LineItem").field("id"),
                nullable: false,
                on_delete: DeleteBehavior::Cascade,
            }],
        );

        let err = sequence(&registry, &order(), "id", "_uuid", &relations).unwrap_err();
        assert!(matches!(err, MigrationError::SequencingPrecondition { .. }));
    }

    #[test]
    fn test_primary_key_checks() {
        let registry = RegistrySnapshot::new(1).with_entity(
            EntityDef::new("shop", "Order", "code")
                .with_field(FieldDef::new("code", FieldKind::scalar(ScalarType::String)).primary_key())
                .with_field(FieldDef::new("number", FieldKind::scalar(ScalarType::Int64))),
        );
        let relations = ValidatedRelations::manual(order(), Vec::new());

        let err = sequence(&registry, &order(), "code", "_uuid", &relations).unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedPrimaryKey { .. }));

        let err = sequence(&registry, &order(), "number", "_uuid", &relations).unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedPrimaryKey { .. }));

        let err = sequence(&registry, &order(), "id", "_uuid", &relations).unwrap_err();
        assert!(matches!(err, MigrationError::UnresolvedField { .. }));
    }

    #[test]
    fn test_surrogate_conflict() {
        let registry = RegistrySnapshot::new(1).with_entity(
            EntityDef::new("shop", "Order", "id")
                .with_field(id())
                .with_field(FieldDef::optional("id_uuid", FieldKind::scalar(ScalarType::Uuid))),
        );
        let relations = ValidatedRelations::manual(order(), Vec::new());

        let err = sequence(&registry, &order(), "id", "_uuid", &relations).unwrap_err();
        assert_eq!(err.to_string(), "surrogate field shop.Order.id_uuid already exists");
    }

    #[test]
    fn test_sequencing_is_deterministic() {
        let first = plan_for(&shop_registry()).unwrap();
        let second = plan_for(&shop_registry()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }
}
