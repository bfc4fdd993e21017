//! Migration plan types.
//!
//! A plan is an ordered list of abstract schema and data operations. It names
//! entities and fields by reference only; applying it is the job of a
//! [`PlanExecutor`](super::executor::PlanExecutor).

use crate::catalog::{DeleteBehavior, EntityRef, FieldRef};
use std::fmt;

/// Phase of a migration operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// Expand phase: add new structures.
    Expand,
    /// Backfill phase: populate data.
    Backfill,
    /// Constrain phase: tighten or restore constraints.
    Constrain,
    /// Contract phase: remove or rename old structures.
    Contract,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationPhase::Expand => write!(f, "expand"),
            MigrationPhase::Backfill => write!(f, "backfill"),
            MigrationPhase::Constrain => write!(f, "constrain"),
            MigrationPhase::Contract => write!(f, "contract"),
        }
    }
}

/// What to do with a dependent row whose parent row no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingParentPolicy {
    /// Leave the surrogate empty and continue (nullable relations).
    SetNull,
    /// Report a data integrity error (non-nullable relations).
    Fail,
}

impl MissingParentPolicy {
    /// Policy matching a relation's nullability.
    pub fn for_nullable(nullable: bool) -> Self {
        if nullable {
            MissingParentPolicy::SetNull
        } else {
            MissingParentPolicy::Fail
        }
    }
}

/// Row-level transform of a populate operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum FieldTransform {
    /// Assign every row a freshly generated UUID.
    GenerateSurrogate,
    /// Copy the referenced parent row's surrogate into the dependent row.
    LookupParentSurrogate {
        /// Integer foreign key field on the dependent row.
        source_field: String,
        /// Parent entity.
        parent: EntityRef,
        /// Parent's integer key field.
        parent_key: String,
        /// Parent's surrogate field.
        parent_surrogate: String,
        /// Behavior on a missing parent row.
        on_missing: MissingParentPolicy,
    },
}

/// Constraints applied to a surrogate field once it is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct FieldConstraints {
    /// Whether the column accepts null.
    pub nullable: bool,
    /// Whether new rows get a generated UUID by default.
    pub generated_default: bool,
    /// Whether users may edit the value.
    pub editable: bool,
}

impl FieldConstraints {
    /// Non-null, generated by default, read-only.
    pub fn surrogate_key() -> Self {
        Self {
            nullable: false,
            generated_default: true,
            editable: false,
        }
    }
}

/// A single operation in a migration plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Add a nullable UUID field.
    AddNullableField {
        /// The new field.
        field: FieldRef,
    },
    /// Populate a field row by row.
    PopulateField {
        /// The field being populated.
        field: FieldRef,
        /// How each row's value is computed.
        transform: FieldTransform,
    },
    /// Change a field's constraints.
    AlterFieldConstraints {
        /// The field.
        field: FieldRef,
        /// New constraints.
        constraints: FieldConstraints,
    },
    /// Drop a field.
    RemoveField {
        /// The dropped field.
        field: FieldRef,
    },
    /// Rename a field.
    RenameField {
        /// The field under its current name.
        field: FieldRef,
        /// The new name.
        to: String,
    },
    /// Make a field the entity's primary key.
    SetPrimaryKey {
        /// The new key field.
        field: FieldRef,
    },
    /// Declare a field as a foreign key.
    SetForeignKey {
        /// The foreign key field.
        field: FieldRef,
        /// Referenced entity.
        references: EntityRef,
        /// Delete behavior.
        on_delete: DeleteBehavior,
        /// Whether the column accepts null.
        nullable: bool,
    },
}

impl Operation {
    /// Get the phase of this operation.
    pub fn phase(&self) -> MigrationPhase {
        match self {
            Operation::AddNullableField { .. } => MigrationPhase::Expand,
            Operation::PopulateField { .. } => MigrationPhase::Backfill,
            Operation::AlterFieldConstraints { .. }
            | Operation::SetPrimaryKey { .. }
            | Operation::SetForeignKey { .. } => MigrationPhase::Constrain,
            Operation::RemoveField { .. } | Operation::RenameField { .. } => {
                MigrationPhase::Contract
            }
        }
    }

    /// The field this operation acts on.
    pub fn field(&self) -> &FieldRef {
        match self {
            Operation::AddNullableField { field }
            | Operation::PopulateField { field, .. }
            | Operation::AlterFieldConstraints { field, .. }
            | Operation::RemoveField { field }
            | Operation::RenameField { field, .. }
            | Operation::SetPrimaryKey { field }
            | Operation::SetForeignKey { field, .. } => field,
        }
    }

    /// The entity this operation acts on.
    pub fn entity(&self) -> &EntityRef {
        &self.field().entity
    }

    /// Short kind label.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::AddNullableField { .. } => "add_field",
            Operation::PopulateField { .. } => "populate",
            Operation::AlterFieldConstraints { .. } => "alter",
            Operation::RemoveField { .. } => "remove_field",
            Operation::RenameField { .. } => "rename_field",
            Operation::SetPrimaryKey { .. } => "set_primary_key",
            Operation::SetForeignKey { .. } => "set_foreign_key",
        }
    }

    /// Get a description of this operation.
    pub fn description(&self) -> String {
        match self {
            Operation::AddNullableField { field } => {
                format!("Add nullable UUID field '{}'", field)
            }
            Operation::PopulateField {
                field,
                transform: FieldTransform::GenerateSurrogate,
            } => {
                format!("Generate a UUID for every row into '{}'", field)
            }
            Operation::PopulateField {
                field,
                transform:
                    FieldTransform::LookupParentSurrogate {
                        source_field,
                        parent,
                        parent_surrogate,
                        on_missing,
                        ..
                    },
            } => {
                let missing = match on_missing {
                    MissingParentPolicy::SetNull => "null when parent is missing",
                    MissingParentPolicy::Fail => "fail when parent is missing",
                };
                format!(
                    "Populate '{}' from '{}.{}' via '{}' ({})",
                    field, parent, parent_surrogate, field.sibling(source_field), missing
                )
            }
            Operation::AlterFieldConstraints { field, constraints } => {
                format!(
                    "Alter '{}' (nullable={}, generated default={}, editable={})",
                    field, constraints.nullable, constraints.generated_default, constraints.editable
                )
            }
            Operation::RemoveField { field } => format!("Remove field '{}'", field),
            Operation::RenameField { field, to } => {
                format!("Rename '{}' to '{}'", field, field.sibling(to))
            }
            Operation::SetPrimaryKey { field } => {
                format!("Set '{}' as UUID primary key", field)
            }
            Operation::SetForeignKey {
                field,
                references,
                on_delete,
                nullable,
            } => {
                format!(
                    "Set '{}' as foreign key to '{}' (on delete {}, nullable={})",
                    field, references, on_delete, nullable
                )
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// A prior migration that must have run before this plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MigrationDependency {
    /// Application label.
    pub app: String,
    /// Migration name.
    pub name: String,
}

impl MigrationDependency {
    /// Create a new dependency.
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }
}

/// A complete migration plan.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MigrationPlan {
    /// Entity whose key is being replaced.
    pub target: EntityRef,
    /// The key field being replaced.
    pub primary_key: String,
    /// Prior migrations, passed through unexamined.
    pub dependencies: Vec<MigrationDependency>,
    /// Ordered operations.
    pub operations: Vec<Operation>,
}

impl MigrationPlan {
    /// Get the number of operations in the plan.
    pub fn step_count(&self) -> usize {
        self.operations.len()
    }

    /// Check if this plan is empty (no operations).
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Get operations of a specific phase.
    pub fn steps_in_phase(&self, phase: MigrationPhase) -> Vec<&Operation> {
        self.operations
            .iter()
            .filter(|op| op.phase() == phase)
            .collect()
    }

    /// Index of the first operation matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Operation) -> bool) -> Option<usize> {
        self.operations.iter().position(predicate)
    }

    /// Stable digest of the plan.
    ///
    /// Planning the same snapshot twice yields the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.target.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.primary_key.as_bytes());
        for dep in &self.dependencies {
            hasher.update(b"\0dep:");
            hasher.update(dep.app.as_bytes());
            hasher.update(b".");
            hasher.update(dep.name.as_bytes());
        }
        for op in &self.operations {
            hasher.update(b"\0op:");
            hasher.update(op.description().as_bytes());
        }
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Render the plan as JSON.
    pub fn to_json(&self) -> Result<String, crate::error::Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "UUID key migration for '{}.{}'", self.target, self.primary_key)?;
        for dep in &self.dependencies {
            writeln!(f, "  depends on {}.{}", dep.app, dep.name)?;
        }
        for (idx, op) in self.operations.iter().enumerate() {
            writeln!(f, "  {:>3}. [{}] {}", idx + 1, op.phase(), op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> EntityRef {
        EntityRef::new("shop", "Order")
    }

    fn sample_plan() -> MigrationPlan {
        MigrationPlan {
            target: order(),
            primary_key: "id".into(),
            dependencies: vec![MigrationDependency::new("shop", "0007_previous")],
            operations: vec![
                Operation::AddNullableField {
                    field: order().field("id_uuid"),
                },
                Operation::PopulateField {
                    field: order().field("id_uuid"),
                    transform: FieldTransform::GenerateSurrogate,
                },
                Operation::AlterFieldConstraints {
                    field: order().field("id_uuid"),
                    constraints: FieldConstraints::surrogate_key(),
                },
                Operation::RemoveField {
                    field: order().field("id"),
                },
                Operation::RenameField {
                    field: order().field("id_uuid"),
                    to: "id".into(),
                },
                Operation::SetPrimaryKey {
                    field: order().field("id"),
                },
            ],
        }
    }

    #[test]
    fn test_operation_phases() {
        let plan = sample_plan();

        assert_eq!(plan.steps_in_phase(MigrationPhase::Expand).len(), 1);
        assert_eq!(plan.steps_in_phase(MigrationPhase::Backfill).len(), 1);
        assert_eq!(plan.steps_in_phase(MigrationPhase::Constrain).len(), 2);
        assert_eq!(plan.steps_in_phase(MigrationPhase::Contract).len(), 2);
        assert!(plan.operations.iter().all(|op| op.entity() == &order()));
    }

    #[test]
    fn test_operation_descriptions() {
        let plan = sample_plan();

        assert_eq!(
            plan.operations[0].description(),
            "Add nullable UUID field 'shop.Order.id_uuid'"
        );
        assert_eq!(
            plan.operations[4].description(),
            "Rename 'shop.Order.id_uuid' to 'shop.Order.id'"
        );

        let lookup = Operation::PopulateField {
            field: EntityRef::new("shop", "LineItem").field("order_uuid"),
            transform: FieldTransform::LookupParentSurrogate {
                source_field: "order".into(),
                parent: order(),
                parent_key: "id".into(),
                parent_surrogate: "id_uuid".into(),
                on_missing: MissingParentPolicy::SetNull,
            },
        };
        assert_eq!(
            lookup.description(),
            "Populate 'shop.LineItem.order_uuid' from 'shop.Order.id_uuid' via \
             'shop.LineItem.order' (null when parent is missing)"
        );
    }

    #[test]
    fn test_missing_parent_policy() {
        assert_eq!(
            MissingParentPolicy::for_nullable(true),
            MissingParentPolicy::SetNull
        );
        assert_eq!(
            MissingParentPolicy::for_nullable(false),
            MissingParentPolicy::Fail
        );
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let plan = sample_plan();
        assert_eq!(plan.fingerprint(), sample_plan().fingerprint());
        assert_eq!(plan.fingerprint().len(), 64);

        let mut reordered = sample_plan();
        reordered.operations.swap(3, 4);
        assert_ne!(plan.fingerprint(), reordered.fingerprint());
    }

    #[test]
    fn test_plan_display_and_json() {
        let plan = sample_plan();
        let text = plan.to_string();

        assert!(text.starts_with("UUID key migration for 'shop.Order.id'"));
        assert!(text.contains("depends on shop.0007_previous"));
        assert!(text.contains("  6. [constrain] Set 'shop.Order.id' as UUID primary key"));

        let json: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(json["operations"][1]["op"], "populate_field");
        assert_eq!(
            json["operations"][1]["transform"]["transform"],
            "generate_surrogate"
        );
    }

    #[test]
    fn test_migration_phases() {
        assert_eq!(MigrationPhase::Expand.to_string(), "expand");
        assert_eq!(MigrationPhase::Backfill.to_string(), "backfill");
        assert_eq!(MigrationPhase::Constrain.to_string(), "constrain");
        assert_eq!(MigrationPhase::Contract.to_string(), "contract");
    }
}
