//! Remediation reports for implicit many-to-many relations.
//!
//! An implicit join table cannot be replaced by a join entity through an
//! ordinary structural change: migration diffing would create a fresh table
//! and abandon the populated one. The recipe here introduces the join entity
//! bound to the existing physical table as a state-only change, then rebinds
//! it to its default storage name.

use super::discover::ImplicitManyToMany;
use crate::catalog::{
    DeleteBehavior, EntityDef, EntityRef, FieldDef, FieldKind, FieldRef, NamingConvention,
    ScalarType,
};
use std::fmt;

/// One foreign key on a generated join entity.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct JoinKey {
    /// Field name on the join entity.
    pub name: String,
    /// Entity the key points at.
    pub references: EntityRef,
    /// Delete behavior of the key.
    pub on_delete: DeleteBehavior,
}

/// Definition of an explicit join entity to replace an implicit join table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct JoinEntityDef {
    /// The new join entity, in the declaring entity's application.
    pub entity: EntityRef,
    /// Key pointing at the entity that declares the many-to-many field.
    pub source_key: JoinKey,
    /// Key pointing at the entity on the other side.
    pub target_key: JoinKey,
    /// Name of the uniqueness constraint over both keys.
    pub unique_constraint: String,
}

impl JoinEntityDef {
    /// Build the join entity for `relation`.
    pub fn for_relation(relation: &ImplicitManyToMany, naming: &dyn NamingConvention) -> Self {
        let source = relation.source_entity();
        let target = &relation.related;

        let mut source_name = naming.join_field_name(source);
        let mut target_name = naming.join_field_name(target);
        if source_name == target_name {
            source_name = format!("from_{}", source_name);
            target_name = format!("to_{}", target_name);
        }

        Self {
            entity: EntityRef::new(&source.app, naming.join_entity_name(source, target)),
            unique_constraint: naming.unique_pair_name(&source_name, &target_name),
            source_key: JoinKey {
                name: source_name,
                references: source.clone(),
                on_delete: DeleteBehavior::Cascade,
            },
            target_key: JoinKey {
                name: target_name,
                references: target.clone(),
                on_delete: DeleteBehavior::Cascade,
            },
        }
    }

    /// The join entity as a registry definition.
    pub fn to_entity_def(&self) -> EntityDef {
        EntityDef::new(&self.entity.app, &self.entity.name, "id")
            .with_field(FieldDef::new("id", FieldKind::scalar(ScalarType::Int64)).primary_key())
            .with_fields([&self.source_key, &self.target_key].map(|key| {
                FieldDef::new(&key.name, FieldKind::foreign_key(key.references.clone()))
                    .with_on_delete(key.on_delete)
            }))
    }
}

impl fmt::Display for JoinEntityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "entity {} {{", self.entity)?;
        writeln!(f, "    id: int64 primary key")?;
        for key in [&self.source_key, &self.target_key] {
            writeln!(
                f,
                "    {}: foreign key -> {} (on delete {}, indexed)",
                key.name, key.references, key.on_delete
            )?;
        }
        writeln!(
            f,
            "    unique ({}, {}) as {}",
            self.source_key.name, self.target_key.name, self.unique_constraint
        )?;
        write!(f, "}}")
    }
}

/// A single remediation action.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecipeStep {
    /// Declare the join entity in the migration state.
    DeclareEntity {
        /// The join entity.
        entity: EntityRef,
    },
    /// Bind the join entity to an already existing physical table.
    BindStorage {
        /// The join entity.
        entity: EntityRef,
        /// Existing physical table.
        table: String,
    },
    /// Route the many-to-many field through the join entity.
    RepointManyToMany {
        /// The many-to-many field.
        field: FieldRef,
        /// The join entity.
        through: EntityRef,
    },
    /// Return the join entity to its default physical table name.
    RebindDefaultStorage {
        /// The join entity.
        entity: EntityRef,
    },
}

impl fmt::Display for RecipeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipeStep::DeclareEntity { entity } => write!(f, "declare entity {}", entity),
            RecipeStep::BindStorage { entity, table } => {
                write!(f, "bind {} to existing table \"{}\"", entity, table)
            }
            RecipeStep::RepointManyToMany { field, through } => {
                write!(f, "route {} through {}", field, through)
            }
            RecipeStep::RebindDefaultStorage { entity } => {
                write!(f, "rebind {} to its default table name", entity)
            }
        }
    }
}

/// A group of recipe steps applied as one migration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RecipePhase {
    /// Whether this phase changes the database, or only the migration state.
    pub touches_database: bool,
    /// Steps in order.
    pub steps: Vec<RecipeStep>,
}

/// Two-phase recipe: introduce the entity bound to existing storage, then
/// rebind it to default storage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RemediationRecipe {
    /// State-only phase.
    pub bind_existing: RecipePhase,
    /// Storage rebinding phase.
    pub rebind_default: RecipePhase,
}

impl RemediationRecipe {
    /// Build the recipe for one relation.
    pub fn new(relation: &ImplicitManyToMany, join: &JoinEntityDef, physical_table: &str) -> Self {
        Self {
            bind_existing: RecipePhase {
                touches_database: false,
                steps: vec![
                    RecipeStep::DeclareEntity {
                        entity: join.entity.clone(),
                    },
                    RecipeStep::BindStorage {
                        entity: join.entity.clone(),
                        table: physical_table.to_string(),
                    },
                    RecipeStep::RepointManyToMany {
                        field: relation.field.clone(),
                        through: join.entity.clone(),
                    },
                ],
            },
            rebind_default: RecipePhase {
                touches_database: true,
                steps: vec![RecipeStep::RebindDefaultStorage {
                    entity: join.entity.clone(),
                }],
            },
        }
    }

    /// Both phases in application order.
    pub fn phases(&self) -> [&RecipePhase; 2] {
        [&self.bind_existing, &self.rebind_default]
    }
}

impl fmt::Display for RemediationRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, phase) in self.phases().iter().enumerate() {
            let effect = if phase.touches_database {
                "renames the physical table"
            } else {
                "state only, database untouched"
            };
            writeln!(f, "phase {} ({}):", idx + 1, effect)?;
            for (step_idx, step) in phase.steps.iter().enumerate() {
                writeln!(f, "  {}. {}", step_idx + 1, step)?;
            }
        }
        Ok(())
    }
}

/// Remediation for one implicit many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RemediationEntry {
    /// The offending relation.
    pub relation: ImplicitManyToMany,
    /// Predicted name of the framework-generated join table.
    pub physical_table: String,
    /// Join entity to introduce.
    pub join_entity: JoinEntityDef,
    /// How to introduce it without losing the populated table.
    pub recipe: RemediationRecipe,
}

impl RemediationEntry {
    /// Build the remediation for `relation`.
    pub fn new(relation: &ImplicitManyToMany, naming: &dyn NamingConvention) -> Self {
        let physical_table = naming.auto_join_table(relation.source_entity(), &relation.field.field);
        let join_entity = JoinEntityDef::for_relation(relation, naming);
        let recipe = RemediationRecipe::new(relation, &join_entity, &physical_table);

        Self {
            relation: relation.clone(),
            physical_table,
            join_entity,
            recipe,
        }
    }
}

/// Advisory report produced when planning is blocked.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RemediationReport {
    /// The entity whose key was to be migrated.
    pub target: EntityRef,
    /// One entry per blocking relation.
    pub entries: Vec<RemediationEntry>,
}

impl RemediationReport {
    /// Build a report covering `relations`.
    pub fn new(
        target: EntityRef,
        relations: &[ImplicitManyToMany],
        naming: &dyn NamingConvention,
    ) -> Self {
        Self {
            target,
            entries: relations
                .iter()
                .map(|relation| RemediationEntry::new(relation, naming))
                .collect(),
        }
    }

    /// Number of blocking relations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the report has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for RemediationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "implicit many-to-many relations block the UUID migration of {}; \
             replace each with an explicit join entity first.",
            self.target
        )?;
        writeln!(f)?;
        writeln!(f, "blocking relations:")?;
        for (idx, entry) in self.entries.iter().enumerate() {
            writeln!(
                f,
                "{}. {} (table \"{}\")",
                idx + 1,
                entry.relation.field,
                entry.physical_table
            )?;
        }

        for entry in &self.entries {
            writeln!(f)?;
            writeln!(f, "--- join entity {} ---", entry.join_entity.entity)?;
            writeln!(f, "{}", entry.join_entity)?;
            writeln!(f)?;
            writeln!(
                f,
                "a plain structural migration would create a new table and abandon \"{}\"; \
                 apply instead:",
                entry.physical_table
            )?;
            write!(f, "{}", entry.recipe)?;
        }

        writeln!(f)?;
        write!(
            f,
            "once applied, declare each many-to-many field with its join entity as `through`, \
             then plan the UUID migration again."
        )
    }
}
