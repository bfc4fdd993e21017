//! End-to-end planning: discover, validate, sequence.

use super::discover::{discover, Discovery, ForeignKeyRelation};
use super::error::MigrationError;
use super::plan::{MigrationDependency, MigrationPlan};
use super::sequence::sequence;
use super::validate::{validate, ValidatedRelations};
use crate::catalog::{DefaultNaming, EntityRef, FieldKind, FieldRef, NamingConvention, RegistrySnapshot};
use tracing::info;

/// Planner configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Name of the integer key field being replaced.
    pub primary_key: String,
    /// Suffix appended to a field name to name its temporary surrogate.
    pub surrogate_suffix: String,
    /// Whether dependents are found by walking the registry.
    pub auto_detect_relations: bool,
    /// Foreign key dependents supplied by hand.
    ///
    /// With auto-detection on these replace the discovered foreign keys while
    /// join entities still come from discovery. With it off they are the only
    /// dependents rewritten.
    pub dependents: Option<Vec<FieldRef>>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            primary_key: "id".to_string(),
            surrogate_suffix: "_uuid".to_string(),
            auto_detect_relations: true,
            dependents: None,
        }
    }
}

impl PlannerConfig {
    /// Set the key field name.
    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = field.into();
        self
    }

    /// Set the surrogate suffix.
    pub fn with_surrogate_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.surrogate_suffix = suffix.into();
        self
    }

    /// Turn registry discovery on or off.
    pub fn with_auto_detect(mut self, enabled: bool) -> Self {
        self.auto_detect_relations = enabled;
        self
    }

    /// Supply foreign key dependents by hand.
    pub fn with_dependents(mut self, dependents: impl IntoIterator<Item = FieldRef>) -> Self {
        self.dependents = Some(dependents.into_iter().collect());
        self
    }
}

/// Plans UUID key migrations against one registry snapshot.
pub struct Planner {
    registry: RegistrySnapshot,
    config: PlannerConfig,
    naming: Box<dyn NamingConvention>,
}

impl Planner {
    /// Create a planner with the default configuration and naming.
    pub fn new(registry: RegistrySnapshot) -> Self {
        Self {
            registry,
            config: PlannerConfig::default(),
            naming: Box::new(DefaultNaming),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the naming convention.
    pub fn with_naming(mut self, naming: impl NamingConvention + 'static) -> Self {
        self.naming = Box::new(naming);
        self
    }

    /// The registry snapshot being planned against.
    pub fn registry(&self) -> &RegistrySnapshot {
        &self.registry
    }

    /// Current configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Discover relations touching `target` without planning.
    pub fn discover(&self, target: &EntityRef) -> Result<Discovery, MigrationError> {
        discover(&self.registry, target)
    }

    /// Discover and validate relations touching `target`.
    pub fn relations(&self, target: &EntityRef) -> Result<ValidatedRelations, MigrationError> {
        let manual = self
            .config
            .dependents
            .as_deref()
            .map(|fields| self.manual_foreign_keys(target, fields))
            .transpose()?;

        if !self.config.auto_detect_relations {
            if !self.registry.contains(target) {
                return Err(MigrationError::UnresolvedEntity {
                    entity: target.clone(),
                });
            }
            return Ok(ValidatedRelations::manual(
                target.clone(),
                manual.unwrap_or_default(),
            ));
        }

        let validated = validate(self.discover(target)?, self.naming.as_ref())?;
        Ok(match manual {
            Some(foreign_keys) => validated.with_foreign_keys(foreign_keys),
            None => validated,
        })
    }

    /// Plan the key swap for `target`.
    ///
    /// `dependencies` are prior migrations the plan must run after; they are
    /// carried into the plan unexamined.
    pub fn plan(
        &self,
        target: &EntityRef,
        dependencies: Vec<MigrationDependency>,
    ) -> Result<MigrationPlan, MigrationError> {
        let relations = self.relations(target)?;
        let mut plan = sequence(
            &self.registry,
            target,
            &self.config.primary_key,
            &self.config.surrogate_suffix,
            &relations,
        )?;
        plan.dependencies = dependencies;

        info!(
            entity = %target,
            foreign_keys = relations.foreign_keys().len(),
            join_entities = relations.explicit_many_to_many().len(),
            steps = plan.step_count(),
            fingerprint = %plan.fingerprint(),
            "planned UUID key migration"
        );
        Ok(plan)
    }

    fn manual_foreign_keys(
        &self,
        target: &EntityRef,
        fields: &[FieldRef],
    ) -> Result<Vec<ForeignKeyRelation>, MigrationError> {
        fields
            .iter()
            .map(|field| {
                let def = self
                    .registry
                    .get_field(&field.entity, &field.field)
                    .ok_or_else(|| MigrationError::UnresolvedField {
                        field: field.clone(),
                    })?;
                match &def.kind {
                    FieldKind::ForeignKey { to, on_delete, .. } if to == target => {
                        Ok(ForeignKeyRelation {
                            field: field.clone(),
                            nullable: def.nullable,
                            on_delete: *on_delete,
                        })
                    }
                    _ => Err(MigrationError::SequencingPrecondition {
                        reason: format!("{} is not a foreign key to {}", field, target),
                    }),
                }
            })
            .collect()
    }
}
