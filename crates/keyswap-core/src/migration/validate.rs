//! Plan validation.
//!
//! Refuses to plan while implicit many-to-many relations exist. The only way
//! to obtain a [`ValidatedRelations`] is through this module, so the
//! sequencer cannot be handed unvalidated discovery output.

use super::discover::{Discovery, ExplicitManyToMany, ForeignKeyRelation};
use super::error::MigrationError;
use super::remediation::RemediationReport;
use crate::catalog::{EntityRef, NamingConvention};
use tracing::warn;

/// Relations that passed validation and can be sequenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRelations {
    target: EntityRef,
    foreign_keys: Vec<ForeignKeyRelation>,
    explicit_many_to_many: Vec<ExplicitManyToMany>,
}

impl ValidatedRelations {
    /// Relations supplied by the caller instead of discovered.
    pub(crate) fn manual(target: EntityRef, foreign_keys: Vec<ForeignKeyRelation>) -> Self {
        Self {
            target,
            foreign_keys,
            explicit_many_to_many: Vec::new(),
        }
    }

    /// Swap in a caller-supplied foreign key list, keeping discovered join entities.
    pub(crate) fn with_foreign_keys(mut self, foreign_keys: Vec<ForeignKeyRelation>) -> Self {
        self.foreign_keys = foreign_keys;
        self
    }

    /// The entity whose key is being migrated.
    pub fn target(&self) -> &EntityRef {
        &self.target
    }

    /// Foreign key dependents.
    pub fn foreign_keys(&self) -> &[ForeignKeyRelation] {
        &self.foreign_keys
    }

    /// Explicit join entity dependents.
    pub fn explicit_many_to_many(&self) -> &[ExplicitManyToMany] {
        &self.explicit_many_to_many
    }

    /// Check if no dependent relation needs rewriting.
    pub fn is_empty(&self) -> bool {
        self.foreign_keys.is_empty() && self.explicit_many_to_many.is_empty()
    }
}

/// Validate discovery output.
///
/// Never fixes anything: when implicit many-to-many relations are present the
/// result is [`MigrationError::BlockedByImplicitRelation`] carrying a report
/// for a human to act on before planning again.
pub fn validate(
    discovery: Discovery,
    naming: &dyn NamingConvention,
) -> Result<ValidatedRelations, MigrationError> {
    if !discovery.implicit_many_to_many.is_empty() {
        warn!(
            entity = %discovery.target,
            blocking = discovery.implicit_many_to_many.len(),
            "implicit many-to-many relations block planning"
        );
        let report = RemediationReport::new(
            discovery.target,
            &discovery.implicit_many_to_many,
            naming,
        );
        return Err(MigrationError::BlockedByImplicitRelation(Box::new(report)));
    }

    Ok(ValidatedRelations {
        target: discovery.target,
        foreign_keys: discovery.foreign_keys,
        explicit_many_to_many: discovery.explicit_many_to_many,
    })
}
