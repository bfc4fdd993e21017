//! Migration-specific error types.

use super::remediation::RemediationReport;
use crate::catalog::{EntityRef, FieldRef};
use thiserror::Error;

/// Migration planning and execution errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The requested entity is not part of the registry snapshot.
    #[error("entity {entity} is not in the registry")]
    UnresolvedEntity {
        /// The entity that was requested.
        entity: EntityRef,
    },

    /// The requested field is not declared on its entity.
    #[error("field {field} is not declared")]
    UnresolvedField {
        /// The field that was requested.
        field: FieldRef,
    },

    /// The key field cannot be swapped for a UUID.
    #[error("cannot convert {field} to a UUID key: {reason}")]
    UnsupportedPrimaryKey {
        /// The key field.
        field: FieldRef,
        /// Why it was rejected.
        reason: String,
    },

    /// The surrogate field name is already used on the entity.
    #[error("surrogate field {field} already exists")]
    SurrogateConflict {
        /// The conflicting field.
        field: FieldRef,
    },

    /// An explicit join entity has no foreign key back to the target.
    #[error("join entity {join_entity} has no foreign key to {target}")]
    MalformedJoinEntity {
        /// The join entity.
        join_entity: EntityRef,
        /// The entity being migrated.
        target: EntityRef,
    },

    /// Implicit many-to-many relations must be replaced with join entities first.
    #[error("{}", .0)]
    BlockedByImplicitRelation(Box<RemediationReport>),

    /// The sequencer was called with input that did not come from validation.
    #[error("sequencing precondition violated: {reason}")]
    SequencingPrecondition {
        /// Description of the misuse.
        reason: String,
    },

    /// A non-nullable dependent row references a parent row that no longer exists.
    #[error("{field} references missing {parent} row with key {key}")]
    MissingParentRow {
        /// The dependent foreign key field.
        field: FieldRef,
        /// The parent entity.
        parent: EntityRef,
        /// The dangling integer key.
        key: i64,
    },

    /// A migration step failed while being applied.
    #[error("step {step_index} failed: {message}")]
    StepFailed {
        /// The index of the failed step.
        step_index: usize,
        /// Error message.
        message: String,
    },

    /// Registry snapshot error.
    #[error("catalog error: {0}")]
    Catalog(#[from] crate::error::Error),
}

impl MigrationError {
    /// The remediation report, if planning was blocked.
    pub fn remediation(&self) -> Option<&RemediationReport> {
        match self {
            MigrationError::BlockedByImplicitRelation(report) => Some(report.as_ref()),
            _ => None,
        }
    }

    /// Check if this error arose while applying data rather than planning.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            MigrationError::MissingParentRow { .. } | MigrationError::StepFailed { .. }
        )
    }
}
