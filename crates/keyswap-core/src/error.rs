//! Core error types.

use crate::catalog::{EntityRef, FieldRef};
use thiserror::Error;

/// Registry snapshot errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading a snapshot from disk failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The same entity was declared twice.
    #[error("duplicate entity: {0}")]
    DuplicateEntity(EntityRef),

    /// The same field name was declared twice on one entity.
    #[error("duplicate field '{field}' on {entity}")]
    DuplicateField {
        /// Owning entity.
        entity: EntityRef,
        /// Repeated field name.
        field: String,
    },

    /// An entity names an identity field it does not declare.
    #[error("identity field '{field}' is not declared on {entity}")]
    MissingIdentityField {
        /// Offending entity.
        entity: EntityRef,
        /// Declared identity field name.
        field: String,
    },

    /// A relation points at an entity missing from the snapshot.
    #[error("{field} references unknown entity {target}")]
    DanglingReference {
        /// The relation field.
        field: FieldRef,
        /// The missing entity.
        target: EntityRef,
    },
}
