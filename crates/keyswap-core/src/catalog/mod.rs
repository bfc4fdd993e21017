//! Registry catalog.
//!
//! A read-only description of every entity, field and relation the planner
//! works against, decoupled from any particular framework's introspection API.

mod entity;
mod field;
mod naming;
mod registry;
mod types;

pub use entity::{EntityDef, EntityRef};
pub use field::{FieldDef, FieldRef};
pub use naming::{DefaultNaming, NamingConvention};
pub use registry::RegistrySnapshot;
pub use types::{DeleteBehavior, FieldKind, JoinTable, ScalarType};
