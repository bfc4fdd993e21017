//! Keyswap Core - plans integer-to-UUID primary key migrations.
//!
//! Given a snapshot of an application's entities and relations, this crate
//! produces an ordered plan that swaps one entity's integer key for a UUID
//! while keeping every foreign key and join entity pointing at it intact.

pub mod catalog;
pub mod error;
pub mod migration;

pub use catalog::{
    DefaultNaming, DeleteBehavior, EntityDef, EntityRef, FieldDef, FieldKind, FieldRef, JoinTable,
    NamingConvention, RegistrySnapshot, ScalarType,
};
pub use error::Error;
pub use migration::{
    execute_plan, MemoryDatabase, MigrationDependency, MigrationError, MigrationPlan, Operation,
    PlanExecutor, Planner, PlannerConfig, RemediationReport,
};
