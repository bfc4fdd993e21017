//! UUID key migration planning.
//!
//! Replacing an entity's integer primary key with a UUID touches every
//! relation that points at it. Planning runs in three pure stages over a
//! [`RegistrySnapshot`](crate::catalog::RegistrySnapshot):
//!
//! - [`discover`] classifies every relation touching the target
//! - [`validate`] refuses to continue while implicit many-to-many relations
//!   exist, returning a [`RemediationReport`] instead
//! - [`sequence`] emits the fixed-order swap as a [`MigrationPlan`]
//!
//! [`Planner`] runs all three. Applying the plan is delegated to a
//! [`PlanExecutor`]; [`MemoryDatabase`] is an in-memory reference
//! implementation.
//!
//! # Example
//!
//! ```ignore
//! use keyswap_core::migration::{Planner, PlannerConfig};
//!
//! let planner = Planner::new(registry).with_config(PlannerConfig::default());
//! match planner.plan(&EntityRef::new("shop", "Order"), Vec::new()) {
//!     Ok(plan) => println!("{plan}"),
//!     Err(e) => match e.remediation() {
//!         Some(report) => println!("{report}"),
//!         None => return Err(e),
//!     },
//! }
//! ```

pub mod backfill;
pub mod discover;
pub mod error;
pub mod executor;
pub mod plan;
pub mod planner;
pub mod remediation;
pub mod sequence;
pub mod validate;

// Discovery types
pub use discover::{
    discover, Discovery, ExplicitManyToMany, ForeignKeyRelation, ImplicitManyToMany,
    RelationDescriptor,
};

// Error types
pub use error::MigrationError;

// Validation types
pub use remediation::{
    JoinEntityDef, JoinKey, RecipePhase, RecipeStep, RemediationEntry, RemediationRecipe,
    RemediationReport,
};
pub use validate::{validate, ValidatedRelations};

// Plan types
pub use plan::{
    FieldConstraints, FieldTransform, MigrationDependency, MigrationPhase, MigrationPlan,
    MissingParentPolicy, Operation,
};
pub use sequence::sequence;

// Backfill types
pub use backfill::{
    BackfillConfig, BackfillProgress, ParentIndex, RandomSurrogates, SequentialSurrogates,
    SurrogateGenerator,
};

// Executor types
pub use executor::{
    execute_plan, Column, ExecutionResult, MemoryDatabase, PlanExecutor, Row, Table, Value,
};

// Planner types
pub use planner::{Planner, PlannerConfig};
