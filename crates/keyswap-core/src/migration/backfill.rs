//! Row-level backfill transforms.
//!
//! The two data operations of a key swap: generating a surrogate for every
//! row of the target, and copying the parent's surrogate into every
//! dependent row through the old integer key.

use super::error::MigrationError;
use super::plan::MissingParentPolicy;
use crate::catalog::{EntityRef, FieldRef};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// Source of fresh surrogate identifiers.
pub trait SurrogateGenerator {
    /// Produce the next identifier. Must never repeat.
    fn next_surrogate(&mut self) -> Uuid;
}

/// Random (version 4) UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSurrogates;

impl SurrogateGenerator for RandomSurrogates {
    fn next_surrogate(&mut self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic, monotonically increasing UUIDs.
///
/// Useful when a test needs to predict which row receives which surrogate.
#[derive(Debug, Clone, Default)]
pub struct SequentialSurrogates {
    next: u128,
}

impl SequentialSurrogates {
    /// Start counting at `start`.
    pub fn starting_at(start: u128) -> Self {
        Self { next: start }
    }
}

impl SurrogateGenerator for SequentialSurrogates {
    fn next_surrogate(&mut self) -> Uuid {
        self.next += 1;
        Uuid::from_u128(self.next)
    }
}

/// Configuration for backfill execution.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Number of rows per batch.
    pub batch_size: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self { batch_size: 1000 }
    }
}

/// Progress report for one populate operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillProgress {
    /// Field being populated.
    pub field: FieldRef,
    /// Rows processed so far.
    pub processed_count: u64,
    /// Rows whose parent was missing and whose surrogate was left empty.
    pub orphaned_count: u64,
    /// Batches completed.
    pub batches: u64,
}

impl BackfillProgress {
    /// Create a new progress report.
    pub fn new(field: FieldRef) -> Self {
        Self {
            field,
            processed_count: 0,
            orphaned_count: 0,
            batches: 0,
        }
    }
}

/// Mapping from a parent's old integer keys to its surrogates.
#[derive(Debug, Clone)]
pub struct ParentIndex {
    field: FieldRef,
    parent: EntityRef,
    on_missing: MissingParentPolicy,
    surrogates: HashMap<i64, Uuid>,
}

impl ParentIndex {
    /// Build an index for populating `field` from `parent` rows.
    pub fn new(
        field: FieldRef,
        parent: EntityRef,
        on_missing: MissingParentPolicy,
        entries: impl IntoIterator<Item = (i64, Uuid)>,
    ) -> Self {
        Self {
            field,
            parent,
            on_missing,
            surrogates: entries.into_iter().collect(),
        }
    }

    /// Check if a parent row with `key` exists.
    pub fn contains(&self, key: i64) -> bool {
        self.surrogates.contains_key(&key)
    }

    /// Number of parent rows indexed.
    pub fn len(&self) -> usize {
        self.surrogates.len()
    }

    /// Check if the parent has no rows.
    pub fn is_empty(&self) -> bool {
        self.surrogates.is_empty()
    }

    /// Look up the surrogate for a dependent row's old key.
    ///
    /// A null key stays null. A key whose parent row is gone becomes null
    /// under [`MissingParentPolicy::SetNull`] and is a
    /// [`MigrationError::MissingParentRow`] under [`MissingParentPolicy::Fail`].
    pub fn resolve(&self, key: Option<i64>) -> Result<Option<Uuid>, MigrationError> {
        let Some(key) = key else {
            return Ok(None);
        };
        if let Some(surrogate) = self.surrogates.get(&key) {
            return Ok(Some(*surrogate));
        }

        match self.on_missing {
            MissingParentPolicy::SetNull => {
                warn!(
                    field = %self.field,
                    parent = %self.parent,
                    key,
                    "parent row missing, leaving surrogate empty"
                );
                Ok(None)
            }
            MissingParentPolicy::Fail => Err(MigrationError::MissingParentRow {
                field: self.field.clone(),
                parent: self.parent.clone(),
                key,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(on_missing: MissingParentPolicy) -> ParentIndex {
        ParentIndex::new(
            EntityRef::new("shop", "LineItem").field("order"),
            EntityRef::new("shop", "Order"),
            on_missing,
            [(1, Uuid::from_u128(10)), (2, Uuid::from_u128(20))],
        )
    }

    #[test]
    fn test_sequential_surrogates() {
        let mut generator = SequentialSurrogates::default();
        assert_eq!(generator.next_surrogate(), Uuid::from_u128(1));
        assert_eq!(generator.next_surrogate(), Uuid::from_u128(2));

        let mut generator = SequentialSurrogates::starting_at(100);
        assert_eq!(generator.next_surrogate(), Uuid::from_u128(101));
    }

    #[test]
    fn test_random_surrogates_are_distinct() {
        let mut generator = RandomSurrogates;
        let first = generator.next_surrogate();
        let second = generator.next_surrogate();
        assert_ne!(first, second);
        assert_eq!(first.get_version_num(), 4);
    }

    #[test]
    fn test_resolve_existing_and_null() {
        let index = index(MissingParentPolicy::Fail);
        assert_eq!(index.len(), 2);
        assert_eq!(index.resolve(Some(2)).unwrap(), Some(Uuid::from_u128(20)));
        assert_eq!(index.resolve(None).unwrap(), None);
    }

    #[test]
    fn test_resolve_orphan_set_null() {
        let index = index(MissingParentPolicy::SetNull);
        assert!(!index.contains(3));
        assert_eq!(index.resolve(Some(3)).unwrap(), None);
    }

    #[test]
    fn test_resolve_orphan_fails() {
        let err = index(MissingParentPolicy::Fail).resolve(Some(3)).unwrap_err();
        match err {
            MigrationError::MissingParentRow { field, parent, key } => {
                assert_eq!(field.to_string(), "shop.LineItem.order");
                assert_eq!(parent.name, "Order");
                assert_eq!(key, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
