//! Plan execution.
//!
//! [`PlanExecutor`] is the seam to whatever migration system applies a plan
//! against live storage. [`MemoryDatabase`] is a reference implementation
//! holding tables in memory; it applies every operation kind with the same
//! row-level semantics a real collaborator must provide.

use super::backfill::{
    BackfillConfig, BackfillProgress, ParentIndex, RandomSurrogates, SurrogateGenerator,
};
use super::error::MigrationError;
use super::plan::{FieldConstraints, FieldTransform, MigrationPlan, Operation};
use crate::catalog::{DeleteBehavior, EntityRef, FieldKind, FieldRef, RegistrySnapshot};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Applies plan operations to storage.
pub trait PlanExecutor {
    /// Apply one operation. Returns backfill progress for populate operations.
    fn apply(
        &mut self,
        step_index: usize,
        operation: &Operation,
    ) -> Result<Option<BackfillProgress>, MigrationError>;
}

/// Result of executing a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Steps executed.
    pub steps_executed: usize,
    /// Total steps.
    pub total_steps: usize,
    /// Backfill progress reports, in plan order.
    pub backfill_progress: Vec<BackfillProgress>,
}

/// Apply every operation of `plan` in order, stopping at the first failure.
pub fn execute_plan<E: PlanExecutor + ?Sized>(
    plan: &MigrationPlan,
    executor: &mut E,
) -> Result<ExecutionResult, MigrationError> {
    info!(
        entity = %plan.target,
        steps = plan.step_count(),
        fingerprint = %plan.fingerprint(),
        "executing key migration"
    );

    let mut result = ExecutionResult {
        steps_executed: 0,
        total_steps: plan.step_count(),
        backfill_progress: Vec::new(),
    };

    for (idx, op) in plan.operations.iter().enumerate() {
        debug!(step = idx, phase = %op.phase(), "{}", op);
        match executor.apply(idx, op) {
            Ok(progress) => {
                result.backfill_progress.extend(progress);
                result.steps_executed += 1;
            }
            Err(e) => {
                error!(step = idx, error = %e, "migration step failed");
                return Err(e);
            }
        }
    }

    info!(steps = result.steps_executed, "key migration complete");
    Ok(result)
}

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Null.
    Null,
    /// Integer.
    Int(i64),
    /// UUID.
    Uuid(Uuid),
    /// Text.
    Text(String),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The UUID, if this is one.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// A row: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Declared state of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Whether the column accepts null.
    pub nullable: bool,
    /// Whether new rows get a generated UUID.
    pub generated_default: bool,
    /// Whether users may edit the value.
    pub editable: bool,
    /// Foreign key constraint, when enforced.
    pub references: Option<(EntityRef, DeleteBehavior)>,
}

impl Column {
    fn plain(nullable: bool) -> Self {
        Self {
            nullable,
            generated_default: false,
            editable: true,
            references: None,
        }
    }
}

/// An in-memory table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    primary_key: Option<String>,
    columns: BTreeMap<String, Column>,
    rows: Vec<Row>,
}

impl Table {
    /// Current primary key column.
    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    /// Column declaration.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Column names, sorted.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    /// All rows, in insertion order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Find the row whose primary key equals `key`.
    pub fn find(&self, key: &Value) -> Option<&Row> {
        let pk = self.primary_key.as_ref()?;
        self.rows.iter().find(|row| row.get(pk) == Some(key))
    }
}

/// Reference executor keeping every table in memory.
pub struct MemoryDatabase<G = RandomSurrogates> {
    tables: BTreeMap<EntityRef, Table>,
    generator: G,
    config: BackfillConfig,
}

impl MemoryDatabase<RandomSurrogates> {
    /// Create an empty database generating random surrogates.
    pub fn new() -> Self {
        Self::with_generator(RandomSurrogates)
    }
}

impl Default for MemoryDatabase<RandomSurrogates> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: SurrogateGenerator> MemoryDatabase<G> {
    /// Create an empty database using `generator` for surrogates.
    pub fn with_generator(generator: G) -> Self {
        Self {
            tables: BTreeMap::new(),
            generator,
            config: BackfillConfig::default(),
        }
    }

    /// Set the backfill configuration.
    pub fn with_backfill_config(mut self, config: BackfillConfig) -> Self {
        self.config = config;
        self
    }

    /// Create one table per entity of `registry`.
    ///
    /// Scalar and foreign key fields become columns; many-to-many fields have
    /// no column of their own.
    pub fn create_tables(&mut self, registry: &RegistrySnapshot) {
        for entity in &registry.entities {
            let mut table = Table::default();
            for field in &entity.fields {
                let mut column = Column::plain(field.nullable);
                match &field.kind {
                    FieldKind::Scalar { .. } => {}
                    FieldKind::ForeignKey { to, on_delete, .. } => {
                        column.references = Some((to.clone(), *on_delete));
                    }
                    FieldKind::ManyToMany { .. } => continue,
                }
                if field.primary_key {
                    table.primary_key = Some(field.name.clone());
                }
                table.columns.insert(field.name.clone(), column);
            }
            self.tables.insert(entity.entity_ref(), table);
        }
    }

    /// Insert a row. Missing columns are stored as null.
    pub fn insert<K: Into<String>, V: Into<Value>>(
        &mut self,
        entity: &EntityRef,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<(), MigrationError> {
        let table = self
            .tables
            .get_mut(entity)
            .ok_or_else(|| MigrationError::UnresolvedEntity {
                entity: entity.clone(),
            })?;

        let mut row: Row = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if let Some(name) = row.keys().find(|name| !table.columns.contains_key(*name)) {
            return Err(MigrationError::UnresolvedField {
                field: entity.field(name.as_str()),
            });
        }
        for name in table.columns.keys() {
            row.entry(name.clone()).or_insert(Value::Null);
        }
        table.rows.push(row);
        Ok(())
    }

    /// Look up a table.
    pub fn table(&self, entity: &EntityRef) -> Option<&Table> {
        self.tables.get(entity)
    }

    fn table_mut(&mut self, step: usize, entity: &EntityRef) -> Result<&mut Table, MigrationError> {
        self.tables
            .get_mut(entity)
            .ok_or_else(|| failed(step, format!("no table for {}", entity)))
    }

    fn add_field(&mut self, step: usize, field: &FieldRef) -> Result<(), MigrationError> {
        let table = self.table_mut(step, &field.entity)?;
        if table.columns.contains_key(&field.field) {
            return Err(failed(step, format!("{} already exists", field)));
        }
        table.columns.insert(field.field.clone(), Column::plain(true));
        for row in &mut table.rows {
            row.insert(field.field.clone(), Value::Null);
        }
        Ok(())
    }

    fn generate(&mut self, step: usize, field: &FieldRef) -> Result<BackfillProgress, MigrationError> {
        let batch_size = self.config.batch_size.max(1);
        let table = self
            .tables
            .get_mut(&field.entity)
            .ok_or_else(|| failed(step, format!("no table for {}", field.entity)))?;
        require_column(step, table, field)?;

        let mut progress = BackfillProgress::new(field.clone());
        for batch in table.rows.chunks_mut(batch_size) {
            for row in batch {
                row.insert(
                    field.field.clone(),
                    Value::Uuid(self.generator.next_surrogate()),
                );
                progress.processed_count += 1;
            }
            progress.batches += 1;
        }
        Ok(progress)
    }

    fn lookup(
        &mut self,
        step: usize,
        field: &FieldRef,
        transform: &FieldTransform,
    ) -> Result<BackfillProgress, MigrationError> {
        let FieldTransform::LookupParentSurrogate {
            source_field,
            parent,
            parent_key,
            parent_surrogate,
            on_missing,
        } = transform
        else {
            return Err(failed(step, "expected a parent lookup".to_string()));
        };

        let parent_table = self
            .tables
            .get(parent)
            .ok_or_else(|| failed(step, format!("no table for {}", parent)))?;
        let entries = parent_table.rows.iter().filter_map(|row| {
            let key = row.get(parent_key)?.as_int()?;
            let surrogate = row.get(parent_surrogate)?.as_uuid()?;
            Some((key, surrogate))
        });
        let index = ParentIndex::new(
            field.sibling(source_field.as_str()),
            parent.clone(),
            *on_missing,
            entries,
        );
        debug!(field = %field, parent = %parent, parent_rows = index.len(), "parent index built");

        let batch_size = self.config.batch_size.max(1);
        let table = self.table_mut(step, &field.entity)?;
        require_column(step, table, field)?;

        let mut progress = BackfillProgress::new(field.clone());
        for batch in table.rows.chunks_mut(batch_size) {
            for row in batch {
                let key = match row.get(source_field.as_str()) {
                    Some(Value::Int(key)) => Some(*key),
                    Some(Value::Null) | None => None,
                    Some(other) => {
                        return Err(failed(
                            step,
                            format!("{} holds non-integer key {:?}", source_field, other),
                        ))
                    }
                };
                let surrogate = index.resolve(key)?;
                if key.is_some_and(|k| !index.contains(k)) {
                    progress.orphaned_count += 1;
                }
                row.insert(
                    field.field.clone(),
                    surrogate.map_or(Value::Null, Value::Uuid),
                );
                progress.processed_count += 1;
            }
            progress.batches += 1;
        }
        Ok(progress)
    }

    fn alter(
        &mut self,
        step: usize,
        field: &FieldRef,
        constraints: &FieldConstraints,
    ) -> Result<(), MigrationError> {
        let table = self.table_mut(step, &field.entity)?;
        require_column(step, table, field)?;
        if !constraints.nullable && table.rows.iter().any(|row| column_is_null(row, field)) {
            return Err(failed(step, format!("{} still holds null values", field)));
        }
        if let Some(column) = table.columns.get_mut(&field.field) {
            column.nullable = constraints.nullable;
            column.generated_default = constraints.generated_default;
            column.editable = constraints.editable;
        }
        Ok(())
    }

    fn remove_field(&mut self, step: usize, field: &FieldRef) -> Result<(), MigrationError> {
        let table = self.table_mut(step, &field.entity)?;
        require_column(step, table, field)?;
        table.columns.remove(&field.field);
        for row in &mut table.rows {
            row.remove(&field.field);
        }
        if table.primary_key.as_deref() == Some(field.field.as_str()) {
            table.primary_key = None;
        }
        Ok(())
    }

    fn rename_field(&mut self, step: usize, field: &FieldRef, to: &str) -> Result<(), MigrationError> {
        let table = self.table_mut(step, &field.entity)?;
        require_column(step, table, field)?;
        if table.columns.contains_key(to) {
            return Err(failed(step, format!("{} already exists", field.sibling(to))));
        }
        if let Some(column) = table.columns.remove(&field.field) {
            table.columns.insert(to.to_string(), column);
        }
        for row in &mut table.rows {
            if let Some(value) = row.remove(&field.field) {
                row.insert(to.to_string(), value);
            }
        }
        if table.primary_key.as_deref() == Some(field.field.as_str()) {
            table.primary_key = Some(to.to_string());
        }
        Ok(())
    }

    fn set_primary_key(&mut self, step: usize, field: &FieldRef) -> Result<(), MigrationError> {
        let table = self.table_mut(step, &field.entity)?;
        require_column(step, table, field)?;
        let mut seen = HashSet::new();
        for row in &table.rows {
            match row.get(&field.field) {
                Some(Value::Null) | None => {
                    return Err(failed(step, format!("{} holds null values", field)))
                }
                Some(value) => {
                    if !seen.insert(value) {
                        return Err(failed(step, format!("{} holds duplicate values", field)));
                    }
                }
            }
        }
        table.primary_key = Some(field.field.clone());
        Ok(())
    }

    fn set_foreign_key(
        &mut self,
        step: usize,
        field: &FieldRef,
        references: &EntityRef,
        on_delete: DeleteBehavior,
        nullable: bool,
    ) -> Result<(), MigrationError> {
        let parent = self
            .tables
            .get(references)
            .ok_or_else(|| failed(step, format!("no table for {}", references)))?;
        let parent_pk = parent
            .primary_key
            .as_ref()
            .ok_or_else(|| failed(step, format!("{} has no primary key", references)))?;
        let parent_keys: HashSet<Value> = parent
            .rows
            .iter()
            .filter_map(|row| row.get(parent_pk).cloned())
            .collect();

        let table = self.table_mut(step, &field.entity)?;
        require_column(step, table, field)?;
        for row in &table.rows {
            match row.get(&field.field) {
                Some(Value::Null) | None if nullable => {}
                Some(Value::Null) | None => {
                    return Err(failed(step, format!("{} holds null values", field)))
                }
                Some(value) if !parent_keys.contains(value) => {
                    return Err(failed(
                        step,
                        format!("{} references missing {} row {:?}", field, references, value),
                    ))
                }
                Some(_) => {}
            }
        }
        if let Some(column) = table.columns.get_mut(&field.field) {
            column.nullable = nullable;
            column.references = Some((references.clone(), on_delete));
        }
        Ok(())
    }
}

impl<G: SurrogateGenerator> PlanExecutor for MemoryDatabase<G> {
    fn apply(
        &mut self,
        step_index: usize,
        operation: &Operation,
    ) -> Result<Option<BackfillProgress>, MigrationError> {
        match operation {
            Operation::AddNullableField { field } => self.add_field(step_index, field)?,
            Operation::PopulateField {
                field,
                transform: FieldTransform::GenerateSurrogate,
            } => return self.generate(step_index, field).map(Some),
            Operation::PopulateField { field, transform } => {
                return self.lookup(step_index, field, transform).map(Some)
            }
            Operation::AlterFieldConstraints { field, constraints } => {
                self.alter(step_index, field, constraints)?
            }
            Operation::RemoveField { field } => self.remove_field(step_index, field)?,
            Operation::RenameField { field, to } => self.rename_field(step_index, field, to)?,
            Operation::SetPrimaryKey { field } => self.set_primary_key(step_index, field)?,
            Operation::SetForeignKey {
                field,
                references,
                on_delete,
                nullable,
            } => self.set_foreign_key(step_index, field, references, *on_delete, *nullable)?,
        }
        Ok(None)
    }
}

fn failed(step_index: usize, message: String) -> MigrationError {
    MigrationError::StepFailed {
        step_index,
        message,
    }
}

fn require_column(step: usize, table: &Table, field: &FieldRef) -> Result<(), MigrationError> {
    if table.columns.contains_key(&field.field) {
        Ok(())
    } else {
        Err(failed(step, format!("{} does not exist", field)))
    }
}

fn column_is_null(row: &Row, field: &FieldRef) -> bool {
    row.get(&field.field).map_or(true, Value::is_null)
}
