//! In-process [`Backend`] over plain row vectors.
//!
//! Evaluates [`Predicate`]s row by row, sorts with [`OrderTerm`]s and keeps a
//! call log so callers can see how many backend round trips a request made.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::predicate::values_equal;
use super::{
    Backend, BackendCapability, BackendError, FindFirst, FindMany, InsertRequest,
    MutationOutcome, OnConflict, OrderTerm, Predicate, Row, UpdateRequest, Value,
};
use crate::graphql::orm::{EntityDescriptor, EntityRegistry, PropertyKind};

/// One recorded backend operation.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    FindMany { entity: String, query: FindMany },
    FindFirst { entity: String, query: FindFirst },
    Count { entity: String, filter: Option<Predicate> },
    Insert { entity: String, rows: usize },
    Update { entity: String, filter: Option<Predicate> },
    Delete { entity: String, filter: Option<Predicate> },
}

impl BackendCall {
    pub fn entity(&self) -> &str {
        match self {
            BackendCall::FindMany { entity, .. }
            | BackendCall::FindFirst { entity, .. }
            | BackendCall::Count { entity, .. }
            | BackendCall::Insert { entity, .. }
            | BackendCall::Update { entity, .. }
            | BackendCall::Delete { entity, .. } => entity,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    /// Next value for an auto-increment integer primary key.
    next_id: i64,
}

pub struct MemoryBackend {
    registry: EntityRegistry,
    capability: BackendCapability,
    tables: RwLock<HashMap<String, Table>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MemoryBackend {
    pub fn new(registry: EntityRegistry) -> Self {
        Self {
            registry,
            capability: BackendCapability::default(),
            tables: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_capability(mut self, capability: BackendCapability) -> Self {
        self.capability = capability;
        self
    }

    /// Insert rows without recording a call. Defaults and constraints apply.
    pub fn seed(&self, entity: &str, rows: Vec<Row>) -> Result<(), BackendError> {
        let entity = self
            .registry
            .get(entity)
            .map_err(|_| BackendError::NotFound(entity.to_string()))?;
        let count = rows.len();
        self.insert_rows(&entity, rows, None)?;
        debug!(entity = %entity.name, rows = count, "Seeded table");
        Ok(())
    }

    /// Drain the call log.
    pub fn take_calls(&self) -> Vec<BackendCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Snapshot of every stored row of `entity`.
    pub fn rows(&self, entity: &str) -> Vec<Row> {
        self.tables
            .read()
            .get(entity)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }

    fn select(&self, entity: &EntityDescriptor, filter: Option<&Predicate>, order_by: &[OrderTerm]) -> Vec<Row> {
        let tables = self.tables.read();
        let Some(table) = tables.get(&entity.name) else {
            return Vec::new();
        };
        let matcher = filter.map(Predicate::matcher);
        let mut rows: Vec<Row> = table
            .rows
            .iter()
            .filter(|row| matcher.as_ref().is_none_or(|m| m.matches(row)))
            .cloned()
            .collect();
        if !order_by.is_empty() {
            rows.sort_by(|a, b| {
                order_by
                    .iter()
                    .map(|term| term.compare(a, b))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        rows
    }

    fn outcome(&self, rows: Vec<Row>) -> MutationOutcome {
        if self.capability.supports_returning {
            MutationOutcome::Rows(rows)
        } else {
            MutationOutcome::Success
        }
    }

    /// Complete `values` into a full row: omitted columns take their default,
    /// an auto-increment key or NULL.
    fn complete_row(
        entity: &EntityDescriptor,
        table: &mut Table,
        mut values: Row,
    ) -> Result<Row, BackendError> {
        if let Some(unknown) = values.keys().find(|k| entity.get_property(k).is_none()) {
            return Err(BackendError::Other(format!(
                "column `{unknown}` of relation `{}` does not exist",
                entity.name
            )));
        }

        let mut row = Row::with_capacity(entity.properties.len());
        for property in &entity.properties {
            let value = match values.shift_remove(&property.name) {
                Some(value) if value != Value::Null => value,
                given => {
                    if let Some(default) = &property.default_value {
                        default.clone()
                    } else if property.primary_key
                        && property.has_default
                        && property.kind == PropertyKind::Integer
                    {
                        table.next_id += 1;
                        Value::from(table.next_id)
                    } else {
                        given.unwrap_or(Value::Null)
                    }
                }
            };
            if value == Value::Null && !property.nullable {
                return Err(BackendError::Constraint(format!(
                    "null value in column `{}` of relation `{}` violates not-null constraint",
                    property.name, entity.name
                )));
            }
            if let (true, Value::Number(n)) = (property.primary_key, &value) {
                if let Some(id) = n.as_i64() {
                    table.next_id = table.next_id.max(id);
                }
            }
            row.insert(property.name.clone(), value);
        }
        Ok(row)
    }

    fn insert_rows(
        &self,
        entity: &EntityDescriptor,
        values: Vec<Row>,
        on_conflict: Option<&OnConflict>,
    ) -> Result<Vec<Row>, BackendError> {
        let primary_key: Vec<String> = entity.primary_key().iter().map(|p| p.name.clone()).collect();
        let mut tables = self.tables.write();
        // Rows land in a copy of the table that only replaces it once every
        // value was accepted.
        let mut table = tables.get(&entity.name).cloned().unwrap_or_default();
        let mut affected = Vec::new();

        for values in values {
            let row = Self::complete_row(entity, &mut table, values)?;

            let target = match on_conflict {
                Some(OnConflict::DoNothing { target }) | Some(OnConflict::DoUpdate { target, .. })
                    if !target.is_empty() =>
                {
                    target.clone()
                }
                _ => primary_key.clone(),
            };
            let existing = if target.is_empty() {
                None
            } else {
                table.rows.iter().position(|other| same_key(&target, &row, other))
            };

            let Some(index) = existing else {
                table.rows.push(row.clone());
                affected.push(row);
                continue;
            };

            match on_conflict {
                None => {
                    return Err(BackendError::Constraint(format!(
                        "duplicate key value violates unique constraint on `{}` ({})",
                        entity.name,
                        target.join(", ")
                    )));
                }
                Some(OnConflict::DoNothing { .. }) => {}
                Some(OnConflict::DoUpdate { set, filter, .. }) => {
                    let current = &mut table.rows[index];
                    if filter.as_ref().is_none_or(|p| p.matches(current)) {
                        apply_set(entity, current, set)?;
                        affected.push(current.clone());
                    }
                }
            }
        }
        tables.insert(entity.name.clone(), table);
        Ok(affected)
    }
}

fn same_key(columns: &[String], a: &Row, b: &Row) -> bool {
    columns.iter().all(|c| match (a.get(c), b.get(c)) {
        (Some(x), Some(y)) if *x != Value::Null => values_equal(x, y),
        _ => false,
    })
}

fn apply_set(entity: &EntityDescriptor, row: &mut Row, set: &Row) -> Result<(), BackendError> {
    for (column, value) in set {
        let Some(property) = entity.get_property(column) else {
            return Err(BackendError::Other(format!(
                "column `{column}` of relation `{}` does not exist",
                entity.name
            )));
        };
        if *value == Value::Null && !property.nullable {
            return Err(BackendError::Constraint(format!(
                "null value in column `{column}` of relation `{}` violates not-null constraint",
                entity.name
            )));
        }
        row.insert(column.clone(), value.clone());
    }
    Ok(())
}

fn project(row: Row, columns: Option<&[String]>) -> Row {
    match columns {
        None => row,
        Some(columns) => row
            .into_iter()
            .filter(|(k, _)| columns.contains(k))
            .collect(),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn capability(&self) -> BackendCapability {
        self.capability
    }

    fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    async fn find_many(
        &self,
        entity: &EntityDescriptor,
        query: FindMany,
    ) -> Result<Vec<Row>, BackendError> {
        self.record(BackendCall::FindMany {
            entity: entity.name.clone(),
            query: query.clone(),
        });

        let rows = self.select(entity, query.filter.as_ref(), &query.order_by);
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        let rows: Vec<Row> = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(row, query.columns.as_deref()))
            .collect();

        debug!(
            entity = %entity.name,
            filter = ?query.filter.as_ref().map(ToString::to_string),
            rows = rows.len(),
            "find_many"
        );
        Ok(rows)
    }

    async fn find_first(
        &self,
        entity: &EntityDescriptor,
        query: FindFirst,
    ) -> Result<Option<Row>, BackendError> {
        self.record(BackendCall::FindFirst {
            entity: entity.name.clone(),
            query: query.clone(),
        });

        let row = self
            .select(entity, query.filter.as_ref(), &query.order_by)
            .into_iter()
            .nth(query.offset.unwrap_or(0) as usize);

        debug!(entity = %entity.name, found = row.is_some(), "find_first");
        Ok(row)
    }

    async fn count(
        &self,
        entity: &EntityDescriptor,
        filter: Option<Predicate>,
    ) -> Result<u64, BackendError> {
        let count = self.select(entity, filter.as_ref(), &[]).len() as u64;
        self.record(BackendCall::Count {
            entity: entity.name.clone(),
            filter,
        });
        debug!(entity = %entity.name, count, "count");
        Ok(count)
    }

    async fn insert(
        &self,
        entity: &EntityDescriptor,
        request: InsertRequest,
    ) -> Result<MutationOutcome, BackendError> {
        self.record(BackendCall::Insert {
            entity: entity.name.clone(),
            rows: request.values.len(),
        });
        let rows = self.insert_rows(entity, request.values, request.on_conflict.as_ref())?;
        debug!(entity = %entity.name, affected = rows.len(), "insert");
        Ok(self.outcome(rows))
    }

    async fn update(
        &self,
        entity: &EntityDescriptor,
        request: UpdateRequest,
    ) -> Result<MutationOutcome, BackendError> {
        self.record(BackendCall::Update {
            entity: entity.name.clone(),
            filter: request.filter.clone(),
        });

        let matcher = request.filter.as_ref().map(Predicate::matcher);
        let mut tables = self.tables.write();
        let table = tables.entry(entity.name.clone()).or_default();
        let mut changes = Vec::new();
        for (index, row) in table.rows.iter().enumerate() {
            if matcher.as_ref().is_none_or(|m| m.matches(row)) {
                let mut row = row.clone();
                apply_set(entity, &mut row, &request.set)?;
                changes.push((index, row));
            }
        }
        let mut updated = Vec::with_capacity(changes.len());
        for (index, row) in changes {
            table.rows[index] = row.clone();
            updated.push(row);
        }
        drop(tables);

        debug!(entity = %entity.name, affected = updated.len(), "update");
        Ok(self.outcome(updated))
    }

    async fn delete(
        &self,
        entity: &EntityDescriptor,
        filter: Option<Predicate>,
    ) -> Result<MutationOutcome, BackendError> {
        self.record(BackendCall::Delete {
            entity: entity.name.clone(),
            filter: filter.clone(),
        });

        let matcher = filter.as_ref().map(Predicate::matcher);
        let mut tables = self.tables.write();
        let table = tables.entry(entity.name.clone()).or_default();
        let (deleted, kept): (Vec<Row>, Vec<Row>) = std::mem::take(&mut table.rows)
            .into_iter()
            .partition(|row| matcher.as_ref().is_none_or(|m| m.matches(row)));
        table.rows = kept;
        drop(tables);

        debug!(entity = %entity.name, affected = deleted.len(), "delete");
        Ok(self.outcome(deleted))
    }
}
