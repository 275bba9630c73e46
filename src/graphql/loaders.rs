//! DataLoaders for relation fields
//!
//! Relation fields resolve one parent row at a time. Instead of querying the
//! backend per parent, each resolver hands a [`RelationKey`] to the request's
//! [`RelationScope`]; async-graphql's `DataLoader` collects the keys issued
//! in the same tick and [`RelationLoader::load`] answers all of them with one
//! backend query per [`RelationGroup`]:
//!
//! ```text
//! posts(where: ...) { title }   x 3 parents
//!   -> find_many(posts, authorId IN (1, 2, 3) AND <where>)
//! ```
//!
//! Concurrent loads of the same relation that differ in requested columns or
//! arguments (aliases with different `where`s) land in different groups, so
//! they never share a result set.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_graphql::dataloader::{DataLoader, Loader};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::error::WeaveError;
use crate::db::{Backend, FindMany, OrderTerm, Predicate, Row, Value};
use crate::graphql::orm::EntityDescriptor;

/// Separator between serialized key values; a control character that does
/// not occur in rendered GraphQL values.
const KEY_SEPARATOR: char = '\u{1f}';

// ============================================================================
// Keys
// ============================================================================

/// Join-column values of one row, with a string form used for hashing.
/// Values the backend compares as equal (`1` and `1.0`, an enum literal and
/// its string) share a string form.
#[derive(Debug, Clone)]
pub struct KeyTuple {
    key: String,
    pub values: Vec<Value>,
}

impl KeyTuple {
    pub fn new(values: Vec<Value>) -> Self {
        let key = values
            .iter()
            .map(key_text)
            .collect::<Vec<_>>()
            .join(&KEY_SEPARATOR.to_string());
        Self { key, values }
    }

    /// The tuple of `columns` in `row`; `None` when any of them is null or
    /// missing, since NULL never joins.
    pub fn from_row(row: &Row, columns: &[String]) -> Option<Self> {
        let values = columns
            .iter()
            .map(|c| row.get(c).filter(|v| **v != Value::Null).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(Self::new(values))
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

fn key_text(value: &Value) -> String {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (None, Some(u), _) => u.to_string(),
            (None, None, Some(f))
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                (f as i64).to_string()
            }
            _ => n.to_string(),
        },
        Value::Enum(name) => Value::String(name.to_string()).to_string(),
        other => other.to_string(),
    }
}

/// One shape of relation load: target entity, join columns, projection,
/// compiled filter and ordering. Keys with equal fingerprints share a query.
#[derive(Debug)]
pub struct RelationGroup {
    fingerprint: String,
    pub target: Arc<EntityDescriptor>,
    /// Join columns on the target entity.
    pub target_columns: Vec<String>,
    /// Projection sent to the backend.
    pub columns: Vec<String>,
    pub filter: Option<Predicate>,
    pub order_by: Vec<OrderTerm>,
}

impl RelationGroup {
    /// `requested` are the columns the selection asks for and `args` the raw
    /// relation arguments; together they make the group fingerprint.
    pub fn new(
        target: Arc<EntityDescriptor>,
        target_columns: Vec<String>,
        requested: Vec<String>,
        args: &[(&str, Option<&Value>)],
        filter: Option<Predicate>,
        order_by: Vec<OrderTerm>,
    ) -> Self {
        let fingerprint = fingerprint(&target.name, &requested, args);

        let mut columns = requested;
        for column in target.key_columns().into_iter().chain(target_columns.iter().cloned()) {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }

        Self {
            fingerprint,
            target,
            target_columns,
            columns,
            filter,
            order_by,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn fingerprint(entity: &str, requested: &[String], args: &[(&str, Option<&Value>)]) -> String {
    let args: Vec<(&str, Value)> = args
        .iter()
        .map(|(name, value)| (*name, value.cloned().unwrap_or(Value::Null)))
        .collect();
    let json = serde_json::to_string(&(entity, requested, args)).unwrap_or_default();
    format!("{:x}", Sha256::digest(json.as_bytes()))
}

/// A batch key: group fingerprint plus the parent's join tuple.
#[derive(Debug, Clone)]
pub struct RelationKey {
    pub group: Arc<RelationGroup>,
    pub tuple: KeyTuple,
}

impl PartialEq for RelationKey {
    fn eq(&self, other: &Self) -> bool {
        self.group.fingerprint == other.group.fingerprint && self.tuple.key == other.tuple.key
    }
}

impl Eq for RelationKey {}

impl Hash for RelationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group.fingerprint.hash(state);
        self.tuple.key.hash(state);
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Loads related rows for a batch of keys, one backend query per group.
pub struct RelationLoader {
    backend: Arc<dyn Backend>,
}

impl RelationLoader {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl Loader<RelationKey> for RelationLoader {
    type Value = Vec<Row>;
    type Error = Arc<WeaveError>;

    async fn load(
        &self,
        keys: &[RelationKey],
    ) -> Result<HashMap<RelationKey, Self::Value>, Self::Error> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        // Every requested key gets a bucket, empty when nothing matches
        let mut result: HashMap<RelationKey, Vec<Row>> =
            keys.iter().map(|k| (k.clone(), Vec::new())).collect();

        let mut groups: Vec<(Arc<RelationGroup>, Vec<&KeyTuple>)> = Vec::new();
        for key in keys {
            match groups
                .iter_mut()
                .find(|(g, _)| g.fingerprint == key.group.fingerprint)
            {
                Some((_, tuples)) => {
                    if !tuples.iter().any(|t| t.key == key.tuple.key) {
                        tuples.push(&key.tuple);
                    }
                }
                None => groups.push((key.group.clone(), vec![&key.tuple])),
            }
        }

        tracing::debug!(
            entity = %keys[0].group.target.name,
            key_count = keys.len(),
            group_count = groups.len(),
            "Batch loading relation rows"
        );

        for (group, tuples) in groups {
            let membership = Predicate::in_tuples(
                group.target_columns.clone(),
                tuples.iter().map(|t| t.values.clone()).collect(),
            );
            let filter = Predicate::and(
                std::iter::once(membership)
                    .chain(group.filter.clone())
                    .collect(),
            );
            let query = FindMany {
                filter,
                order_by: group.order_by.clone(),
                limit: None,
                offset: None,
                columns: Some(group.columns.clone()),
            };

            let rows = self
                .backend
                .find_many(&group.target, query)
                .await
                .map_err(|e| Arc::new(WeaveError::from(e)))?;
            let total_loaded = rows.len();

            let mut buckets: HashMap<String, Vec<Row>> = HashMap::new();
            for row in rows {
                if let Some(tuple) = KeyTuple::from_row(&row, &group.target_columns) {
                    buckets.entry(tuple.key).or_default().push(row);
                }
            }
            for (key, bucket) in result.iter_mut() {
                if key.group.fingerprint == group.fingerprint {
                    if let Some(rows) = buckets.get(&key.tuple.key) {
                        *bucket = rows.clone();
                    }
                }
            }

            tracing::debug!(
                entity = %group.target.name,
                parents = tuples.len(),
                total_loaded,
                "Batch load complete"
            );
        }

        Ok(result)
    }
}

// ============================================================================
// Request scope
// ============================================================================

/// Relation loaders of one GraphQL request, one per (entity, relation).
/// Created fresh for each execution and dropped with it.
pub struct RelationScope {
    backend: Arc<dyn Backend>,
    loaders: Mutex<HashMap<(String, String), Arc<DataLoader<RelationLoader>>>>,
}

impl RelationScope {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            loaders: Mutex::new(HashMap::new()),
        }
    }

    pub fn loader(&self, entity: &str, relation: &str) -> Arc<DataLoader<RelationLoader>> {
        self.loaders
            .lock()
            .entry((entity.to_string(), relation.to_string()))
            .or_insert_with(|| {
                Arc::new(DataLoader::new(
                    RelationLoader::new(self.backend.clone()),
                    tokio::spawn,
                ))
            })
            .clone()
    }
}
