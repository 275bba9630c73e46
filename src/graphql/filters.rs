//! Compiles `where` / `orderBy` / pagination arguments into backend terms.
//!
//! Filter objects look like
//!
//! ```graphql
//! { name: { like: "T%" }, OR: [{ age: { gt: 40 } }, { age: { isNull: true } }] }
//! ```
//!
//! Compilation is pure: an absent or empty object yields no predicate (the
//! caller omits the condition), never an always-true sentinel.

use async_graphql::Name;
use indexmap::IndexMap;
use tracing::{trace, warn};

use super::error::{WeaveError, WeaveResult, invalid_argument};
use super::inputs::LIKE_OPERATORS;
use crate::config::FilterConflictPolicy;
use crate::db::{CompareOp, OrderDirection, OrderTerm, Predicate, Value};
use crate::graphql::orm::{EntityDescriptor, PropertyDescriptor, PropertyKind};

const LOGICAL_KEYS: [&str; 3] = ["OR", "AND", "NOT"];

pub struct FilterCompiler<'a> {
    entity: &'a EntityDescriptor,
    policy: FilterConflictPolicy,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(entity: &'a EntityDescriptor, policy: FilterConflictPolicy) -> Self {
        Self { entity, policy }
    }

    /// Compile a `<E>Filters` value.
    pub fn compile(&self, node: Option<&Value>) -> WeaveResult<Option<Predicate>> {
        let predicate = match node {
            None | Some(Value::Null) => None,
            Some(Value::Object(fields)) => self.compile_node(fields)?,
            Some(other) => {
                return Err(invalid_argument(
                    "where",
                    format!("expected an object, found {other}"),
                ));
            }
        };
        if let Some(predicate) = &predicate {
            trace!(entity = %self.entity.name, predicate = %predicate, "Compiled filter");
        }
        Ok(predicate)
    }

    fn compile_node(&self, fields: &IndexMap<Name, Value>) -> WeaveResult<Option<Predicate>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let (logical, columns): (Vec<_>, Vec<_>) = fields
            .iter()
            .partition(|(key, _)| LOGICAL_KEYS.contains(&key.as_str()));

        if !logical.is_empty() && !columns.is_empty() && self.policy == FilterConflictPolicy::Reject
        {
            let key = logical[0].0.to_string();
            return Err(WeaveError::ConflictingFilter(key));
        }

        let mut parts = Vec::new();
        for (key, value) in logical {
            let part = match key.as_str() {
                "OR" => Predicate::or(self.compile_children(value)?),
                "AND" => Predicate::and(self.compile_children(value)?),
                _ => self.compile(Some(value))?.map(Predicate::negate),
            };
            parts.extend(part);
        }

        for (key, ops) in columns {
            let property = self.entity.get_property(key.as_str()).ok_or_else(|| {
                WeaveError::UnknownColumn {
                    entity: self.entity.name.clone(),
                    column: key.to_string(),
                }
            })?;
            parts.extend(self.compile_column(property, ops)?);
        }

        Ok(Predicate::and(parts))
    }

    fn compile_children(&self, value: &Value) -> WeaveResult<Vec<Predicate>> {
        let mut children = Vec::new();
        for child in as_list(value) {
            children.extend(self.compile(Some(child))?);
        }
        Ok(children)
    }

    /// Compile one column's operator map. Every present operator contributes a
    /// conjunct; column-level `OR` items are disjoined.
    fn compile_column(
        &self,
        property: &PropertyDescriptor,
        ops: &Value,
    ) -> WeaveResult<Option<Predicate>> {
        let ops = match ops {
            Value::Null => return Ok(None),
            Value::Object(ops) => ops,
            other => {
                return Err(invalid_argument(
                    &property.name,
                    format!("expected an operator object, found {other}"),
                ));
            }
        };

        let column = property.name.as_str();
        let mut parts = Vec::new();
        for (op, value) in ops {
            // null and false operands contribute nothing, which makes
            // `isNull: false` a no-op rather than IS NOT NULL
            if matches!(value, Value::Null | Value::Boolean(false)) {
                continue;
            }

            let op = op.as_str();
            let fragment = match op {
                "eq" => Predicate::compare(column, CompareOp::Eq, normalize(value)),
                "ne" => Predicate::compare(column, CompareOp::Ne, normalize(value)),
                "lt" => Predicate::compare(column, CompareOp::Lt, normalize(value)),
                "lte" => Predicate::compare(column, CompareOp::Lte, normalize(value)),
                "gt" => Predicate::compare(column, CompareOp::Gt, normalize(value)),
                "gte" => Predicate::compare(column, CompareOp::Gte, normalize(value)),
                _ if LIKE_OPERATORS.contains(&op) => {
                    if property.kind != PropertyKind::String {
                        warn!(
                            entity = %self.entity.name,
                            column,
                            operator = op,
                            "Ignoring string operator on non-string column"
                        );
                        continue;
                    }
                    let Value::String(pattern) = value else {
                        return Err(invalid_argument(column, format!("`{op}` expects a string")));
                    };
                    Predicate::Like {
                        column: column.to_string(),
                        pattern: pattern.clone(),
                        case_insensitive: matches!(op, "ilike" | "notIlike"),
                        negated: op.starts_with("not"),
                    }
                }
                "inArray" | "notInArray" => Predicate::InArray {
                    column: column.to_string(),
                    values: as_list(value).map(normalize).collect(),
                    negated: op == "notInArray",
                },
                "isNull" | "isNotNull" => {
                    if *value != Value::Boolean(true) {
                        continue;
                    }
                    Predicate::IsNull {
                        column: column.to_string(),
                        negated: op == "isNotNull",
                    }
                }
                "OR" => {
                    let mut children = Vec::new();
                    for item in as_list(value) {
                        children.extend(self.compile_column(property, item)?);
                    }
                    match Predicate::or(children) {
                        Some(p) => p,
                        None => continue,
                    }
                }
                _ => {
                    trace!(column, operator = op, "Skipping unknown operator");
                    continue;
                }
            };
            parts.push(fragment);
        }

        Ok(Predicate::and(parts))
    }

    /// Compile `orderBy`: a list of `<E>OrderBy` objects or a single one.
    /// Unknown columns and null directions are skipped.
    pub fn compile_order_by(&self, value: Option<&Value>) -> Vec<OrderTerm> {
        let Some(value) = value else {
            return Vec::new();
        };
        let mut terms = Vec::new();
        for item in as_list(value) {
            let Value::Object(fields) = item else {
                continue;
            };
            for (column, direction) in fields {
                let direction = match direction {
                    Value::Enum(name) => OrderDirection::parse(name.as_str()),
                    Value::String(s) => OrderDirection::parse(s),
                    _ => None,
                };
                let Some(direction) = direction else {
                    continue;
                };
                if self.entity.get_property(column.as_str()).is_none() {
                    trace!(entity = %self.entity.name, column = %column, "Skipping unknown order column");
                    continue;
                }
                terms.push(OrderTerm::new(column.as_str(), direction));
            }
        }
        terms
    }
}

/// Validate `limit` / `offset`; negative values are rejected.
pub fn compile_pagination(
    limit: Option<&Value>,
    offset: Option<&Value>,
) -> WeaveResult<(Option<u64>, Option<u64>)> {
    Ok((non_negative("limit", limit)?, non_negative("offset", offset)?))
}

fn non_negative(name: &str, value: Option<&Value>) -> WeaveResult<Option<u64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) if v >= 0 => Ok(Some(v as u64)),
            _ => Err(invalid_argument(name, "must be a non-negative integer")),
        },
        Some(other) => Err(invalid_argument(name, format!("expected an integer, found {other}"))),
    }
}

/// Iterate a list value; a lone value is a one-element list.
fn as_list(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::List(items) => Box::new(items.iter()),
        Value::Null => Box::new(std::iter::empty()),
        other => Box::new(std::iter::once(other)),
    }
}

/// Enum literals compare as their string names.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Enum(name) => Value::String(name.to_string()),
        Value::List(items) => Value::List(items.iter().map(normalize).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
