//! Per-column visibility for filters and input types.
//!
//! Deserializes from the same JSON shape callers write by hand:
//!
//! ```json
//! { "*": false, "email": true, "password": { "filters": false, "create": true } }
//! ```

use indexmap::IndexMap;
use serde::Deserialize;

const WILDCARD: &str = "*";

/// The generated surface a column can appear on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Filters,
    Insert,
    /// Alias of [`Operation::Insert`].
    Create,
    Update,
}

/// Setting for one operation: a flag or a custom GraphQL type name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OpSetting {
    Flag(bool),
    Custom {
        #[serde(rename = "type")]
        type_name: String,
    },
}

impl OpSetting {
    /// A custom type always implies visible.
    fn visible(&self) -> bool {
        match self {
            OpSetting::Flag(flag) => *flag,
            OpSetting::Custom { .. } => true,
        }
    }
}

/// Per-operation settings for one column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OperationSettings {
    #[serde(default)]
    pub filters: Option<OpSetting>,
    #[serde(default)]
    pub insert: Option<OpSetting>,
    #[serde(default)]
    pub create: Option<OpSetting>,
    #[serde(default)]
    pub update: Option<OpSetting>,
}

impl OperationSettings {
    fn get(&self, op: Operation) -> Option<&OpSetting> {
        match op {
            Operation::Filters => self.filters.as_ref(),
            Operation::Insert | Operation::Create => {
                self.insert.as_ref().or(self.create.as_ref())
            }
            Operation::Update => self.update.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ColumnVisibility {
    All(bool),
    PerOperation(OperationSettings),
}

/// Visibility config for one entity, keyed by column name or `"*"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct PropertyVisibility {
    columns: IndexMap<String, ColumnVisibility>,
}

/// Outcome of resolving a column for an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Visible,
    /// Visible with a caller-supplied GraphQL type name.
    CustomType(String),
}

impl PropertyVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<String>, visibility: ColumnVisibility) -> Self {
        self.columns.insert(name.into(), visibility);
        self
    }

    pub fn is_visible(&self, column: &str, op: Operation) -> bool {
        self.resolve(column, op) != Visibility::Hidden
    }

    /// First definitive answer wins: exact column flag, exact column
    /// per-operation setting, then the wildcard. Visible when nothing matches.
    pub fn resolve(&self, column: &str, op: Operation) -> Visibility {
        if let Some(found) = self.columns.get(column).and_then(|c| Self::lookup(c, op)) {
            return found;
        }
        self.columns
            .get(WILDCARD)
            .and_then(|c| Self::lookup(c, op))
            .unwrap_or(Visibility::Visible)
    }

    fn lookup(setting: &ColumnVisibility, op: Operation) -> Option<Visibility> {
        match setting {
            ColumnVisibility::All(true) => Some(Visibility::Visible),
            ColumnVisibility::All(false) => Some(Visibility::Hidden),
            ColumnVisibility::PerOperation(ops) => ops.get(op).map(|s| match s {
                OpSetting::Custom { type_name } => Visibility::CustomType(type_name.clone()),
                other if other.visible() => Visibility::Visible,
                _ => Visibility::Hidden,
            }),
        }
    }

    /// Custom type override for a column and operation, if any.
    pub fn custom_type(&self, column: &str, op: Operation) -> Option<String> {
        match self.resolve(column, op) {
            Visibility::CustomType(name) => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> PropertyVisibility {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_wildcard_with_exact_override() {
        let vis = parse(r#"{"*": false, "email": true}"#);
        assert!(vis.is_visible("email", Operation::Filters));
        assert!(vis.is_visible("email", Operation::Update));
        assert!(!vis.is_visible("name", Operation::Filters));
        assert!(!vis.is_visible("age", Operation::Insert));
    }

    #[test]
    fn test_per_operation_flags() {
        let vis = parse(r#"{"password": {"filters": false, "create": true}}"#);
        assert!(!vis.is_visible("password", Operation::Filters));
        assert!(vis.is_visible("password", Operation::Create));
        // insert and create are the same operation
        assert!(vis.is_visible("password", Operation::Insert));
        assert!(vis.is_visible("password", Operation::Update));
        assert!(vis.is_visible("name", Operation::Filters));
    }

    #[test]
    fn test_custom_type_implies_visible() {
        let vis = parse(r#"{"*": false, "meta": {"insert": {"type": "JSON"}}}"#);
        assert_eq!(
            vis.resolve("meta", Operation::Create),
            Visibility::CustomType("JSON".into())
        );
        assert_eq!(vis.custom_type("meta", Operation::Insert).as_deref(), Some("JSON"));
        // no setting for update on the column, falls through to the wildcard
        assert!(!vis.is_visible("meta", Operation::Update));
    }

    #[test]
    fn test_wildcard_per_operation_default() {
        let vis = parse(r#"{"*": {"filters": false}}"#);
        assert!(!vis.is_visible("name", Operation::Filters));
        assert!(vis.is_visible("name", Operation::Insert));
    }

    #[test]
    fn test_empty_config_is_visible() {
        let vis = PropertyVisibility::new();
        assert!(vis.is_visible("anything", Operation::Filters));
    }
}
