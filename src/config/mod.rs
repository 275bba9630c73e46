//! Configuration: weave options for the library, environment config for the
//! demo server and the JSON schema document both of them can load.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_graphql::dynamic::TypeRef;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::db::{BackendCapability, Row, Value};
use crate::graphql::orm::{
    EntityDef, EntityDescriptor, EntityRegistry, Operation, PropertyDescriptor,
    PropertyVisibility,
};

// ============================================================================
// Weave options
// ============================================================================

/// What to do when a filter object mixes logical keys (`OR`, `AND`, `NOT`)
/// with plain column keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterConflictPolicy {
    /// Fail with "Cannot specify both fields and 'OR' in filters!".
    Reject,
    /// Conjoin the logical part with the column part.
    #[default]
    Combine,
}

impl FilterConflictPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "combine" => Some(Self::Combine),
            _ => None,
        }
    }
}

/// Hook that overrides the GraphQL type of a property. Returning `None`
/// falls back to the built-in mapping.
pub type PresetType =
    Arc<dyn Fn(&EntityDescriptor, &PropertyDescriptor) -> Option<TypeRef> + Send + Sync>;

/// Options for one weave.
#[derive(Clone, Default)]
pub struct WeaveConfig {
    pub conflict_policy: FilterConflictPolicy,
    /// Keyed by entity name.
    pub visibility: HashMap<String, PropertyVisibility>,
    pub preset_type: Option<PresetType>,
}

impl fmt::Debug for WeaveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeaveConfig")
            .field("conflict_policy", &self.conflict_policy)
            .field("visibility", &self.visibility)
            .field("preset_type", &self.preset_type.is_some())
            .finish()
    }
}

impl WeaveConfig {
    pub fn conflict_policy(mut self, policy: FilterConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn visibility(mut self, entity: impl Into<String>, config: PropertyVisibility) -> Self {
        self.visibility.insert(entity.into(), config);
        self
    }

    /// Hook mapping a property to a GraphQL type ahead of the built-in
    /// mapping. Its result is the final field type, non-null wrapping
    /// included; only a per-column custom type from the visibility config
    /// takes precedence. Filter operator types use the unwrapped name.
    pub fn preset_type<F>(mut self, preset: F) -> Self
    where
        F: Fn(&EntityDescriptor, &PropertyDescriptor) -> Option<TypeRef> + Send + Sync + 'static,
    {
        self.preset_type = Some(Arc::new(preset));
        self
    }

    pub fn is_visible(&self, entity: &str, column: &str, op: Operation) -> bool {
        self.visibility
            .get(entity)
            .is_none_or(|v| v.is_visible(column, op))
    }

    pub fn custom_type(&self, entity: &str, column: &str, op: Operation) -> Option<String> {
        self.visibility
            .get(entity)
            .and_then(|v| v.custom_type(column, op))
    }
}

// ============================================================================
// Server configuration
// ============================================================================

/// Demo server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// JSON schema document with entities, visibility and seed rows
    pub schema_path: PathBuf,

    /// Capability preset of the simulated backend family
    pub capability: BackendCapability,

    pub conflict_policy: FilterConflictPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let family = env::var("BACKEND_FAMILY").unwrap_or_else(|_| "postgres".to_string());
        let capability = BackendCapability::from_family(&family)
            .with_context(|| format!("Unknown BACKEND_FAMILY `{family}`"))?;

        let policy = env::var("FILTER_CONFLICT_POLICY").unwrap_or_else(|_| "combine".to_string());
        let conflict_policy = FilterConflictPolicy::parse(&policy)
            .with_context(|| format!("Invalid FILTER_CONFLICT_POLICY `{policy}`"))?;

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            port: env::var("PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .context("Invalid PORT")?,

            schema_path: env::var("SCHEMA_PATH")
                .unwrap_or_else(|_| "./demos/blog.json".to_string())
                .into(),

            capability,
            conflict_policy,
        })
    }
}

// ============================================================================
// Schema document
// ============================================================================

/// A JSON description of entities, visibility overrides and seed rows.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDocument {
    pub entities: Vec<EntityDef>,
    #[serde(default)]
    pub visibility: HashMap<String, PropertyVisibility>,
    /// Rows per entity name.
    #[serde(default)]
    pub seed: IndexMap<String, Vec<serde_json::Map<String, serde_json::Value>>>,
}

impl SchemaDocument {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema document {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid schema document {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn registry(&self) -> EntityRegistry {
        self.entities
            .iter()
            .cloned()
            .map(EntityDescriptor::from)
            .collect()
    }

    /// Seed rows converted to backend values, in document order.
    pub fn seed_rows(&self) -> Result<Vec<(String, Vec<Row>)>> {
        self.seed
            .iter()
            .map(|(entity, rows)| {
                let rows = rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|(k, v)| Ok((k.clone(), Value::from_json(v.clone())?)))
                            .collect::<Result<Row>>()
                    })
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("Invalid seed rows for `{entity}`"))?;
                Ok((entity.clone(), rows))
            })
            .collect()
    }

    /// Weave options carrying this document's visibility overrides.
    pub fn weave_config(&self, conflict_policy: FilterConflictPolicy) -> WeaveConfig {
        WeaveConfig {
            conflict_policy,
            visibility: self.visibility.clone(),
            preset_type: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const DOC: &str = r#"{
        "entities": [
            {
                "name": "users",
                "properties": [
                    {"name": "id", "type": "serial", "primaryKey": true, "hasDefault": true},
                    {"name": "name", "type": "text", "nullable": false},
                    {"name": "password", "type": "text"}
                ]
            }
        ],
        "visibility": {"users": {"password": {"filters": false}}},
        "seed": {"users": [{"id": 1, "name": "Tom"}]}
    }"#;

    #[test]
    fn test_load_schema_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOC.as_bytes()).unwrap();

        let doc = SchemaDocument::load(file.path()).unwrap();
        let registry = doc.registry();
        let users = registry.get("users").unwrap();
        assert_eq!(users.properties.len(), 3);

        let seed = doc.seed_rows().unwrap();
        assert_eq!(seed[0].0, "users");
        assert_eq!(seed[0].1[0]["name"], Value::from("Tom"));

        let config = doc.weave_config(FilterConflictPolicy::Reject);
        assert!(!config.is_visible("users", "password", Operation::Filters));
        assert!(config.is_visible("users", "password", Operation::Insert));
        assert!(config.is_visible("posts", "anything", Operation::Filters));
    }

    #[test]
    fn test_missing_document_has_context() {
        let err = SchemaDocument::load("/nonexistent/schema.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read schema document"));
    }

    #[test]
    fn test_conflict_policy_parse() {
        assert_eq!(FilterConflictPolicy::parse("REJECT"), Some(FilterConflictPolicy::Reject));
        assert_eq!(FilterConflictPolicy::default(), FilterConflictPolicy::Combine);
        assert_eq!(FilterConflictPolicy::parse("merge"), None);
    }
}
