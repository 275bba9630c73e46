//! Entity and property descriptors.
//!
//! These describe a typed record shape (a table, an ORM entity, a structural
//! schema) independently of any storage engine. Descriptors are read-only once
//! registered in an [`EntityRegistry`](super::EntityRegistry).

use convert_case::{Case, Casing};
use serde::Deserialize;

use crate::db::Value;

/// Semantic kind of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Time,
    Timestamp,
    Json,
    Blob,
    Interval,
    Enum {
        /// Declared enum identifier; derived from entity and property when absent.
        name: Option<String>,
        values: Vec<String>,
    },
    Array(Box<PropertyKind>),
    /// Nested object shaped like another registered entity.
    Object { entity: String },
    /// Opaque type that only a preset type can map.
    Custom(String),
    /// Storage type this crate does not recognise.
    Unsupported(String),
}

impl PropertyKind {
    /// Parse a storage column type name such as `text`, `int4` or `timestamptz`.
    ///
    /// Parameterized names (`varchar(255)`, `numeric(10, 2)`) and array
    /// suffixes (`text[]`) are understood. Anything unknown becomes
    /// [`PropertyKind::Unsupported`] and fails at weave time.
    pub fn from_column_type(column_type: &str) -> Self {
        let normalized = column_type.trim().to_ascii_lowercase();
        if let Some(inner) = normalized.strip_suffix("[]") {
            return PropertyKind::Array(Box::new(Self::from_column_type(inner)));
        }
        let base = normalized
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        match base.as_str() {
            "text" | "varchar" | "char" | "character" | "character varying" | "string"
            | "uuid" | "citext" | "tinytext" | "mediumtext" | "longtext" | "cidr" | "inet" => {
                PropertyKind::String
            }
            "int" | "int2" | "int4" | "int8" | "integer" | "smallint" | "bigint" | "tinyint"
            | "mediumint" | "serial" | "smallserial" | "bigserial" => PropertyKind::Integer,
            "real" | "float" | "float4" | "float8" | "double" | "double precision" | "numeric"
            | "decimal" => PropertyKind::Float,
            "bool" | "boolean" => PropertyKind::Boolean,
            "date" => PropertyKind::Date,
            "time" | "timetz" => PropertyKind::Time,
            "timestamp" | "timestamptz" | "datetime" => PropertyKind::Timestamp,
            "json" | "jsonb" => PropertyKind::Json,
            "blob" | "bytea" | "binary" | "varbinary" => PropertyKind::Blob,
            "interval" => PropertyKind::Interval,
            _ => PropertyKind::Unsupported(column_type.to_string()),
        }
    }

    /// Default storage column type name for this kind; used to share
    /// `<ColumnType>Filters` operator types between entities.
    pub fn default_column_type(&self) -> String {
        match self {
            PropertyKind::String => "text".into(),
            PropertyKind::Integer => "integer".into(),
            PropertyKind::Float => "float".into(),
            PropertyKind::Boolean => "boolean".into(),
            PropertyKind::Date => "date".into(),
            PropertyKind::Time => "time".into(),
            PropertyKind::Timestamp => "timestamp".into(),
            PropertyKind::Json => "json".into(),
            PropertyKind::Blob => "blob".into(),
            PropertyKind::Interval => "interval".into(),
            PropertyKind::Enum { name, .. } => match name {
                Some(name) => name.clone(),
                None => "enum".into(),
            },
            PropertyKind::Array(inner) => format!("{}_array", inner.default_column_type()),
            PropertyKind::Object { entity } => entity.clone(),
            PropertyKind::Custom(name) | PropertyKind::Unsupported(name) => name.clone(),
        }
    }

    /// Whether the kind exposes a column filter (nested objects do not).
    pub fn is_filterable(&self) -> bool {
        match self {
            PropertyKind::Object { .. } => false,
            PropertyKind::Array(inner) => inner.is_filterable(),
            _ => true,
        }
    }

    /// Whether the kind can be used as an ordering key.
    pub fn is_orderable(&self) -> bool {
        !matches!(
            self,
            PropertyKind::Object { .. }
                | PropertyKind::Array(_)
                | PropertyKind::Json
                | PropertyKind::Blob
        )
    }

    /// Innermost element kind for arrays, the kind itself otherwise.
    pub fn leaf(&self) -> &PropertyKind {
        match self {
            PropertyKind::Array(inner) => inner.leaf(),
            other => other,
        }
    }
}

/// One property (column) of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
    /// Storage column type name (e.g. `text`, `PgText`).
    pub column_type: String,
    pub nullable: bool,
    pub has_default: bool,
    pub primary_key: bool,
    /// Value the in-memory backend uses when the column is omitted on insert.
    pub default_value: Option<Value>,
}

impl PropertyDescriptor {
    /// A nullable property without default.
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        let column_type = kind.default_column_type();
        Self {
            name: name.into(),
            kind,
            column_type,
            nullable: true,
            has_default: false,
            primary_key: false,
            default_value: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as backend-defaulted (serial, `DEFAULT now()`, ...).
    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    /// Backend-defaulted with a concrete value the in-memory backend can apply.
    pub fn default_value(mut self, value: Value) -> Self {
        self.has_default = true;
        self.default_value = Some(value);
        self
    }

    /// Primary key columns are never nullable.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn column_type(mut self, column_type: impl Into<String>) -> Self {
        self.column_type = column_type.into();
        self
    }
}

/// Cardinality of a declared relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// A relation from one entity to another over join columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    /// Join columns on the owning entity.
    pub source_columns: Vec<String>,
    /// Join columns on the target entity, positionally paired with `source_columns`.
    pub target_columns: Vec<String>,
}

impl RelationDescriptor {
    pub fn one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, Cardinality::One)
    }

    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, Cardinality::Many)
    }

    fn new(name: impl Into<String>, target: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality,
            source_columns: Vec::new(),
            target_columns: Vec::new(),
        }
    }

    /// Join `source` columns on this entity to `target` columns on the related one.
    pub fn on<S, T>(
        mut self,
        source: impl IntoIterator<Item = S>,
        target: impl IntoIterator<Item = T>,
    ) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        self.source_columns = source.into_iter().map(Into::into).collect();
        self.target_columns = target.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

/// A logical record type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub name: String,
    pub properties: Vec<PropertyDescriptor>,
    pub relations: Vec<RelationDescriptor>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn get_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn get_relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn primary_key(&self) -> Vec<&PropertyDescriptor> {
        self.properties.iter().filter(|p| p.primary_key).collect()
    }

    /// PascalCase form of the entity name, the prefix of every derived type name.
    pub fn pascal_name(&self) -> String {
        pascal(&self.name)
    }

    /// camelCase form used for query field names.
    pub fn camel_name(&self) -> String {
        self.name.to_case(Case::Camel)
    }

    /// `<PascalEntity><suffix>`
    pub fn type_name(&self, suffix: &str) -> String {
        format!("{}{}", self.pascal_name(), suffix)
    }

    /// Columns whose values the relation loader must always project: primary
    /// keys and every relation join column.
    pub fn key_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .properties
            .iter()
            .filter(|p| p.primary_key)
            .map(|p| p.name.clone())
            .collect();
        for relation in &self.relations {
            for column in &relation.source_columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        columns
    }
}

pub fn pascal(name: &str) -> String {
    name.to_case(Case::Pascal)
}

// ============================================================================
// Serde definitions (schema documents)
// ============================================================================

/// JSON form of a property: `{"name": "age", "type": "int4", "nullable": true}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub has_default: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// For `enum` columns.
    #[serde(default)]
    pub enum_name: Option<String>,
    #[serde(default)]
    pub enum_values: Vec<String>,
    /// Element type for `array` columns.
    #[serde(default)]
    pub items: Option<String>,
    /// Target entity for `object` columns.
    #[serde(default)]
    pub entity: Option<String>,
}

fn default_true() -> bool {
    true
}

impl PropertyDef {
    fn kind(&self) -> PropertyKind {
        match self.column_type.to_ascii_lowercase().as_str() {
            "enum" => PropertyKind::Enum {
                name: self.enum_name.clone(),
                values: self.enum_values.clone(),
            },
            "array" => {
                let items = self.items.as_deref().unwrap_or("text");
                PropertyKind::Array(Box::new(PropertyKind::from_column_type(items)))
            }
            "object" => PropertyKind::Object {
                entity: self.entity.clone().unwrap_or_default(),
            },
            "custom" => PropertyKind::Custom(
                self.enum_name
                    .clone()
                    .unwrap_or_else(|| self.name.clone()),
            ),
            _ => PropertyKind::from_column_type(&self.column_type),
        }
    }
}

impl From<PropertyDef> for PropertyDescriptor {
    fn from(def: PropertyDef) -> Self {
        let kind = def.kind();
        let column_type = match &kind {
            PropertyKind::Enum { .. } | PropertyKind::Array(_) | PropertyKind::Object { .. } => {
                kind.default_column_type()
            }
            _ => def.column_type.clone(),
        };
        let default_value = def
            .default
            .and_then(|v| Value::from_json(v).ok());
        PropertyDescriptor {
            name: def.name,
            kind,
            column_type,
            nullable: def.nullable && !def.primary_key,
            has_default: def.has_default || default_value.is_some(),
            primary_key: def.primary_key,
            default_value,
        }
    }
}

/// JSON form of a relation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDef {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub source_columns: Vec<String>,
    pub target_columns: Vec<String>,
}

impl From<RelationDef> for RelationDescriptor {
    fn from(def: RelationDef) -> Self {
        RelationDescriptor {
            name: def.name,
            target: def.target,
            cardinality: def.cardinality,
            source_columns: def.source_columns,
            target_columns: def.target_columns,
        }
    }
}

/// JSON form of an entity.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl From<EntityDef> for EntityDescriptor {
    fn from(def: EntityDef) -> Self {
        EntityDescriptor {
            name: def.name,
            properties: def.properties.into_iter().map(Into::into).collect(),
            relations: def.relations.into_iter().map(Into::into).collect(),
        }
    }
}
