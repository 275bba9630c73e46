//! Backend interface consumed by the resolver factory.
//!
//! The storage engine is an external collaborator: it receives compiled
//! [`Predicate`]s, ordering terms and raw value rows, and answers with rows.
//! [`memory::MemoryBackend`] is the in-process reference implementation.

pub mod memory;
pub mod predicate;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;

use crate::graphql::orm::{EntityDescriptor, EntityRegistry};

pub use memory::{BackendCall, MemoryBackend};
pub use predicate::{CompareOp, Matcher, OrderDirection, OrderTerm, Predicate};

/// A backend value. Rows use GraphQL constant values so resolvers can hand
/// them to async-graphql without another conversion layer.
pub type Value = async_graphql::Value;

/// One record, keyed by column name in declaration order.
pub type Row = IndexMap<String, Value>;

/// Errors reported by a backend. They reach GraphQL clients unmodified.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Record not found in `{0}`")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Backend error: {0}")]
    Other(String),
}

/// Shape of the conflict clause a backend family accepts on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictClauseShape {
    /// No conflict handling; duplicate keys are errors.
    None,
    /// `ON CONFLICT (target) DO NOTHING | DO UPDATE SET .. WHERE ..`
    /// (Postgres and SQLite families).
    Targeted,
    /// `ON DUPLICATE KEY UPDATE ..` (MySQL family).
    DuplicateKeyUpdate,
}

/// What a backend family can do, passed into the generic resolver factory
/// instead of specializing the factory per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapability {
    /// Mutations can return the affected rows (`RETURNING`). Otherwise they
    /// answer with a success flag only.
    pub supports_returning: bool,
    pub conflict_clause: ConflictClauseShape,
}

impl BackendCapability {
    pub const POSTGRES: Self = Self {
        supports_returning: true,
        conflict_clause: ConflictClauseShape::Targeted,
    };

    pub const SQLITE: Self = Self {
        supports_returning: true,
        conflict_clause: ConflictClauseShape::Targeted,
    };

    pub const MYSQL: Self = Self {
        supports_returning: false,
        conflict_clause: ConflictClauseShape::DuplicateKeyUpdate,
    };

    /// Parse a backend family name (`postgres`, `mysql`, `sqlite`).
    pub fn from_family(family: &str) -> Option<Self> {
        match family.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(Self::POSTGRES),
            "mysql" | "mariadb" => Some(Self::MYSQL),
            "sqlite" | "libsql" => Some(Self::SQLITE),
            _ => None,
        }
    }
}

impl Default for BackendCapability {
    fn default() -> Self {
        Self::POSTGRES
    }
}

/// Options for a many-row read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindMany {
    pub filter: Option<Predicate>,
    pub order_by: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Column projection. `None` selects every column.
    pub columns: Option<Vec<String>>,
}

/// Options for a single-row read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindFirst {
    pub filter: Option<Predicate>,
    pub order_by: Vec<OrderTerm>,
    pub offset: Option<u64>,
}

/// Insert-time directive for uniqueness conflicts.
#[derive(Debug, Clone, PartialEq)]
pub enum OnConflict {
    DoNothing {
        /// Conflict target columns; empty means the primary key.
        target: Vec<String>,
    },
    DoUpdate {
        target: Vec<String>,
        set: Row,
        /// Only rows matching this predicate are updated.
        filter: Option<Predicate>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertRequest {
    pub values: Vec<Row>,
    pub on_conflict: Option<OnConflict>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub filter: Option<Predicate>,
    pub set: Row,
}

/// Result of a mutation; which variant a backend produces follows its
/// [`BackendCapability::supports_returning`].
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Success,
    Rows(Vec<Row>),
}

impl MutationOutcome {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            MutationOutcome::Success => Vec::new(),
            MutationOutcome::Rows(rows) => rows,
        }
    }
}

/// The data-store collaborator.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn capability(&self) -> BackendCapability;

    /// Registered schema used to resolve entities and relations.
    fn registry(&self) -> &EntityRegistry;

    async fn find_many(
        &self,
        entity: &EntityDescriptor,
        query: FindMany,
    ) -> Result<Vec<Row>, BackendError>;

    async fn find_first(
        &self,
        entity: &EntityDescriptor,
        query: FindFirst,
    ) -> Result<Option<Row>, BackendError>;

    async fn count(
        &self,
        entity: &EntityDescriptor,
        filter: Option<Predicate>,
    ) -> Result<u64, BackendError>;

    async fn insert(
        &self,
        entity: &EntityDescriptor,
        request: InsertRequest,
    ) -> Result<MutationOutcome, BackendError>;

    async fn update(
        &self,
        entity: &EntityDescriptor,
        request: UpdateRequest,
    ) -> Result<MutationOutcome, BackendError>;

    async fn delete(
        &self,
        entity: &EntityDescriptor,
        filter: Option<Predicate>,
    ) -> Result<MutationOutcome, BackendError>;
}
