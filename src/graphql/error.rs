use thiserror::Error;

use crate::db::BackendError;

/// Errors raised while weaving a schema or resolving a request.
///
/// Schema-construction variants (`UnsupportedType`, `TableNotFound`,
/// `RelationNotFound`, `Schema`) abort the weave. The rest surface as
/// field-level GraphQL errors.
#[derive(Debug, Error)]
pub enum WeaveError {
    #[error("Type `{type_name}` of column `{entity}.{property}` is not supported")]
    UnsupportedType {
        entity: String,
        property: String,
        type_name: String,
    },

    #[error(
        "Table `{0}` not found in backend schema. Did you forget to pass schema to the backend constructor?"
    )]
    TableNotFound(String),

    #[error(
        "Relation `{relation}` not found on table `{entity}`. Did you forget to declare it in the schema?"
    )]
    RelationNotFound { entity: String, relation: String },

    #[error("Cannot specify both fields and '{0}' in filters!")]
    ConflictingFilter(String),

    #[error("Unknown column `{column}` on table `{entity}`")]
    UnknownColumn { entity: String, column: String },

    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Error generating schema: {0}")]
    Schema(String),

    #[error("Error resolving request: {0}")]
    Resolver(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type WeaveResult<T> = Result<T, WeaveError>;

pub fn schema_error(msg: impl Into<String>) -> WeaveError {
    WeaveError::Schema(msg.into())
}

pub fn resolver_error(msg: impl Into<String>) -> WeaveError {
    WeaveError::Resolver(msg.into())
}

pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> WeaveError {
    WeaveError::InvalidArgument {
        name: name.into(),
        reason: reason.into(),
    }
}

impl From<async_graphql::dynamic::SchemaError> for WeaveError {
    fn from(value: async_graphql::dynamic::SchemaError) -> Self {
        WeaveError::Schema(value.0)
    }
}
