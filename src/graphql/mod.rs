//! Schema weaving
//!
//! Turns the entities registered with a [`Backend`](crate::db::Backend) into
//! a dynamic GraphQL schema with filtered, ordered and paginated queries,
//! CRUD mutations and batched relation fields.
//!
//! ```rust,ignore
//! let schema = Weaver::new(backend).with_config(config).weave()?;
//! let response = schema.execute("{ users(limit: 2) { name } }").await;
//! ```

pub mod context;
pub mod error;
pub mod filters;
pub mod inputs;
pub mod loaders;
pub mod orm;
pub mod resolvers;
pub mod schema;
pub mod service;
pub mod types;

pub use context::{ArgumentSet, WeaverContext};
pub use error::{WeaveError, WeaveResult};
pub use filters::FilterCompiler;
pub use inputs::InputFactory;
pub use loaders::{RelationLoader, RelationScope};
pub use resolvers::ResolverFactory;
pub use schema::{Weaver, WovenSchema};
pub use service::router;
pub use types::{TypeMapper, TypeUsage};
