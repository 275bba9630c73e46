//! Schema weaving
//!
//! [`Weaver`] walks the backend's registry (or a chosen subset of it), asks a
//! [`ResolverFactory`] per entity for its query and mutation fields and
//! registers every type cached in the [`WeaverContext`] on one dynamic
//! schema. `Mutation` is only added when some entity is writable.

use std::sync::Arc;

use async_graphql::dynamic::{Object, Schema};
use async_graphql::{Request, Response};
use tracing::{debug, info};

use super::context::WeaverContext;
use super::error::WeaveResult;
use super::loaders::RelationScope;
use super::resolvers::ResolverFactory;
use crate::config::WeaveConfig;
use crate::db::Backend;

pub const QUERY: &str = "Query";
pub const MUTATION: &str = "Mutation";

pub struct Weaver {
    backend: Arc<dyn Backend>,
    config: WeaveConfig,
    only: Option<Vec<String>>,
}

impl Weaver {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            config: WeaveConfig::default(),
            only: None,
        }
    }

    pub fn with_config(mut self, config: WeaveConfig) -> Self {
        self.config = config;
        self
    }

    /// Restrict the schema to `entities`, in the given order.
    pub fn only<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(entities.into_iter().map(Into::into).collect());
        self
    }

    pub fn weave(self) -> WeaveResult<WovenSchema> {
        let mut ctx = WeaverContext::new(self.config, self.backend.capability());
        let entities = match self.only {
            Some(names) => names,
            None => self.backend.registry().names().map(String::from).collect(),
        };

        let mut query = Object::new(QUERY);
        let mut mutation = Object::new(MUTATION);
        let mut mutation_count = 0;
        for name in &entities {
            let factory = ResolverFactory::new(self.backend.clone(), name)?;
            for field in factory.queries(&mut ctx)? {
                query = query.field(field);
            }
            for field in factory.mutations(&mut ctx)? {
                mutation = mutation.field(field);
                mutation_count += 1;
            }
            debug!(entity = %name, "Wove entity");
        }

        let type_count = ctx.type_names().count();
        let mut builder = Schema::build(
            QUERY,
            (mutation_count > 0).then_some(MUTATION),
            None,
        )
        .register(query);
        if mutation_count > 0 {
            builder = builder.register(mutation);
        }
        for ty in ctx.into_types() {
            builder = builder.register(ty);
        }
        let schema = builder.finish()?;

        info!(
            entities = entities.len(),
            types = type_count,
            mutations = mutation_count,
            "GraphQL schema woven"
        );

        Ok(WovenSchema {
            schema,
            backend: self.backend,
        })
    }
}

/// A built schema plus the backend its resolvers call.
#[derive(Clone)]
pub struct WovenSchema {
    schema: Schema,
    backend: Arc<dyn Backend>,
}

impl WovenSchema {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn sdl(&self) -> String {
        self.schema.sdl()
    }

    /// Execute `request` with a fresh [`RelationScope`], so relation batches
    /// never leak between requests.
    pub async fn execute(&self, request: impl Into<Request>) -> Response {
        let scope = Arc::new(RelationScope::new(self.backend.clone()));
        self.schema.execute(request.into().data(scope)).await
    }
}
