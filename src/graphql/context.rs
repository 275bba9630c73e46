//! Weaver context: the type cache and options of one schema weave.
//!
//! Every named type and argument set is built at most once per context.
//! Names are registered as pending before their builder runs, so a relation
//! cycle (A -> B -> A) resolves to a plain name reference instead of
//! recursing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_graphql::dynamic::{Field, InputValue, Type, TypeRef};
use indexmap::IndexMap;

use super::error::WeaveResult;
use crate::config::WeaveConfig;
use crate::db::BackendCapability;

/// A named, reusable list of field arguments (`UsersSelectArrayArgs`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentSet {
    pub name: String,
    pub arguments: Vec<(String, TypeRef)>,
}

impl ArgumentSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    pub fn argument(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.arguments.push((name.into(), ty));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.arguments.iter().map(|(name, _)| name.as_str())
    }

    /// Spread the arguments onto `field`.
    pub fn apply(&self, mut field: Field) -> Field {
        for (name, ty) in &self.arguments {
            field = field.argument(InputValue::new(name.clone(), ty.clone()));
        }
        field
    }
}

pub struct WeaverContext {
    config: WeaveConfig,
    capability: BackendCapability,
    types: IndexMap<String, Type>,
    pending: HashSet<String>,
    args: HashMap<String, Arc<ArgumentSet>>,
}

impl WeaverContext {
    pub fn new(config: WeaveConfig, capability: BackendCapability) -> Self {
        Self {
            config,
            capability,
            types: IndexMap::new(),
            pending: HashSet::new(),
            args: HashMap::new(),
        }
    }

    pub fn config(&self) -> &WeaveConfig {
        &self.config
    }

    pub fn capability(&self) -> BackendCapability {
        self.capability
    }

    pub fn get_named_type(&self, name: &str) -> Option<&Type> {
        self.types.get(name)
    }

    /// Whether `name` is built or currently being built.
    pub fn is_known(&self, name: &str) -> bool {
        self.types.contains_key(name) || self.pending.contains(name)
    }

    /// Store `ty` under `name` unless something is already stored there.
    pub fn memo_named_type(&mut self, name: impl Into<String>, ty: impl Into<Type>) -> TypeRef {
        let name = name.into();
        if !self.types.contains_key(&name) {
            self.types.insert(name.clone(), ty.into());
        }
        TypeRef::named(name)
    }

    /// Build the type named `name` once. Requests for a name that is built or
    /// pending return a reference without calling `build`.
    pub fn memo_with<T, F>(&mut self, name: impl Into<String>, build: F) -> WeaveResult<TypeRef>
    where
        T: Into<Type>,
        F: FnOnce(&mut Self) -> WeaveResult<T>,
    {
        let name = name.into();
        if self.is_known(&name) {
            return Ok(TypeRef::named(name));
        }

        self.pending.insert(name.clone());
        let built = build(self);
        self.pending.remove(&name);

        let ty = built?;
        tracing::trace!(type_name = %name, "Registered type");
        Ok(self.memo_named_type(name, ty))
    }

    /// Build the argument set named `name` once; later calls return the same `Arc`.
    pub fn memo_args<F>(&mut self, name: impl Into<String>, build: F) -> WeaveResult<Arc<ArgumentSet>>
    where
        F: FnOnce(&mut Self) -> WeaveResult<ArgumentSet>,
    {
        let name = name.into();
        if let Some(existing) = self.args.get(&name) {
            return Ok(existing.clone());
        }
        let set = Arc::new(build(self)?);
        self.args.insert(name, set.clone());
        Ok(set)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Hand the built types over to the schema builder.
    pub fn into_types(self) -> impl Iterator<Item = Type> {
        self.types.into_values()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use async_graphql::dynamic::{Enum, InputObject};

    use super::*;
    use crate::graphql::error::schema_error;

    fn context() -> WeaverContext {
        WeaverContext::new(WeaveConfig::default(), BackendCapability::default())
    }

    #[test]
    fn test_memo_with_builds_once() {
        let mut ctx = context();
        let calls = Cell::new(0);
        for _ in 0..3 {
            let ty = ctx
                .memo_with("OrderDirection", |_| {
                    calls.set(calls.get() + 1);
                    Ok(Enum::new("OrderDirection").item("asc").item("desc"))
                })
                .unwrap();
            assert_eq!(ty.to_string(), "OrderDirection");
        }
        assert_eq!(calls.get(), 1);
        assert!(ctx.get_named_type("OrderDirection").is_some());
    }

    #[test]
    fn test_reentrant_build_returns_reference() {
        let mut ctx = context();
        let ty = ctx
            .memo_with("UsersFilters", |ctx| {
                // a self reference while building resolves to the pending name
                let inner = ctx.memo_with("UsersFilters", |_| -> WeaveResult<InputObject> {
                    Err(schema_error("built twice"))
                })?;
                Ok(InputObject::new("UsersFilters").field(InputValue::new("NOT", inner)))
            })
            .unwrap();
        assert_eq!(ty.to_string(), "UsersFilters");
        assert_eq!(ctx.type_names().collect::<Vec<_>>(), vec!["UsersFilters"]);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let mut ctx = context();
        let result = ctx.memo_with("Broken", |_| -> WeaveResult<Enum> {
            Err(schema_error("nope"))
        });
        assert!(result.is_err());
        assert!(!ctx.is_known("Broken"));
    }

    #[test]
    fn test_memo_args_shares_arc() {
        let mut ctx = context();
        let build = |_: &mut WeaverContext| {
            Ok(ArgumentSet::new("UsersCountArgs").argument("where", TypeRef::named("UsersFilters")))
        };
        let a = ctx.memo_args("UsersCountArgs", build).unwrap();
        let b = ctx.memo_args("UsersCountArgs", build).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.names().collect::<Vec<_>>(), vec!["where"]);
    }
}
