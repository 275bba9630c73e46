//! The set of entities a backend was constructed with.

use std::sync::Arc;

use indexmap::IndexMap;

use super::entity::EntityDescriptor;
use crate::graphql::error::{WeaveError, WeaveResult};

/// Ordered map of entity name to descriptor.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: IndexMap<String, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity, replacing any previous one with the same name.
    pub fn register(&mut self, entity: EntityDescriptor) -> &mut Self {
        self.entities
            .insert(entity.name.clone(), Arc::new(entity));
        self
    }

    pub fn with(mut self, entity: EntityDescriptor) -> Self {
        self.register(entity);
        self
    }

    /// Look up an entity; missing names are schema errors.
    pub fn get(&self, name: &str) -> WeaveResult<Arc<EntityDescriptor>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| WeaveError::TableNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl FromIterator<EntityDescriptor> for EntityRegistry {
    fn from_iter<I: IntoIterator<Item = EntityDescriptor>>(iter: I) -> Self {
        let mut registry = EntityRegistry::new();
        for entity in iter {
            registry.register(entity);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_missing_entity_is_table_not_found() {
        let registry: EntityRegistry = [EntityDescriptor::new("users")].into_iter().collect();
        assert!(registry.get("users").is_ok());
        let err = registry.get("customers").unwrap_err();
        assert_matches!(&err, WeaveError::TableNotFound(name) if name == "customers");
        assert_eq!(
            err.to_string(),
            "Table `customers` not found in backend schema. Did you forget to pass schema to the backend constructor?"
        );
    }

    #[test]
    fn test_registration_order_is_kept() {
        let registry = EntityRegistry::new()
            .with(EntityDescriptor::new("posts"))
            .with(EntityDescriptor::new("users"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["posts", "users"]);
    }
}
