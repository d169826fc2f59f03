//! Collection definitions and the name registry
//!
//! A [`CollectionDefinition`] carries what one collection variant declares
//! statically: the rule set its documents are validated against and its
//! index table. The [`CollectionRegistry`] resolves `(database, collection)`
//! to a definition when a collection is first acquired.

use crate::index::IndexDeclaration;
use mnemosyne_validation::RuleSet;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CollectionDefinition {
    pub rules: RuleSet,
    pub indexes: Vec<IndexDeclaration>,
}

impl CollectionDefinition {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexDeclaration) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Builds a definition for a resolved collection name
pub type DefinitionFactory = Arc<dyn Fn(&str) -> CollectionDefinition + Send + Sync>;

/// Maps collection names to definitions.
///
/// Resolution order: exact `(database, collection)` entry, then the
/// database's fallback factory, then the global default (no rules, no
/// indexes).
#[derive(Clone, Default)]
pub struct CollectionRegistry {
    entries: HashMap<(String, String), DefinitionFactory>,
    fallbacks: HashMap<String, DefinitionFactory>,
    default: Option<DefinitionFactory>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixed definition for one collection
    pub fn register(
        &mut self,
        database: &str,
        collection: &str,
        definition: CollectionDefinition,
    ) -> &mut Self {
        self.register_factory(database, collection, move |_| definition.clone())
    }

    pub fn register_factory<F>(&mut self, database: &str, collection: &str, factory: F) -> &mut Self
    where
        F: Fn(&str) -> CollectionDefinition + Send + Sync + 'static,
    {
        self.entries.insert(
            (database.to_string(), collection.to_string()),
            Arc::new(factory),
        );
        self
    }

    /// Factory for every unregistered collection of one database
    pub fn set_database_fallback<F>(&mut self, database: &str, factory: F) -> &mut Self
    where
        F: Fn(&str) -> CollectionDefinition + Send + Sync + 'static,
    {
        self.fallbacks.insert(database.to_string(), Arc::new(factory));
        self
    }

    /// Factory used when nothing else matches
    pub fn set_default<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&str) -> CollectionDefinition + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(factory));
        self
    }

    pub fn resolve(&self, database: &str, collection: &str) -> CollectionDefinition {
        let key = (database.to_string(), collection.to_string());
        let factory = self
            .entries
            .get(&key)
            .or_else(|| self.fallbacks.get(database))
            .or(self.default.as_ref());
        match factory {
            Some(factory) => factory(collection),
            None => CollectionDefinition::default(),
        }
    }

    pub fn is_registered(&self, database: &str, collection: &str) -> bool {
        self.entries
            .contains_key(&(database.to_string(), collection.to_string()))
    }
}

impl fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionRegistry")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("fallbacks", &self.fallbacks.keys().collect::<Vec<_>>())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use mnemosyne_validation::Rule;

    #[test]
    fn test_resolution_order() {
        let mut registry = CollectionRegistry::new();
        registry
            .register(
                "shop",
                "orders",
                CollectionDefinition::new(RuleSet::new(vec![Rule::required(["total"])])),
            )
            .set_database_fallback("shop", |_| {
                CollectionDefinition::default().with_index(IndexDeclaration::new(doc! { "x": 1 }))
            })
            .set_default(|name| {
                CollectionDefinition::new(RuleSet::new(vec![Rule::required([name])]))
            });

        assert_eq!(registry.resolve("shop", "orders").rules.rules().len(), 1);
        assert_eq!(registry.resolve("shop", "carts").indexes.len(), 1);

        let other = registry.resolve("crm", "leads");
        assert_eq!(other.rules.rules()[0].fields, vec!["leads".to_string()]);
    }

    #[test]
    fn test_empty_registry_yields_plain_definition() {
        let definition = CollectionRegistry::new().resolve("a", "b");
        assert!(definition.rules.is_empty());
        assert!(definition.indexes.is_empty());
    }
}
