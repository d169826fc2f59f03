//! Client: driver handle, configuration and database selection

use crate::collection::Collection;
use crate::config::ClientConfig;
use crate::connection::{MongoDriver, PoolConfig};
use crate::database::Database;
use crate::driver::Driver;
use crate::memory::MemoryDriver;
use crate::registry::CollectionRegistry;
use dashmap::DashMap;
use mnemosyne_common::{MnemosyneError, Result};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Entry point. Owns the driver and hands out cached [`Database`] handles.
pub struct Client {
    driver: Arc<dyn Driver>,
    config: Arc<ClientConfig>,
    registry: Arc<CollectionRegistry>,
    databases: DashMap<String, Database>,
    current: RwLock<Option<String>>,
}

impl Client {
    pub fn new(driver: Arc<dyn Driver>, config: ClientConfig) -> Self {
        Self {
            driver,
            config: Arc::new(config),
            registry: Arc::new(CollectionRegistry::default()),
            databases: DashMap::new(),
            current: RwLock::new(None),
        }
    }

    /// Client over a fresh in-process store
    pub fn in_memory(config: ClientConfig) -> Self {
        Self::new(Arc::new(MemoryDriver::new()), config)
    }

    /// Connect to a MongoDB deployment.
    ///
    /// When the connection string names a default database it becomes the
    /// current database.
    pub async fn connect(uri: &str, pool: PoolConfig, config: ClientConfig) -> Result<Self> {
        let driver = MongoDriver::connect(uri, pool).await?;
        let default_database = driver.default_database().map(str::to_string);
        let client = Self::new(Arc::new(driver), config);
        if let Some(name) = default_database {
            client.use_database(&name)?;
        }
        info!(uri_has_database = client.current_database().is_some(), "Client connected");
        Ok(client)
    }

    /// Replace the collection registry.
    ///
    /// Only databases acquired afterwards see the new registry.
    pub fn with_registry(mut self, registry: CollectionRegistry) -> Self {
        self.registry = Arc::new(registry);
        self.databases.clear();
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Select the current database
    pub fn use_database(&self, name: &str) -> Result<Database> {
        let database = self.get_database(name)?;
        *self.current.write() = Some(name.to_string());
        Ok(database)
    }

    pub fn current_database(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// Cached database handle
    pub fn get_database(&self, name: &str) -> Result<Database> {
        if let Some(existing) = self.databases.get(name) {
            return Ok(existing.clone());
        }
        let database = Database::new(
            name,
            Arc::clone(&self.driver),
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
        )?;
        Ok(self
            .databases
            .entry(name.to_string())
            .or_insert(database)
            .value()
            .clone())
    }

    /// Collection of the current database.
    ///
    /// # Errors
    /// `Configuration("database not selected")` before `use_database`.
    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        let current = self
            .current_database()
            .ok_or_else(|| MnemosyneError::Configuration("database not selected".to_string()))?;
        self.get_database(&current)?.get_collection(name)
    }

    pub async fn server_version(&self) -> Result<String> {
        self.driver.server_version().await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("current", &*self.current.read())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_requires_database() {
        let client = Client::in_memory(ClientConfig::default());
        let err = client.get_collection("users").unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: database not selected");
    }

    #[test]
    fn test_collections_are_cached() {
        let client = Client::in_memory(ClientConfig::default());
        client.use_database("app").unwrap();
        let a = client.get_collection("users").unwrap();
        let b = client.get_collection("users").unwrap();

        assert_eq!(client.current_database().as_deref(), Some("app"));
        assert_eq!(a.namespace(), b.namespace());
        assert_eq!(
            client.get_database("app").unwrap().cached_collection_names(),
            vec!["users".to_string()]
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        let client = Client::in_memory(ClientConfig::default());
        assert!(client.get_database("").is_err());
        client.use_database("app").unwrap();
        assert!(client.get_collection("system.users").is_err());
    }
}
