//! Database handles and the per-database collection cache

use crate::ack::check_command;
use crate::collection::Collection;
use crate::config::ClientConfig;
use crate::driver::Driver;
use crate::names::{check_collection_name, check_database_name};
use crate::options::Namespace;
use crate::registry::CollectionRegistry;
use bson::{doc, Document as BsonDocument};
use dashmap::DashMap;
use mnemosyne_common::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

/// One database of a client. Cheap to clone.
///
/// Collections are cached by name, so repeated acquisitions return the same
/// instance and share its document pool.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    name: String,
    driver: Arc<dyn Driver>,
    config: Arc<ClientConfig>,
    registry: Arc<CollectionRegistry>,
    collections: DashMap<String, Collection>,
}

impl Database {
    pub(crate) fn new(
        name: &str,
        driver: Arc<dyn Driver>,
        config: Arc<ClientConfig>,
        registry: Arc<CollectionRegistry>,
    ) -> Result<Self> {
        check_database_name(name)?;
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                name: name.to_string(),
                driver,
                config,
                registry,
                collections: DashMap::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Cached collection handle, built from the registry on first use
    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        if let Some(existing) = self.inner.collections.get(name) {
            return Ok(existing.clone());
        }

        let definition = self.inner.registry.resolve(&self.inner.name, name);
        let collection = Collection::new(
            Namespace::new(self.inner.name.as_str(), name),
            Arc::clone(&self.inner.driver),
            definition,
            Arc::clone(&self.inner.config),
        )?;

        let entry = self
            .inner
            .collections
            .entry(name.to_string())
            .or_insert(collection);
        Ok(entry.value().clone())
    }

    /// Create a collection explicitly
    #[instrument(skip(self), fields(database = %self.inner.name))]
    pub async fn create_collection(&self, name: &str) -> Result<Collection> {
        check_collection_name(name)?;
        self.run_create(doc! { "create": name }).await?;
        info!(collection = name, "Collection created");
        self.get_collection(name)
    }

    /// Create a capped collection holding at most `size_bytes` bytes and, when
    /// given, at most `max_documents` documents
    #[instrument(skip(self), fields(database = %self.inner.name))]
    pub async fn create_capped_collection(
        &self,
        name: &str,
        size_bytes: u64,
        max_documents: Option<u64>,
    ) -> Result<Collection> {
        check_collection_name(name)?;
        let mut command = doc! {
            "create": name,
            "capped": true,
            "size": size_bytes as i64,
        };
        if let Some(max) = max_documents {
            command.insert("max", max as i64);
        }
        self.run_create(command).await?;
        info!(collection = name, size_bytes, ?max_documents, "Capped collection created");
        self.get_collection(name)
    }

    async fn run_create(&self, command: BsonDocument) -> Result<BsonDocument> {
        let reply = self
            .inner
            .driver
            .run_command(&self.inner.name, command, None)
            .await?;
        check_command("Create collection", reply)
    }

    /// Run an arbitrary command against this database
    pub async fn run_command(&self, command: BsonDocument) -> Result<BsonDocument> {
        self.inner
            .driver
            .run_command(&self.inner.name, command, None)
            .await
    }

    /// Names of the collections handed out so far
    pub fn cached_collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("collections", &self.cached_collection_names())
            .finish()
    }
}
