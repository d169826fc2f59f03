//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bson::Document as BsonDocument;
use mnemosyne_mongodb::{
    Client, ClientConfig, Collection, CollectionRegistry, Driver, FindOptions, MemoryDriver,
    Namespace, RawAck, ReadPreference, RemoveOptions, Result, UpdateOptions, WriteConcern,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub const DATABASE: &str = "test";

/// Route debug output (including rendered payloads) to the test writer
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Client over a fresh in-process store with `test` selected
pub fn memory_client() -> Client {
    init_tracing();
    let client = Client::in_memory(ClientConfig::default());
    client.use_database(DATABASE).unwrap();
    client
}

pub fn client_with(driver: Arc<dyn Driver>, registry: CollectionRegistry) -> Client {
    let client = Client::new(driver, ClientConfig::default()).with_registry(registry);
    client.use_database(DATABASE).unwrap();
    client
}

pub fn memory_collection(name: &str) -> Collection {
    memory_client().get_collection(name).unwrap()
}

/// One recorded write primitive call
#[derive(Debug, Clone)]
pub struct Call {
    pub operation: &'static str,
    pub payload: BsonDocument,
    pub concern: WriteConcern,
}

/// Driver whose write acknowledgements are scripted.
///
/// Writes and drops pop the next queued ack (falling through to the
/// in-process store when the queue is empty) and are recorded. Reads always
/// go to the store.
pub struct ScriptedDriver {
    store: MemoryDriver,
    acks: Mutex<VecDeque<RawAck>>,
    calls: Mutex<Vec<Call>>,
    command_preferences: Mutex<Vec<Option<ReadPreference>>>,
    accept_concerns: bool,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            store: MemoryDriver::new(),
            acks: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            command_preferences: Mutex::new(Vec::new()),
            accept_concerns: true,
        }
    }

    /// Reject every write concern change
    pub fn rejecting_concerns() -> Self {
        Self {
            accept_concerns: false,
            ..Self::new()
        }
    }

    pub fn push_ack(&self, ack: RawAck) {
        self.acks.lock().push_back(ack);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Read preference passed with each command, in call order
    pub fn command_preferences(&self) -> Vec<Option<ReadPreference>> {
        self.command_preferences.lock().clone()
    }

    fn record(&self, operation: &'static str, payload: BsonDocument, concern: &WriteConcern) -> Option<RawAck> {
        self.calls.lock().push(Call {
            operation,
            payload,
            concern: concern.clone(),
        });
        self.acks.lock().pop_front()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn insert(
        &self,
        ns: &Namespace,
        document: BsonDocument,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        match self.record("insert", document.clone(), concern) {
            Some(ack) => Ok(ack),
            None => self.store.insert(ns, document, concern).await,
        }
    }

    async fn batch_insert(
        &self,
        ns: &Namespace,
        documents: Vec<BsonDocument>,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        let payload = bson::doc! { "documents": documents.clone() };
        match self.record("batch_insert", payload, concern) {
            Some(ack) => Ok(ack),
            None => self.store.batch_insert(ns, documents, concern).await,
        }
    }

    async fn update(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        let payload = bson::doc! { "filter": filter.clone(), "update": update.clone() };
        match self.record("update", payload, concern) {
            Some(ack) => Ok(ack),
            None => self.store.update(ns, filter, update, options, concern).await,
        }
    }

    async fn remove(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        options: RemoveOptions,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        match self.record("remove", filter.clone(), concern) {
            Some(ack) => Ok(ack),
            None => self.store.remove(ns, filter, options, concern).await,
        }
    }

    async fn find(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Vec<BsonDocument>> {
        self.store.find(ns, filter, options).await
    }

    async fn run_command(
        &self,
        database: &str,
        command: BsonDocument,
        read_preference: Option<&ReadPreference>,
    ) -> Result<BsonDocument> {
        self.command_preferences.lock().push(read_preference.cloned());
        self.store.run_command(database, command, read_preference).await
    }

    async fn ensure_index(
        &self,
        ns: &Namespace,
        keys: BsonDocument,
        options: BsonDocument,
    ) -> Result<RawAck> {
        self.store.ensure_index(ns, keys, options).await
    }

    async fn get_indexes(&self, ns: &Namespace) -> Result<Vec<BsonDocument>> {
        self.store.get_indexes(ns).await
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<BsonDocument> {
        let payload = bson::doc! { "drop": ns.collection.as_str() };
        match self.record("drop", payload, &WriteConcern::default()) {
            Some(RawAck::Document(reply)) => Ok(reply),
            _ => self.store.drop_collection(ns).await,
        }
    }

    fn accepts_write_concern(&self, concern: &WriteConcern) -> bool {
        self.accept_concerns && self.store.accepts_write_concern(concern)
    }

    async fn server_version(&self) -> Result<String> {
        self.store.server_version().await
    }
}
