//! MongoDB-backed driver with pool configuration
//!
//! Writes and admin operations are sent as raw database commands so the
//! server's reply reaches the acknowledgement translator unchanged. Only
//! `find` goes through the typed collection API.

use crate::ack::RawAck;
use crate::driver::Driver;
use crate::index::index_name;
use crate::options::{FindOptions, Namespace, ReadMode, ReadPreference, RemoveOptions, UpdateOptions};
use crate::write_concern::{Acknowledgment, WriteConcern};
use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mnemosyne_common::{MnemosyneError, Result};
use mongodb::{
    error::{Error as DriverError, ErrorKind},
    options::{
        ClientOptions, ReadPreference as DriverReadPreference, ReadPreferenceOptions,
        SelectionCriteria, ServerApi, ServerApiVersion,
    },
    Client, Database,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool (default: 5)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 20)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(5),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("mnemosyne".to_string()),
        }
    }
}

/// Driver over a pooled `mongodb::Client`
pub struct MongoDriver {
    client: Client,
    default_database: Option<String>,
}

impl MongoDriver {
    /// Connect with the given pool settings. The connection string may name
    /// a default database; it is not required.
    pub async fn connect(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connection_string).await?;

        if let Some(min) = config.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = config.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(idle) = config.max_idle_time {
            client_options.max_idle_time = Some(idle);
        }
        if let Some(connect) = config.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = config.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = config.app_name {
            client_options.app_name = Some(app);
        }

        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let default_database = client_options.default_database.clone();
        let client = Client::with_options(client_options)?;
        info!(default_database = ?default_database, "Connected to MongoDB");

        Ok(Self {
            client,
            default_database,
        })
    }

    /// Database named by the connection string, if any
    pub fn default_database(&self) -> Option<&str> {
        self.default_database.as_deref()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn database(&self, name: &str) -> Database {
        self.client.database(name)
    }

    /// Run `command`, folding server-side command failures into a reply
    async fn command(
        &self,
        database: &str,
        command: BsonDocument,
        criteria: Option<SelectionCriteria>,
    ) -> Result<BsonDocument> {
        let db = self.database(database);
        let action = db.run_command(command);
        let outcome = match criteria {
            Some(criteria) => action.selection_criteria(criteria).await,
            None => action.await,
        };
        match outcome {
            Ok(reply) => Ok(reply),
            Err(e) => failure_reply(e),
        }
    }

    /// Send a write command and translate its reply for `concern`
    async fn write(
        &self,
        ns: &Namespace,
        mut command: BsonDocument,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        command.insert("writeConcern", concern.to_document());
        let reply = self.command(&ns.database, command, None).await;
        if !concern.is_acknowledged() {
            let succeeded = reply.map(|r| is_ok(&normalise_write_reply(r))).unwrap_or(false);
            return Ok(RawAck::Unacknowledged(succeeded));
        }
        Ok(RawAck::Document(normalise_write_reply(reply?)))
    }

    /// Collect a cursor reply, issuing `getMore` until the cursor is exhausted
    async fn drain(&self, database: &str, collection: &str, reply: BsonDocument) -> Result<Vec<BsonDocument>> {
        let mut documents = Vec::new();
        let mut batch = reply;
        loop {
            let cursor = batch
                .get_document("cursor")
                .map_err(|_| MnemosyneError::Internal("reply has no cursor".to_string()))?;
            for key in ["firstBatch", "nextBatch"] {
                if let Ok(items) = cursor.get_array(key) {
                    documents.extend(items.iter().filter_map(|b| b.as_document().cloned()));
                }
            }
            let id = cursor.get_i64("id").unwrap_or(0);
            if id == 0 {
                return Ok(documents);
            }
            batch = self
                .command(database, doc! { "getMore": id, "collection": collection }, None)
                .await?;
        }
    }
}

/// Server-side command failures become `{ok: 0, errmsg, code}`; anything
/// else is a driver failure and propagates.
fn failure_reply(error: DriverError) -> Result<BsonDocument> {
    match error.kind.as_ref() {
        ErrorKind::Command(command) => Ok(doc! {
            "ok": 0,
            "errmsg": command.message.clone(),
            "code": command.code,
        }),
        _ => Err(error.into()),
    }
}

/// Lift the first write error or write concern error into `{ok: 0, errmsg, code}`
fn normalise_write_reply(reply: BsonDocument) -> BsonDocument {
    let first_write_error = reply
        .get_array("writeErrors")
        .ok()
        .and_then(|errors| errors.first())
        .and_then(Bson::as_document)
        .cloned();
    let failure = first_write_error.or_else(|| reply.get_document("writeConcernError").ok().cloned());

    match failure {
        Some(error) => {
            let mut normalised = doc! {
                "ok": 0,
                "errmsg": error.get_str("errmsg").unwrap_or_default(),
            };
            if let Some(code) = error.get("code") {
                normalised.insert("code", code.clone());
            }
            if let Some(n) = reply.get("n") {
                normalised.insert("n", n.clone());
            }
            normalised
        }
        None => reply,
    }
}

fn is_ok(reply: &BsonDocument) -> bool {
    match reply.get("ok") {
        Some(Bson::Double(ok)) => *ok == 1.0,
        Some(Bson::Int32(ok)) => *ok == 1,
        Some(Bson::Int64(ok)) => *ok == 1,
        _ => false,
    }
}

fn selection_criteria(preference: &ReadPreference) -> SelectionCriteria {
    let options = if preference.tags.is_empty() {
        None
    } else {
        let mut options = ReadPreferenceOptions::default();
        options.tag_sets = Some(
            preference
                .tags
                .iter()
                .map(|set| set.clone().into_iter().collect::<HashMap<_, _>>())
                .collect(),
        );
        Some(options)
    };
    let mode = match preference.mode {
        ReadMode::Primary => DriverReadPreference::Primary,
        ReadMode::PrimaryPreferred => DriverReadPreference::PrimaryPreferred { options },
        ReadMode::Secondary => DriverReadPreference::Secondary { options },
        ReadMode::SecondaryPreferred => DriverReadPreference::SecondaryPreferred { options },
        ReadMode::Nearest => DriverReadPreference::Nearest { options },
    };
    SelectionCriteria::ReadPreference(mode)
}

#[async_trait]
impl Driver for MongoDriver {
    async fn insert(
        &self,
        ns: &Namespace,
        document: BsonDocument,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        let command = doc! { "insert": ns.collection.as_str(), "documents": [document] };
        self.write(ns, command, concern).await
    }

    async fn batch_insert(
        &self,
        ns: &Namespace,
        documents: Vec<BsonDocument>,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        let command = doc! { "insert": ns.collection.as_str(), "documents": documents };
        self.write(ns, command, concern).await
    }

    async fn update(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        let command = doc! {
            "update": ns.collection.as_str(),
            "updates": [{
                "q": filter,
                "u": update,
                "upsert": options.upsert,
                "multi": options.multiple,
            }],
        };
        self.write(ns, command, concern).await
    }

    async fn remove(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        options: RemoveOptions,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        let command = doc! {
            "delete": ns.collection.as_str(),
            "deletes": [{ "q": filter, "limit": if options.just_one { 1 } else { 0 } }],
        };
        self.write(ns, command, concern).await
    }

    async fn find(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Vec<BsonDocument>> {
        let collection = self
            .database(&ns.database)
            .collection::<BsonDocument>(&ns.collection);

        let mut find_options = mongodb::options::FindOptions::default();
        find_options.sort = options.sort;
        if options.skip > 0 {
            find_options.skip = Some(options.skip);
        }
        if options.limit != 0 {
            find_options.limit = Some(options.limit);
        }
        find_options.projection = options.projection;
        find_options.selection_criteria = Some(selection_criteria(&options.read_preference));

        let cursor = collection.find(filter).with_options(find_options).await?;
        let documents: Vec<BsonDocument> = cursor.try_collect().await?;
        debug!(namespace = %ns, count = documents.len(), "Find completed");
        Ok(documents)
    }

    async fn run_command(
        &self,
        database: &str,
        command: BsonDocument,
        read_preference: Option<&ReadPreference>,
    ) -> Result<BsonDocument> {
        self.command(database, command, read_preference.map(selection_criteria))
            .await
    }

    async fn ensure_index(
        &self,
        ns: &Namespace,
        keys: BsonDocument,
        options: BsonDocument,
    ) -> Result<RawAck> {
        let mut index = options;
        if !index.contains_key("name") {
            index.insert("name", index_name(&keys));
        }
        index.insert("key", keys);
        let command = doc! { "createIndexes": ns.collection.as_str(), "indexes": [index] };
        Ok(RawAck::Document(self.command(&ns.database, command, None).await?))
    }

    async fn get_indexes(&self, ns: &Namespace) -> Result<Vec<BsonDocument>> {
        let reply = self
            .command(&ns.database, doc! { "listIndexes": ns.collection.as_str() }, None)
            .await?;
        if reply.get_document("cursor").is_err() {
            // listIndexes on a missing namespace
            return Ok(Vec::new());
        }
        self.drain(&ns.database, &ns.collection, reply).await
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<BsonDocument> {
        self.command(&ns.database, doc! { "drop": ns.collection.as_str() }, None)
            .await
    }

    fn accepts_write_concern(&self, concern: &WriteConcern) -> bool {
        match &concern.w {
            Acknowledgment::Nodes(n) => *n >= 0,
            Acknowledgment::Majority => true,
            Acknowledgment::Tag(tag) => !tag.is_empty(),
        }
    }

    async fn server_version(&self) -> Result<String> {
        let reply = self.command("admin", doc! { "buildInfo": 1 }, None).await?;
        reply
            .get_str("version")
            .map(str::to_string)
            .map_err(|_| MnemosyneError::Internal("buildInfo reply has no version".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TagSet;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool_size, Some(5));
        assert_eq!(config.max_pool_size, Some(20));
        assert_eq!(config.app_name, Some("mnemosyne".to_string()));
    }

    #[test]
    fn test_write_errors_are_lifted() {
        let reply = doc! {
            "ok": 1,
            "n": 0,
            "writeErrors": [{ "index": 0, "code": 11000, "errmsg": "E11000 duplicate key" }],
        };
        let normalised = normalise_write_reply(reply);
        assert_eq!(normalised.get_i32("ok").unwrap(), 0);
        assert_eq!(normalised.get_i32("code").unwrap(), 11000);
        assert_eq!(normalised.get_str("errmsg").unwrap(), "E11000 duplicate key");
    }

    #[test]
    fn test_clean_reply_passes_through() {
        let reply = doc! { "ok": 1.0, "n": 1 };
        assert_eq!(normalise_write_reply(reply.clone()), reply);
    }

    #[test]
    fn test_selection_criteria_carries_tags() {
        let mut tags = TagSet::new();
        tags.insert("dc".to_string(), "east".to_string());
        let criteria = selection_criteria(&ReadPreference::new(ReadMode::Nearest, vec![tags]));
        let SelectionCriteria::ReadPreference(DriverReadPreference::Nearest { options }) = criteria
        else {
            panic!("expected nearest");
        };
        let sets = options.and_then(|o| o.tag_sets).unwrap();
        assert_eq!(sets[0].get("dc").map(String::as_str), Some("east"));
    }
}
