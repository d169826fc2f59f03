//! Driver boundary
//!
//! Everything below this trait (wire protocol, connection pooling, server
//! selection, authentication) belongs to the driver. The persistence layer
//! only sees raw acknowledgements, raw records and raw command replies.

use crate::ack::RawAck;
use crate::options::{FindOptions, Namespace, ReadPreference, RemoveOptions, UpdateOptions};
use crate::write_concern::WriteConcern;
use async_trait::async_trait;
use bson::Document as BsonDocument;
use mnemosyne_common::Result;

/// Primitives a store driver must provide.
///
/// `Err` is reserved for failures of the driver itself (transport, I/O) and
/// is propagated unchanged. Store-side rejections come back as a
/// [`RawAck`] or command reply carrying `ok`/`err`/`errmsg`/`code`.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn insert(
        &self,
        ns: &Namespace,
        document: BsonDocument,
        concern: &WriteConcern,
    ) -> Result<RawAck>;

    async fn batch_insert(
        &self,
        ns: &Namespace,
        documents: Vec<BsonDocument>,
        concern: &WriteConcern,
    ) -> Result<RawAck>;

    async fn update(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
        concern: &WriteConcern,
    ) -> Result<RawAck>;

    async fn remove(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        options: RemoveOptions,
        concern: &WriteConcern,
    ) -> Result<RawAck>;

    /// Every record matching `filter`, shaped by `options`
    async fn find(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Vec<BsonDocument>>;

    /// Run a database command and return its raw reply
    async fn run_command(
        &self,
        database: &str,
        command: BsonDocument,
        read_preference: Option<&ReadPreference>,
    ) -> Result<BsonDocument>;

    async fn ensure_index(
        &self,
        ns: &Namespace,
        keys: BsonDocument,
        options: BsonDocument,
    ) -> Result<RawAck>;

    async fn get_indexes(&self, ns: &Namespace) -> Result<Vec<BsonDocument>>;

    /// Raw drop reply; a missing namespace is reported, not raised
    async fn drop_collection(&self, ns: &Namespace) -> Result<BsonDocument>;

    /// Whether the driver can honour `concern`
    fn accepts_write_concern(&self, concern: &WriteConcern) -> bool;

    /// Version string reported by the connected server
    async fn server_version(&self) -> Result<String>;
}
