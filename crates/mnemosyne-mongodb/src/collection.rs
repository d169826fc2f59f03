//! Collection: CRUD over the driver boundary
//!
//! Every write goes through the same sequence: validate and render locally,
//! log the rendered payload, call the driver once, then translate the raw
//! acknowledgement according to the active write concern. Nothing is retried.

use crate::ack::{check_command, check_write, is_namespace_not_found, RawAck};
use crate::config::ClientConfig;
use crate::cursor::Cursor;
use crate::document::{Document, DocumentState, SharedDocument};
use crate::driver::Driver;
use crate::expression::Expression;
use crate::index::{check_keys, index_name, IndexDeclaration, IndexOptions};
use crate::names::{check_collection_name, check_database_name};
use crate::operator::Operator;
use crate::options::{
    FindOptions, Namespace, ReadMode, ReadPreference, RemoveOptions, TagSet, UpdateOptions,
};
use crate::pipeline::{AggregateInput, Pipeline};
use crate::pool::{identity_key, DocumentPool};
use crate::registry::CollectionDefinition;
use crate::write_concern::{Acknowledgment, WriteConcern};
use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use mnemosyne_common::{MnemosyneError, Result, Violations};
use mnemosyne_validation::RuleSet;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn, Level};

/// Handle to one collection. Cheap to clone; clones share the document pool,
/// write concern, read preference and index table.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    namespace: Namespace,
    driver: Arc<dyn Driver>,
    rules: RuleSet,
    write_concern: RwLock<WriteConcern>,
    read_preference: RwLock<ReadPreference>,
    pool: DocumentPool,
    indexes: RwLock<Vec<IndexDeclaration>>,
    config: Arc<ClientConfig>,
}

impl Collection {
    pub fn new(
        namespace: Namespace,
        driver: Arc<dyn Driver>,
        definition: CollectionDefinition,
        config: Arc<ClientConfig>,
    ) -> Result<Self> {
        check_database_name(&namespace.database)?;
        check_collection_name(&namespace.collection)?;

        Ok(Self {
            inner: Arc::new(CollectionInner {
                namespace,
                driver,
                rules: definition.rules,
                write_concern: RwLock::new(config.write_concern.clone()),
                read_preference: RwLock::new(ReadPreference::primary()),
                pool: DocumentPool::new(config.document_pool_enabled),
                indexes: RwLock::new(definition.indexes),
                config,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.namespace.collection
    }

    pub fn database_name(&self) -> &str {
        &self.inner.namespace.database
    }

    pub fn namespace(&self) -> &Namespace {
        &self.inner.namespace
    }

    /// Rule set documents of this collection are validated against
    pub fn rules(&self) -> &RuleSet {
        &self.inner.rules
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// New unsaved document bound to this collection's rules
    pub fn create_document(&self, fields: BsonDocument) -> Result<Document> {
        Document::unsaved(fields, self.rules().clone(), self.namespace().clone())
    }

    /// Validate, then insert or partially update `document`.
    ///
    /// An unsaved document is inserted and adopts its identity. A stored one
    /// is updated with `$set`/`$unset` for exactly its pending delta; with no
    /// pending changes nothing is sent.
    #[instrument(skip(self, document), fields(collection = %self.inner.namespace))]
    pub async fn save_document(&self, document: &mut Document) -> Result<()> {
        self.adopt(document)?;

        let violations = document.validate();
        if !violations.is_empty() {
            return Err(MnemosyneError::ValidationFailed(violations));
        }

        if document.state() == DocumentState::Unsaved {
            let id = match document.id() {
                Some(id) => id.clone(),
                None => {
                    let id = Bson::ObjectId(ObjectId::new());
                    document.assign_id(id.clone());
                    id
                }
            };
            let fields = with_leading_id(document.to_document(), id);
            self.log_payload("insert", &fields);
            let concern = self.write_concern();
            let ack = self.inner.driver.insert(self.namespace(), fields, &concern).await?;
            check_write("Insert", ack, concern.is_acknowledged())?;
            document.mark_persisted();
            debug!("Document inserted");
            return Ok(());
        }

        if !document.is_dirty() {
            return Ok(());
        }

        let id = document.id().cloned().ok_or_else(|| {
            MnemosyneError::InvalidArgument("stored document has no _id".to_string())
        })?;
        let update = document.delta_operator().to_document();
        let filter = doc! { "_id": id };
        self.log_payload("update", &doc! { "filter": filter.clone(), "update": update.clone() });

        let concern = self.write_concern();
        let ack = self
            .inner
            .driver
            .update(self.namespace(), filter, update, UpdateOptions::default(), &concern)
            .await?;
        check_write("Update", ack, concern.is_acknowledged())?;
        document.mark_persisted();
        debug!("Document updated");
        Ok(())
    }

    /// Save a pooled or shared handle.
    ///
    /// The lock is not held across the driver call. A newly inserted
    /// document enters the pool when the pool is enabled.
    pub async fn save_shared(&self, shared: &SharedDocument) -> Result<()> {
        let mut working = shared.read().clone();
        let was_unsaved = !working.is_saved();
        self.save_document(&mut working).await?;

        let id = working.id().cloned();
        *shared.write() = working;

        if let (true, Some(id)) = (was_unsaved, id) {
            if self.inner.pool.is_enabled() {
                self.inner.pool.intern_shared(&id, shared);
            }
        }
        Ok(())
    }

    fn adopt(&self, document: &mut Document) -> Result<()> {
        match document.namespace() {
            Some(ns) if ns != self.namespace() => Err(MnemosyneError::InvalidArgument(format!(
                "document belongs to '{}', not '{}'",
                ns,
                self.namespace()
            ))),
            Some(_) => Ok(()),
            None => {
                document.bind(self.rules().clone(), self.namespace().clone());
                Ok(())
            }
        }
    }

    /// Build a document from a stored record, going through the pool when
    /// `poolable` and the pool is enabled
    pub(crate) fn hydrate(&self, raw: BsonDocument, poolable: bool) -> SharedDocument {
        let id = raw.get("_id").cloned();
        let pool = &self.inner.pool;
        match id {
            Some(id) if poolable && pool.is_enabled() => match pool.get(&id) {
                Some(existing) => existing,
                None => pool.intern(&id, self.hydrated(raw)),
            },
            _ => Arc::new(RwLock::new(self.hydrated(raw))),
        }
    }

    fn hydrated(&self, raw: BsonDocument) -> Document {
        Document::hydrated(raw, self.rules().clone(), self.namespace().clone())
    }

    // ------------------------------------------------------------------
    // Inserts
    // ------------------------------------------------------------------

    /// Validate and insert one record; returns its identity
    #[instrument(skip(self, fields), fields(collection = %self.inner.namespace))]
    pub async fn insert(&self, fields: BsonDocument) -> Result<Bson> {
        let violations = self.rules().validate(&fields);
        if !violations.is_empty() {
            return Err(MnemosyneError::ValidationFailed(violations));
        }

        let (id, fields) = ensure_id(fields);
        self.log_payload("insert", &fields);

        let concern = self.write_concern();
        let ack = self.inner.driver.insert(self.namespace(), fields, &concern).await?;
        check_write("Insert", ack, concern.is_acknowledged())?;
        Ok(id)
    }

    /// Validate every record, then insert them in one batch.
    ///
    /// Any violation fails the whole batch before anything is written; each
    /// violation carries the batch position in its `document` parameter.
    #[instrument(skip(self, documents), fields(collection = %self.inner.namespace, count = documents.len()))]
    pub async fn insert_multiple(&self, documents: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        let mut violations = Violations::new();
        for (position, fields) in documents.iter().enumerate() {
            for mut violation in self.rules().validate(fields) {
                violation.params.insert("document", position as i64);
                violations.add(violation);
            }
        }
        if !violations.is_empty() {
            return Err(MnemosyneError::ValidationFailed(violations));
        }
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let (ids, documents): (Vec<Bson>, Vec<BsonDocument>) =
            documents.into_iter().map(ensure_id).unzip();
        self.log_payload("batch_insert", &doc! { "documents": documents.clone() });

        let concern = self.write_concern();
        let ack = self
            .inner
            .driver
            .batch_insert(self.namespace(), documents, &concern)
            .await?;
        check_write("Batch insert", ack, concern.is_acknowledged())?;
        info!(count = ids.len(), "Batch inserted");
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    /// Apply `operator` to documents matching `filter`.
    ///
    /// Returns the raw acknowledgement (empty for unacknowledged writes).
    ///
    /// # Errors
    /// `InvalidArgument` for an empty operator, before any write is issued.
    #[instrument(skip(self, filter, operator), fields(collection = %self.inner.namespace, multiple = options.multiple, upsert = options.upsert))]
    pub async fn update(
        &self,
        filter: &Expression,
        operator: &Operator,
        options: UpdateOptions,
    ) -> Result<BsonDocument> {
        if operator.is_empty() {
            return Err(MnemosyneError::InvalidArgument(
                "update operator is empty".to_string(),
            ));
        }
        let label = if options.multiple {
            "Multiple update"
        } else {
            "Update"
        };

        let filter = filter.to_document();
        let update = operator.to_document();
        self.log_payload("update", &doc! { "filter": filter.clone(), "update": update.clone() });

        let concern = self.write_concern();
        let ack = self
            .inner
            .driver
            .update(self.namespace(), filter, update, options, &concern)
            .await?;
        check_write(label, ack, concern.is_acknowledged())
    }

    pub async fn update_multiple(
        &self,
        filter: &Expression,
        operator: &Operator,
    ) -> Result<BsonDocument> {
        self.update(filter, operator, UpdateOptions::multiple()).await
    }

    /// `update_multiple` with an empty filter
    pub async fn update_all(&self, operator: &Operator) -> Result<BsonDocument> {
        self.update_multiple(&Expression::new(), operator).await
    }

    // ------------------------------------------------------------------
    // Deletes
    // ------------------------------------------------------------------

    /// Remove one stored document and evict it from the pool
    #[instrument(skip(self, document), fields(collection = %self.inner.namespace))]
    pub async fn delete_document(&self, document: &Document) -> Result<()> {
        let id = document
            .id()
            .cloned()
            .ok_or_else(|| MnemosyneError::InvalidArgument("document has no _id".to_string()))?;
        let filter = doc! { "_id": id.clone() };
        self.log_payload("remove", &filter);

        let concern = self.write_concern();
        let ack = self
            .inner
            .driver
            .remove(
                self.namespace(),
                filter,
                RemoveOptions { just_one: true },
                &concern,
            )
            .await?;
        check_write("Delete document", ack, concern.is_acknowledged())?;
        self.inner.pool.remove(&id);
        Ok(())
    }

    /// Remove every document matching `filter`.
    ///
    /// Pooled instances of the matching documents are evicted.
    #[instrument(skip(self, filter), fields(collection = %self.inner.namespace))]
    pub async fn delete_documents(&self, filter: &Expression) -> Result<BsonDocument> {
        let filter = filter.to_document();

        let evict = if self.inner.pool.is_empty() {
            Vec::new()
        } else {
            let options = FindOptions {
                projection: Some(doc! { "_id": 1 }),
                read_preference: ReadPreference::primary(),
                ..FindOptions::default()
            };
            self.inner
                .driver
                .find(self.namespace(), filter.clone(), options)
                .await?
                .into_iter()
                .filter_map(|raw| raw.get("_id").cloned())
                .collect()
        };

        self.log_payload("remove", &filter);
        let concern = self.write_concern();
        let ack = self
            .inner
            .driver
            .remove(
                self.namespace(),
                filter,
                RemoveOptions::default(),
                &concern,
            )
            .await?;
        let reply = check_write("Delete documents", ack, concern.is_acknowledged())?;
        for id in &evict {
            self.inner.pool.remove(id);
        }
        Ok(reply)
    }

    /// Drop the whole collection. Dropping a missing collection succeeds.
    #[instrument(skip(self), fields(collection = %self.inner.namespace))]
    pub async fn delete(&self) -> Result<()> {
        let reply = self.inner.driver.drop_collection(self.namespace()).await?;
        if is_namespace_not_found(&reply) {
            info!("Collection did not exist, drop treated as success");
        } else {
            check_write("Drop collection", RawAck::Document(reply), true)?;
            info!("Collection dropped");
        }
        self.inner.pool.clear();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Document by identity; `None` when it does not exist
    #[instrument(skip(self, id), fields(collection = %self.inner.namespace))]
    pub async fn get_document(&self, id: impl Into<Bson>) -> Result<Option<SharedDocument>> {
        let id = id.into();
        if self.inner.pool.is_enabled() {
            if let Some(pooled) = self.inner.pool.get(&id) {
                debug!("Document pool hit");
                return Ok(Some(pooled));
            }
        }
        let raw = self.fetch_by_id(id).await?;
        Ok(raw.map(|raw| self.hydrate(raw, true)))
    }

    /// Documents by identity, keyed by pool key; unknown identities are absent
    #[instrument(skip(self, ids), fields(collection = %self.inner.namespace))]
    pub async fn get_documents<I, V>(&self, ids: I) -> Result<HashMap<String, SharedDocument>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        let pool_enabled = self.inner.pool.is_enabled();

        for id in ids {
            let id = id.into();
            match self.inner.pool.get(&id).filter(|_| pool_enabled) {
                Some(pooled) => {
                    found.insert(identity_key(&id), pooled);
                }
                None => missing.push(id),
            }
        }

        if !missing.is_empty() {
            let filter = doc! { "_id": { "$in": missing } };
            for raw in self.fetch(filter, self.find_options()).await? {
                if let Some(id) = raw.get("_id") {
                    let key = identity_key(id);
                    found.insert(key, self.hydrate(raw, true));
                }
            }
        }
        Ok(found)
    }

    /// Re-read `id` and overwrite the pooled instance in place.
    ///
    /// Returns `None` (and evicts) when the document no longer exists.
    #[instrument(skip(self, id), fields(collection = %self.inner.namespace))]
    pub async fn refresh_document(&self, id: impl Into<Bson>) -> Result<Option<SharedDocument>> {
        let id = id.into();
        let raw = self.fetch_by_id(id.clone()).await?;
        match (raw, self.inner.pool.get(&id)) {
            (None, _) => {
                self.inner.pool.remove(&id);
                Ok(None)
            }
            (Some(raw), Some(pooled)) => {
                pooled.write().replace_fields(raw);
                Ok(Some(pooled))
            }
            (Some(raw), None) => Ok(Some(self.hydrate(raw, true))),
        }
    }

    async fn fetch_by_id(&self, id: Bson) -> Result<Option<BsonDocument>> {
        let options = FindOptions {
            limit: 1,
            ..self.find_options()
        };
        let mut records = self.fetch(doc! { "_id": id }, options).await?;
        Ok(if records.is_empty() {
            None
        } else {
            Some(records.swap_remove(0))
        })
    }

    pub(crate) fn find_options(&self) -> FindOptions {
        FindOptions {
            read_preference: self.read_preference(),
            ..FindOptions::default()
        }
    }

    pub(crate) async fn fetch(
        &self,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Vec<BsonDocument>> {
        self.log_payload("find", &filter);
        self.inner
            .driver
            .find(self.namespace(), filter, options)
            .await
    }

    /// Distinct values of `path`, in the order the store reports them
    #[instrument(skip(self, filter), fields(collection = %self.inner.namespace))]
    pub async fn get_distinct(&self, path: &str, filter: Option<&Expression>) -> Result<Vec<Bson>> {
        let query = filter.map(Expression::to_document).unwrap_or_default();
        self.log_payload("distinct", &query);
        let command = doc! {
            "distinct": self.name(),
            "key": path,
            "query": query,
        };
        let reply = self.command("Distinct", command).await?;
        Ok(reply.get_array("values").cloned().unwrap_or_default())
    }

    /// Number of documents matching `filter`
    pub async fn count(&self, filter: Option<&Expression>) -> Result<u64> {
        let preference = self.read_preference();
        self.count_with(
            filter.map(Expression::to_document).unwrap_or_default(),
            0,
            0,
            &preference,
        )
        .await
    }

    pub(crate) async fn count_with(
        &self,
        query: BsonDocument,
        skip: u64,
        limit: i64,
        preference: &ReadPreference,
    ) -> Result<u64> {
        self.log_payload("count", &query);
        let mut command = doc! { "count": self.name(), "query": query };
        if skip > 0 {
            command.insert("skip", skip as i64);
        }
        if limit != 0 {
            command.insert("limit", limit);
        }
        let reply = self.command_with("Count", command, preference).await?;
        let n = match reply.get("n") {
            Some(Bson::Int32(n)) => *n as u64,
            Some(Bson::Int64(n)) => *n as u64,
            Some(Bson::Double(n)) => *n as u64,
            _ => 0,
        };
        Ok(n)
    }

    /// Lazy cursor over every document
    pub fn find(&self) -> Cursor {
        Cursor::new(self.clone())
    }

    /// Lazy cursor shaped by `build`
    pub fn find_with<F>(&self, build: F) -> Result<Cursor>
    where
        F: FnOnce(&mut Cursor) -> Result<()>,
    {
        let mut cursor = self.find();
        build(&mut cursor)?;
        Ok(cursor)
    }

    // ------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------

    pub fn create_pipeline(&self) -> Pipeline {
        Pipeline::bound(self.clone())
    }

    /// Run an aggregation and return the result rows.
    ///
    /// # Errors
    /// `InvalidArgument("wrong pipelines specified")` unless given a pipeline
    /// or a non-empty sequence of stage documents.
    #[instrument(skip(self, pipelines), fields(collection = %self.inner.namespace))]
    pub async fn aggregate(&self, pipelines: impl Into<AggregateInput>) -> Result<Vec<BsonDocument>> {
        let stages = pipelines.into().into_stages()?;
        self.log_payload("aggregate", &doc! { "pipeline": stages.clone() });

        let command = doc! {
            "aggregate": self.name(),
            "pipeline": stages,
            "cursor": {},
        };
        let reply = self.command("Aggregate", command).await?;
        self.drain_cursor("Aggregate", reply).await
    }

    /// Explain an aggregation.
    ///
    /// # Errors
    /// `Unsupported` when the server is older than the configured minimum
    /// version; checked before anything else.
    #[instrument(skip(self, pipelines), fields(collection = %self.inner.namespace))]
    pub async fn explain_aggregate(
        &self,
        pipelines: impl Into<AggregateInput>,
    ) -> Result<BsonDocument> {
        let minimum = &self.inner.config.min_explain_version;
        let server = self.inner.driver.server_version().await?;
        if compare_versions(&server, minimum) == std::cmp::Ordering::Less {
            return Err(MnemosyneError::Unsupported(format!(
                "Explain of aggregation implemented only from {}",
                minimum
            )));
        }

        let stages = pipelines.into().into_stages()?;
        self.log_payload("aggregate", &doc! { "pipeline": stages.clone() });
        let command = doc! {
            "aggregate": self.name(),
            "pipeline": stages,
            "explain": true,
        };
        self.command("Aggregate", command).await
    }

    async fn drain_cursor(&self, label: &str, reply: BsonDocument) -> Result<Vec<BsonDocument>> {
        let mut rows = Vec::new();
        let Ok(cursor) = reply.get_document("cursor") else {
            // legacy inline reply
            if let Ok(result) = reply.get_array("result") {
                rows.extend(documents_of(result));
            }
            return Ok(rows);
        };

        rows.extend(documents_of(cursor.get_array("firstBatch").unwrap_or(&Vec::new())));
        let mut cursor_id = batch_cursor_id(cursor);
        while cursor_id != 0 {
            let command = doc! { "getMore": cursor_id, "collection": self.name() };
            let reply = self.command(label, command).await?;
            let next = reply.get_document("cursor").map_err(|_| {
                MnemosyneError::Internal("getMore reply without cursor".to_string())
            })?;
            rows.extend(documents_of(next.get_array("nextBatch").unwrap_or(&Vec::new())));
            cursor_id = batch_cursor_id(next);
        }
        Ok(rows)
    }

    async fn command(&self, label: &str, command: BsonDocument) -> Result<BsonDocument> {
        let preference = self.read_preference();
        self.command_with(label, command, &preference).await
    }

    async fn command_with(
        &self,
        label: &str,
        command: BsonDocument,
        preference: &ReadPreference,
    ) -> Result<BsonDocument> {
        let reply = self
            .inner
            .driver
            .run_command(self.database_name(), command, Some(preference))
            .await?;
        check_command(label, reply)
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    /// Apply one index; idempotent on the store side
    #[instrument(skip(self, keys, options), fields(collection = %self.inner.namespace))]
    pub async fn ensure_index(&self, keys: BsonDocument, options: IndexOptions) -> Result<()> {
        check_keys(&keys)?;
        let name = index_name(&keys);
        self.log_payload("ensure_index", &doc! { "key": keys.clone(), "options": options.to_document() });

        let ack = self
            .inner
            .driver
            .ensure_index(self.namespace(), keys, options.to_document())
            .await?;
        check_write("Ensure index", ack, true)?;
        info!(index = %name, "Index ensured");
        Ok(())
    }

    pub async fn ensure_unique_index(&self, keys: BsonDocument, drop_dups: bool) -> Result<()> {
        let options = IndexOptions {
            unique: true,
            drop_dups,
            ..IndexOptions::default()
        };
        self.ensure_index(keys, options).await
    }

    pub async fn ensure_sparse_index(&self, keys: BsonDocument) -> Result<()> {
        let options = IndexOptions {
            sparse: true,
            ..IndexOptions::default()
        };
        self.ensure_index(keys, options).await
    }

    pub async fn ensure_ttl_index(&self, keys: BsonDocument, seconds: u64) -> Result<()> {
        let options = IndexOptions {
            ttl_seconds: Some(seconds),
            ..IndexOptions::default()
        };
        self.ensure_index(keys, options).await
    }

    /// Add an entry to the index table replayed by `init_indexes`
    pub fn declare_index(&self, declaration: IndexDeclaration) {
        self.inner.indexes.write().push(declaration);
    }

    pub fn index_declarations(&self) -> Vec<IndexDeclaration> {
        self.inner.indexes.read().clone()
    }

    /// Apply every declared index.
    ///
    /// The whole table is checked first, so a declaration without keys fails
    /// with `InvalidArgument("keys not specified")` before any index is built.
    pub async fn init_indexes(&self) -> Result<()> {
        let table = self.index_declarations();
        let mut planned = Vec::with_capacity(table.len());
        for declaration in &table {
            planned.push((declaration.keys()?.clone(), declaration.options.clone()));
        }
        for (keys, options) in planned {
            self.ensure_index(keys, options).await?;
        }
        Ok(())
    }

    pub async fn get_indexes(&self) -> Result<Vec<BsonDocument>> {
        self.inner.driver.get_indexes(self.namespace()).await
    }

    // ------------------------------------------------------------------
    // Write concern and read preference
    // ------------------------------------------------------------------

    /// Change the write concern.
    ///
    /// # Errors
    /// `Configuration` when the driver rejects the concern; the previous one
    /// stays active.
    pub fn set_write_concern(&self, w: impl Into<Acknowledgment>, timeout_ms: u64) -> Result<()> {
        let concern = WriteConcern::new(w, timeout_ms);
        if !self.inner.driver.accepts_write_concern(&concern) {
            warn!(collection = %self.inner.namespace, ?concern, "Write concern rejected");
            return Err(MnemosyneError::Configuration(
                "Error setting write concern".to_string(),
            ));
        }
        *self.inner.write_concern.write() = concern;
        Ok(())
    }

    /// `w=0`
    pub fn set_unacknowledged_write_concern(&self, timeout_ms: u64) -> Result<()> {
        self.set_write_concern(0, timeout_ms)
    }

    /// `w="majority"`
    pub fn set_majority_write_concern(&self, timeout_ms: u64) -> Result<()> {
        self.set_write_concern(Acknowledgment::Majority, timeout_ms)
    }

    pub fn write_concern(&self) -> WriteConcern {
        self.inner.write_concern.read().clone()
    }

    pub fn read_preference(&self) -> ReadPreference {
        self.inner.read_preference.read().clone()
    }

    fn set_read_preference(&self, mode: ReadMode, tags: Vec<TagSet>) -> &Self {
        *self.inner.read_preference.write() = ReadPreference::new(mode, tags);
        self
    }

    pub fn read_primary_only(&self) -> &Self {
        self.set_read_preference(ReadMode::Primary, Vec::new())
    }

    pub fn read_primary_preferred(&self, tags: Vec<TagSet>) -> &Self {
        self.set_read_preference(ReadMode::PrimaryPreferred, tags)
    }

    pub fn read_secondary_only(&self, tags: Vec<TagSet>) -> &Self {
        self.set_read_preference(ReadMode::Secondary, tags)
    }

    pub fn read_secondary_preferred(&self, tags: Vec<TagSet>) -> &Self {
        self.set_read_preference(ReadMode::SecondaryPreferred, tags)
    }

    pub fn read_nearest(&self, tags: Vec<TagSet>) -> &Self {
        self.set_read_preference(ReadMode::Nearest, tags)
    }

    // ------------------------------------------------------------------
    // Document pool
    // ------------------------------------------------------------------

    pub fn enable_document_pool(&self) -> &Self {
        self.inner.pool.enable();
        self
    }

    /// Stop consulting the pool; existing entries are kept
    pub fn disable_document_pool(&self) -> &Self {
        self.inner.pool.disable();
        self
    }

    /// Drop every entry; the enabled flag is unchanged
    pub fn clear_document_pool(&self) -> &Self {
        self.inner.pool.clear();
        debug!(collection = %self.inner.namespace, "Document pool cleared");
        self
    }

    pub fn is_document_pool_enabled(&self) -> bool {
        self.inner.pool.is_enabled()
    }

    pub fn is_document_pool_empty(&self) -> bool {
        self.inner.pool.is_empty()
    }

    pub fn document_pool(&self) -> &DocumentPool {
        &self.inner.pool
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub async fn stats(&self) -> Result<BsonDocument> {
        self.command("Stats", doc! { "collStats": self.name() }).await
    }

    /// Run the server-side `validate` command.
    ///
    /// # Errors
    /// `NotFound("ns not found")` when the collection does not exist.
    pub async fn validate_collection(&self, full: bool) -> Result<BsonDocument> {
        let reply = self
            .inner
            .driver
            .run_command(
                self.database_name(),
                doc! { "validate": self.name(), "full": full },
                None,
            )
            .await?;
        if is_namespace_not_found(&reply) {
            return Err(MnemosyneError::NotFound("ns not found".to_string()));
        }
        check_command("Validate", reply)
    }

    fn log_payload(&self, operation: &str, payload: &BsonDocument) {
        if self.inner.config.log_payloads && tracing::enabled!(Level::DEBUG) {
            let json = Bson::Document(payload.clone()).into_relaxed_extjson();
            debug!(
                component = "Collection",
                collection = %self.inner.namespace,
                operation,
                payload = %json,
                "Submitting payload"
            );
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.inner.namespace)
            .field("write_concern", &*self.inner.write_concern.read())
            .field("pool_size", &self.inner.pool.len())
            .finish()
    }
}

/// Give a record an `_id` if it lacks one, keeping `_id` first
fn ensure_id(fields: BsonDocument) -> (Bson, BsonDocument) {
    match fields.get("_id") {
        Some(id) => (id.clone(), fields),
        None => {
            let id = Bson::ObjectId(ObjectId::new());
            (id.clone(), with_leading_id(fields, id))
        }
    }
}

fn with_leading_id(fields: BsonDocument, id: Bson) -> BsonDocument {
    let mut ordered = doc! { "_id": id };
    ordered.extend(fields.into_iter().filter(|(key, _)| key != "_id"));
    ordered
}

fn documents_of(values: &[Bson]) -> impl Iterator<Item = BsonDocument> + '_ {
    values.iter().filter_map(|v| v.as_document().cloned())
}

fn batch_cursor_id(cursor: &BsonDocument) -> i64 {
    match cursor.get("id") {
        Some(Bson::Int64(id)) => *id,
        Some(Bson::Int32(id)) => *id as i64,
        _ => 0,
    }
}

/// Compare dotted version strings; missing components count as zero
pub(crate) fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    parse_version(a).cmp(&parse_version(b))
}

fn parse_version(raw: &str) -> semver::Version {
    if let Ok(version) = semver::Version::parse(raw) {
        return version;
    }
    let mut parts = raw
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u64>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    semver::Version::new(major, minor, patch)
}
