//! In-process store implementing the driver boundary
//!
//! Records live in insertion order per namespace behind one `RwLock`.
//! Store-side rejections are reported the way a server reports them: as
//! `{ok: 0, errmsg, code}` acknowledgements and command replies.

mod aggregate;
mod compare;
mod matcher;
mod update;

use crate::ack::RawAck;
use crate::driver::Driver;
use crate::index::{id_index, index_name};
use crate::options::{FindOptions, Namespace, ReadPreference, RemoveOptions, UpdateOptions};
use crate::write_concern::{Acknowledgment, WriteConcern};
use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use mnemosyne_common::path::{get_path, set_path};
use mnemosyne_common::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, trace};

use self::aggregate::{project, run_pipeline, sort_documents};
use self::compare::values_equal;
use self::matcher::{matches, resolve};
use self::update::apply_update;

/// Version reported by `buildInfo` unless configured otherwise
pub const DEFAULT_SERVER_VERSION: &str = "7.0.0";

/// Store-side rejection, rendered into a reply with a server error code
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("{0}")]
    BadValue(String),

    #[error("{0}")]
    TypeMismatch(String),

    #[error("Performing an update on the path '{0}' would modify the immutable field '{0}'")]
    ImmutableField(String),

    #[error("E11000 duplicate key error collection: {namespace} index: {index} dup key: {key}")]
    DuplicateKey {
        namespace: String,
        index: String,
        key: String,
    },

    #[error("ns not found")]
    NamespaceNotFound,

    #[error("Collection already exists. NS: {0}")]
    NamespaceExists(String),

    #[error("Index with name: {0} already exists with different options")]
    IndexOptionsConflict(String),

    #[error("no such command: '{0}'")]
    CommandNotFound(String),
}

impl StoreError {
    pub fn code(&self) -> i32 {
        match self {
            StoreError::UnknownOperator(_) | StoreError::BadValue(_) => 2,
            StoreError::TypeMismatch(_) => 14,
            StoreError::NamespaceNotFound => 26,
            StoreError::NamespaceExists(_) => 48,
            StoreError::CommandNotFound(_) => 59,
            StoreError::ImmutableField(_) => 66,
            StoreError::IndexOptionsConflict(_) => 85,
            StoreError::DuplicateKey { .. } => 11000,
        }
    }

    /// `{ok: 0, errmsg, code}`
    pub fn to_reply(&self) -> BsonDocument {
        doc! { "ok": 0, "errmsg": self.to_string(), "code": self.code() }
    }
}

type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy)]
struct Capped {
    size_bytes: u64,
    max_documents: Option<u64>,
}

#[derive(Debug, Default)]
struct NamespaceState {
    documents: Vec<BsonDocument>,
    /// Secondary indexes; `_id_` is implicit
    indexes: Vec<BsonDocument>,
    capped: Option<Capped>,
}

impl NamespaceState {
    fn insert(&mut self, ns: &Namespace, mut document: BsonDocument) -> StoreResult<()> {
        if !document.contains_key("_id") {
            let mut with_id = doc! { "_id": ObjectId::new() };
            with_id.extend(document);
            document = with_id;
        }
        self.check_unique(ns, &document, None)?;
        self.documents.push(document);
        self.enforce_cap();
        Ok(())
    }

    /// Reject `candidate` if it collides with another record on `_id` or a
    /// unique index. `skip` is the candidate's own position when updating.
    fn check_unique(
        &self,
        ns: &Namespace,
        candidate: &BsonDocument,
        skip: Option<usize>,
    ) -> StoreResult<()> {
        let others = || {
            self.documents
                .iter()
                .enumerate()
                .filter(move |(i, _)| Some(*i) != skip)
                .map(|(_, d)| d)
        };

        if let Some(id) = candidate.get("_id") {
            if others().any(|d| d.get("_id").is_some_and(|other| values_equal(other, id))) {
                return Err(StoreError::DuplicateKey {
                    namespace: ns.to_string(),
                    index: "_id_".to_string(),
                    key: format!("{{ _id: {} }}", id),
                });
            }
        }

        for index in self.indexes.iter().filter(|i| i.get_bool("unique").unwrap_or(false)) {
            let Ok(keys) = index.get_document("key") else { continue };
            let sparse = index.get_bool("sparse").unwrap_or(false);
            let key_of = |d: &BsonDocument| -> Option<Vec<Bson>> {
                let values: Vec<Option<Bson>> =
                    keys.keys().map(|path| get_path(d, path).cloned()).collect();
                if sparse && values.iter().all(Option::is_none) {
                    return None;
                }
                Some(values.into_iter().map(|v| v.unwrap_or(Bson::Null)).collect())
            };
            let Some(wanted) = key_of(candidate) else { continue };
            let collides = others().filter_map(key_of).any(|existing| {
                existing
                    .iter()
                    .zip(wanted.iter())
                    .all(|(a, b)| values_equal(a, b))
            });
            if collides {
                return Err(StoreError::DuplicateKey {
                    namespace: ns.to_string(),
                    index: index.get_str("name").unwrap_or_default().to_string(),
                    key: Bson::Array(wanted).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Evict the oldest records beyond the cap
    fn enforce_cap(&mut self) {
        let Some(cap) = self.capped else { return };
        if let Some(max) = cap.max_documents {
            while self.documents.len() as u64 > max {
                self.documents.remove(0);
            }
        }
        while self.documents.len() > 1 && self.data_size() > cap.size_bytes {
            self.documents.remove(0);
        }
    }

    fn data_size(&self) -> u64 {
        self.documents
            .iter()
            .map(|d| bson::to_vec(d).map(|bytes| bytes.len() as u64).unwrap_or(0))
            .sum()
    }

    fn matching(&self, filter: &BsonDocument) -> StoreResult<Vec<usize>> {
        let mut positions = Vec::new();
        for (i, d) in self.documents.iter().enumerate() {
            if matches(d, filter)? {
                positions.push(i);
            }
        }
        Ok(positions)
    }

    fn all_indexes(&self) -> Vec<BsonDocument> {
        let mut all = vec![id_index()];
        all.extend(self.indexes.iter().cloned());
        all
    }
}

/// In-process driver. Cheap to construct; every instance is an empty store.
#[derive(Debug)]
pub struct MemoryDriver {
    namespaces: RwLock<BTreeMap<Namespace, NamespaceState>>,
    version: String,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::with_version(DEFAULT_SERVER_VERSION)
    }

    /// Report `version` from `buildInfo`
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            namespaces: RwLock::new(BTreeMap::new()),
            version: version.into(),
        }
    }

    /// Number of records stored in `ns`
    pub fn document_count(&self, ns: &Namespace) -> usize {
        self.namespaces
            .read()
            .get(ns)
            .map_or(0, |state| state.documents.len())
    }

    /// Translate a write outcome according to `concern`
    fn acknowledge(outcome: StoreResult<BsonDocument>, concern: &WriteConcern) -> RawAck {
        if !concern.is_acknowledged() {
            return RawAck::Unacknowledged(outcome.is_ok());
        }
        match outcome {
            Ok(reply) => RawAck::Document(reply),
            Err(e) => {
                debug!(code = e.code(), error = %e, "Write rejected");
                RawAck::Document(e.to_reply())
            }
        }
    }

    fn insert_many(&self, ns: &Namespace, documents: Vec<BsonDocument>) -> StoreResult<BsonDocument> {
        let mut namespaces = self.namespaces.write();
        let state = namespaces.entry(ns.clone()).or_default();
        let mut n = 0i64;
        for document in documents {
            state.insert(ns, document)?;
            n += 1;
        }
        Ok(doc! { "ok": 1, "n": n })
    }

    fn apply_update(
        &self,
        ns: &Namespace,
        filter: &BsonDocument,
        update: &BsonDocument,
        options: UpdateOptions,
    ) -> StoreResult<BsonDocument> {
        let mut namespaces = self.namespaces.write();
        let state = namespaces.entry(ns.clone()).or_default();

        let mut positions = state.matching(filter)?;
        if !options.multiple {
            positions.truncate(1);
        }

        if positions.is_empty() {
            if !options.upsert {
                return Ok(doc! { "ok": 1, "n": 0i64, "nModified": 0i64 });
            }
            let mut seeded = upsert_seed(filter);
            apply_update(&mut seeded, update, true)?;
            if !seeded.contains_key("_id") {
                let mut with_id = doc! { "_id": ObjectId::new() };
                with_id.extend(seeded);
                seeded = with_id;
            }
            let id = seeded.get("_id").cloned().unwrap_or(Bson::Null);
            state.insert(ns, seeded)?;
            return Ok(doc! { "ok": 1, "n": 1i64, "nModified": 0i64, "upserted": id });
        }

        let mut modified = 0i64;
        for &position in &positions {
            let mut candidate = state.documents[position].clone();
            if apply_update(&mut candidate, update, false)? {
                state.check_unique(ns, &candidate, Some(position))?;
                state.documents[position] = candidate;
                modified += 1;
            }
        }
        Ok(doc! { "ok": 1, "n": positions.len() as i64, "nModified": modified })
    }

    fn apply_remove(
        &self,
        ns: &Namespace,
        filter: &BsonDocument,
        options: RemoveOptions,
    ) -> StoreResult<BsonDocument> {
        let mut namespaces = self.namespaces.write();
        let Some(state) = namespaces.get_mut(ns) else {
            return Ok(doc! { "ok": 1, "n": 0i64 });
        };
        let mut positions = state.matching(filter)?;
        if options.just_one {
            positions.truncate(1);
        }
        for position in positions.iter().rev() {
            state.documents.remove(*position);
        }
        Ok(doc! { "ok": 1, "n": positions.len() as i64 })
    }

    fn query(
        &self,
        ns: &Namespace,
        filter: &BsonDocument,
        options: &FindOptions,
    ) -> StoreResult<Vec<BsonDocument>> {
        let namespaces = self.namespaces.read();
        let Some(state) = namespaces.get(ns) else {
            return Ok(Vec::new());
        };
        let mut found: Vec<BsonDocument> = state
            .matching(filter)?
            .into_iter()
            .map(|i| state.documents[i].clone())
            .collect();
        drop(namespaces);

        if let Some(sort) = &options.sort {
            sort_documents(&mut found, sort);
        }
        let limit = options.limit.unsigned_abs() as usize;
        let shaped = found
            .into_iter()
            .skip(options.skip as usize)
            .take(if limit == 0 { usize::MAX } else { limit });

        match &options.projection {
            Some(projection) => shaped.map(|d| project(&d, projection)).collect(),
            None => Ok(shaped.collect()),
        }
    }

    fn command(&self, database: &str, command: &BsonDocument) -> StoreResult<BsonDocument> {
        let Some((name, target)) = command.iter().next() else {
            return Err(StoreError::BadValue("empty command".to_string()));
        };
        let collection = target.as_str().unwrap_or_default();
        let ns = Namespace::new(database, collection);
        let query = command.get_document("query").cloned().unwrap_or_default();
        trace!(command = %name, namespace = %ns, "Running command");

        match name.as_str() {
            "ping" => Ok(doc! { "ok": 1 }),
            "buildInfo" | "buildinfo" => Ok(doc! { "ok": 1, "version": self.version.as_str() }),
            "count" => {
                let options = FindOptions {
                    skip: command.get("skip").and_then(compare::as_f64).unwrap_or(0.0) as u64,
                    limit: command.get("limit").and_then(compare::as_f64).unwrap_or(0.0) as i64,
                    ..FindOptions::default()
                };
                let n = self.query(&ns, &query, &options)?.len() as i64;
                Ok(doc! { "ok": 1, "n": n })
            }
            "distinct" => {
                let key = command
                    .get_str("key")
                    .map_err(|_| StoreError::BadValue("distinct requires a key".to_string()))?;
                let mut values: Vec<Bson> = Vec::new();
                for record in self.query(&ns, &query, &FindOptions::default())? {
                    for value in resolve(&record, key) {
                        let unwound: Vec<&Bson> = match value {
                            Bson::Array(items) => items.iter().collect(),
                            single => vec![single],
                        };
                        for v in unwound {
                            if !values.iter().any(|seen| values_equal(seen, v)) {
                                values.push(v.clone());
                            }
                        }
                    }
                }
                Ok(doc! { "ok": 1, "values": values })
            }
            "aggregate" => {
                let stages: Vec<BsonDocument> = command
                    .get_array("pipeline")
                    .map_err(|_| StoreError::BadValue("aggregate requires a pipeline".to_string()))?
                    .iter()
                    .filter_map(|s| s.as_document().cloned())
                    .collect();
                if command.get_bool("explain").unwrap_or(false) {
                    return Ok(doc! {
                        "ok": 1,
                        "explainVersion": "1",
                        "stages": stages,
                        "serverInfo": { "version": self.version.as_str() },
                    });
                }
                let input = self.query(&ns, &BsonDocument::new(), &FindOptions::default())?;
                let foreign = |other: &str| {
                    self.query(
                        &Namespace::new(database, other),
                        &BsonDocument::new(),
                        &FindOptions::default(),
                    )
                    .unwrap_or_default()
                };
                let rows = run_pipeline(input, &stages, &foreign)?;
                Ok(doc! {
                    "ok": 1,
                    "cursor": { "id": 0i64, "ns": ns.to_string(), "firstBatch": rows },
                })
            }
            "collStats" => {
                let namespaces = self.namespaces.read();
                let state = namespaces.get(&ns).ok_or(StoreError::NamespaceNotFound)?;
                Ok(doc! {
                    "ok": 1,
                    "ns": ns.to_string(),
                    "count": state.documents.len() as i64,
                    "size": state.data_size() as i64,
                    "nindexes": state.all_indexes().len() as i64,
                    "capped": state.capped.is_some(),
                })
            }
            "validate" => {
                let namespaces = self.namespaces.read();
                let state = namespaces.get(&ns).ok_or(StoreError::NamespaceNotFound)?;
                Ok(doc! {
                    "ok": 1,
                    "ns": ns.to_string(),
                    "nrecords": state.documents.len() as i64,
                    "nIndexes": state.all_indexes().len() as i64,
                    "valid": true,
                    "full": command.get_bool("full").unwrap_or(false),
                })
            }
            "create" => {
                let mut namespaces = self.namespaces.write();
                if namespaces.contains_key(&ns) {
                    return Err(StoreError::NamespaceExists(ns.to_string()));
                }
                let capped = if command.get_bool("capped").unwrap_or(false) {
                    let size_bytes = command
                        .get("size")
                        .and_then(compare::as_f64)
                        .filter(|s| *s > 0.0)
                        .ok_or_else(|| {
                            StoreError::BadValue("the 'size' field is required when 'capped' is true".to_string())
                        })?;
                    Some(Capped {
                        size_bytes: size_bytes as u64,
                        max_documents: command
                            .get("max")
                            .and_then(compare::as_f64)
                            .filter(|m| *m > 0.0)
                            .map(|m| m as u64),
                    })
                } else {
                    None
                };
                namespaces.insert(
                    ns,
                    NamespaceState {
                        capped,
                        ..NamespaceState::default()
                    },
                );
                Ok(doc! { "ok": 1 })
            }
            other => Err(StoreError::CommandNotFound(other.to_string())),
        }
    }

    fn create_index(
        &self,
        ns: &Namespace,
        keys: BsonDocument,
        options: BsonDocument,
    ) -> StoreResult<BsonDocument> {
        let mut namespaces = self.namespaces.write();
        let state = namespaces.entry(ns.clone()).or_default();
        let before = state.all_indexes().len() as i64;

        let name = options
            .get_str("name")
            .map(str::to_string)
            .unwrap_or_else(|_| index_name(&keys));
        let mut spec = doc! { "v": 2, "key": keys.clone(), "name": name.as_str() };
        for (option, value) in options.iter().filter(|(k, _)| k.as_str() != "name") {
            spec.insert(option.clone(), value.clone());
        }

        if name == "_id_" {
            return Ok(doc! { "ok": 1, "numIndexesBefore": before, "numIndexesAfter": before });
        }
        if let Some(existing) = state
            .indexes
            .iter()
            .find(|i| i.get_str("name").ok() == Some(name.as_str()))
        {
            if existing == &spec {
                return Ok(doc! {
                    "ok": 1,
                    "numIndexesBefore": before,
                    "numIndexesAfter": before,
                    "note": "all indexes already exist",
                });
            }
            return Err(StoreError::IndexOptionsConflict(name));
        }

        state.indexes.push(spec);
        let all: Vec<BsonDocument> = state.documents.clone();
        for (position, record) in all.iter().enumerate() {
            if let Err(e) = state.check_unique(ns, record, Some(position)) {
                state.indexes.pop();
                return Err(e);
            }
        }
        debug!(namespace = %ns, index = %name, "Index created");
        Ok(doc! { "ok": 1, "numIndexesBefore": before, "numIndexesAfter": before + 1 })
    }
}

/// Equality conditions of a filter, used to seed an upserted record
fn upsert_seed(filter: &BsonDocument) -> BsonDocument {
    let mut seed = BsonDocument::new();
    for (path, condition) in filter {
        if path.starts_with('$') {
            continue;
        }
        match condition {
            Bson::Document(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                if let Some(value) = ops.get("$eq") {
                    set_path(&mut seed, path, value.clone());
                }
            }
            Bson::RegularExpression(_) => {}
            value => set_path(&mut seed, path, value.clone()),
        }
    }
    seed
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn insert(
        &self,
        ns: &Namespace,
        document: BsonDocument,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        Ok(Self::acknowledge(self.insert_many(ns, vec![document]), concern))
    }

    async fn batch_insert(
        &self,
        ns: &Namespace,
        documents: Vec<BsonDocument>,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        Ok(Self::acknowledge(self.insert_many(ns, documents), concern))
    }

    async fn update(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        let outcome = self.apply_update(ns, &filter, &update, options);
        Ok(Self::acknowledge(outcome, concern))
    }

    async fn remove(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        options: RemoveOptions,
        concern: &WriteConcern,
    ) -> Result<RawAck> {
        Ok(Self::acknowledge(self.apply_remove(ns, &filter, options), concern))
    }

    async fn find(
        &self,
        ns: &Namespace,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Vec<BsonDocument>> {
        self.query(ns, &filter, &options).map_err(|e| {
            mnemosyne_common::MnemosyneError::Command {
                code: Some(e.code()),
                message: format!("Find error: {}", e),
            }
        })
    }

    async fn run_command(
        &self,
        database: &str,
        command: BsonDocument,
        _read_preference: Option<&ReadPreference>,
    ) -> Result<BsonDocument> {
        Ok(self
            .command(database, &command)
            .unwrap_or_else(|e| e.to_reply()))
    }

    async fn ensure_index(
        &self,
        ns: &Namespace,
        keys: BsonDocument,
        options: BsonDocument,
    ) -> Result<RawAck> {
        let reply = self
            .create_index(ns, keys, options)
            .unwrap_or_else(|e| e.to_reply());
        Ok(RawAck::Document(reply))
    }

    async fn get_indexes(&self, ns: &Namespace) -> Result<Vec<BsonDocument>> {
        Ok(self
            .namespaces
            .read()
            .get(ns)
            .map(NamespaceState::all_indexes)
            .unwrap_or_default())
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<BsonDocument> {
        let removed = self.namespaces.write().remove(ns);
        Ok(match removed {
            Some(state) => doc! {
                "ok": 1,
                "ns": ns.to_string(),
                "nIndexesWas": state.all_indexes().len() as i64,
            },
            None => StoreError::NamespaceNotFound.to_reply(),
        })
    }

    fn accepts_write_concern(&self, concern: &WriteConcern) -> bool {
        match &concern.w {
            Acknowledgment::Nodes(n) => *n >= 0,
            Acknowledgment::Majority => true,
            Acknowledgment::Tag(tag) => !tag.is_empty(),
        }
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }
}
