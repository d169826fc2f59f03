//! Identity-bearing records with a dirty delta

use crate::names::check_field_path;
use crate::operator::Operator;
use crate::options::Namespace;
use bson::{Bson, Document as BsonDocument};
use mnemosyne_common::path::{get_path, is_ancestor, remove_path, set_path};
use mnemosyne_common::{MnemosyneError, Result, Violations};
use mnemosyne_validation::RuleSet;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Document handle shared between the pool and callers
pub type SharedDocument = Arc<RwLock<Document>>;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// Built in memory, never written
    Unsaved,
    /// Built from a stored record
    Hydrated,
    /// Written by this process
    Persisted,
}

/// Pending change on one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldChange {
    Set,
    Unset,
}

/// A mutable record.
///
/// Holds its fields (including `_id` once known), the paths changed since the
/// last persist, its rule set and the namespace of the collection it belongs
/// to. The namespace is a plain name, never an owning reference.
///
/// No internal synchronization: share across threads through
/// [`SharedDocument`] or another external lock.
#[derive(Debug, Clone)]
pub struct Document {
    fields: BsonDocument,
    changes: BTreeMap<String, FieldChange>,
    state: DocumentState,
    rules: RuleSet,
    namespace: Option<Namespace>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An unsaved, unbound document with no rules
    pub fn new() -> Self {
        Self {
            fields: BsonDocument::new(),
            changes: BTreeMap::new(),
            state: DocumentState::Unsaved,
            rules: RuleSet::empty(),
            namespace: None,
        }
    }

    /// An unsaved document bound to a collection and its rules.
    ///
    /// Every initial top-level field is recorded as changed.
    pub fn unsaved(fields: BsonDocument, rules: RuleSet, namespace: Namespace) -> Result<Self> {
        let mut doc = Self {
            rules,
            namespace: Some(namespace),
            ..Self::new()
        };
        for (key, value) in fields {
            doc.set(&key, value)?;
        }
        Ok(doc)
    }

    /// A document built from a stored record
    pub(crate) fn hydrated(fields: BsonDocument, rules: RuleSet, namespace: Namespace) -> Self {
        Self {
            fields,
            changes: BTreeMap::new(),
            state: DocumentState::Hydrated,
            rules,
            namespace: Some(namespace),
        }
    }

    pub fn get(&self, path: &str) -> Option<&Bson> {
        get_path(&self.fields, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Bson::as_str)
    }

    /// Set a dotted path and record it in the delta.
    ///
    /// # Errors
    /// `InvalidArgument` for a malformed path, or for changing `_id` once
    /// the document has been stored.
    pub fn set(&mut self, path: &str, value: impl Into<Bson>) -> Result<&mut Self> {
        check_field_path(path)?;
        if path == "_id" && self.state != DocumentState::Unsaved {
            return Err(MnemosyneError::InvalidArgument(
                "_id of a stored document cannot change".to_string(),
            ));
        }
        set_path(&mut self.fields, path, value.into());
        self.record(path, FieldChange::Set);
        Ok(self)
    }

    /// Remove a dotted path and record the removal in the delta
    pub fn unset(&mut self, path: &str) -> Result<&mut Self> {
        check_field_path(path)?;
        if path == "_id" {
            return Err(MnemosyneError::InvalidArgument(
                "_id cannot be unset".to_string(),
            ));
        }
        remove_path(&mut self.fields, path);
        self.record(path, FieldChange::Unset);
        Ok(self)
    }

    /// Set every top-level field of `fields`
    pub fn merge(&mut self, fields: BsonDocument) -> Result<&mut Self> {
        for (key, value) in fields {
            self.set(&key, value)?;
        }
        Ok(self)
    }

    /// Snapshot of all fields
    pub fn to_document(&self) -> BsonDocument {
        self.fields.clone()
    }

    pub fn fields(&self) -> &BsonDocument {
        &self.fields
    }

    pub fn id(&self) -> Option<&Bson> {
        self.fields.get("_id")
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    /// True once the document exists in the store
    pub fn is_saved(&self) -> bool {
        self.state != DocumentState::Unsaved
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Pending changes, ordered by path
    pub fn changes(&self) -> impl Iterator<Item = (&str, FieldChange)> {
        self.changes.iter().map(|(path, change)| (path.as_str(), *change))
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Run the rule set over the current fields
    pub fn validate(&self) -> Violations {
        self.rules.validate(&self.fields)
    }

    /// Partial update covering exactly the pending delta
    pub fn delta_operator(&self) -> Operator {
        let mut op = Operator::new();
        for (path, change) in &self.changes {
            match change {
                FieldChange::Set => {
                    let value = get_path(&self.fields, path).cloned().unwrap_or(Bson::Null);
                    op.set(path, value);
                }
                FieldChange::Unset => {
                    op.unset(path);
                }
            }
        }
        op
    }

    pub(crate) fn assign_id(&mut self, id: Bson) {
        self.fields.insert("_id", id);
    }

    pub(crate) fn bind(&mut self, rules: RuleSet, namespace: Namespace) {
        self.rules = rules;
        self.namespace = Some(namespace);
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.changes.clear();
        self.state = DocumentState::Persisted;
    }

    /// Replace all fields with a freshly read record and drop the delta
    pub(crate) fn replace_fields(&mut self, fields: BsonDocument) {
        self.fields = fields;
        self.changes.clear();
        self.state = DocumentState::Hydrated;
    }

    /// Record a change, consolidating with ancestors and descendants.
    ///
    /// A recorded ancestor already covers `path` and becomes a set. A change
    /// on `path` supersedes every recorded descendant.
    fn record(&mut self, path: &str, change: FieldChange) {
        let ancestor = self
            .changes
            .keys()
            .find(|recorded| is_ancestor(recorded, path))
            .cloned();
        if let Some(ancestor) = ancestor {
            self.changes.insert(ancestor, FieldChange::Set);
            return;
        }
        self.changes.retain(|recorded, _| !is_ancestor(path, recorded));
        self.changes.insert(path.to_string(), change);
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}
