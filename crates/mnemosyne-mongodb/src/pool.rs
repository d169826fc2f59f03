//! Per-collection identity cache
//!
//! While enabled, a read that resolves to an identity already in the pool
//! returns the pooled instance; reads never overwrite an entry. Disabling
//! keeps the entries, clearing keeps the flag.

use crate::document::{Document, SharedDocument};
use bson::Bson;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pool key for an identity.
///
/// Canonical extended JSON keeps the BSON type in the key, so an ObjectId and
/// the string of its hex never share an entry. 32-bit integers are widened
/// first because the store matches `5` and `5i64` as the same `_id`.
pub fn identity_key(id: &Bson) -> String {
    let id = match id {
        Bson::Int32(n) => Bson::Int64(i64::from(*n)),
        other => other.clone(),
    };
    id.into_canonical_extjson().to_string()
}

#[derive(Debug)]
pub struct DocumentPool {
    enabled: AtomicBool,
    entries: DashMap<String, SharedDocument>,
}

impl Default for DocumentPool {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DocumentPool {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            entries: DashMap::new(),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: &Bson) -> bool {
        self.entries.contains_key(&identity_key(id))
    }

    /// Pooled instance for `id`, if any
    pub fn get(&self, id: &Bson) -> Option<SharedDocument> {
        self.entries
            .get(&identity_key(id))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Return the pooled instance for `id`, or pool `candidate` and return it.
    ///
    /// An existing entry is never replaced.
    pub fn intern(&self, id: &Bson, candidate: Document) -> SharedDocument {
        let entry = self
            .entries
            .entry(identity_key(id))
            .or_insert_with(|| Arc::new(RwLock::new(candidate)));
        Arc::clone(entry.value())
    }

    /// Pool an existing handle unless the identity is already present
    pub fn intern_shared(&self, id: &Bson, shared: &SharedDocument) -> SharedDocument {
        let entry = self
            .entries
            .entry(identity_key(id))
            .or_insert_with(|| Arc::clone(shared));
        Arc::clone(entry.value())
    }

    pub fn remove(&self, id: &Bson) -> Option<SharedDocument> {
        self.entries.remove(&identity_key(id)).map(|(_, doc)| doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};
    use mnemosyne_validation::RuleSet;
    use crate::options::Namespace;

    fn hydrated(fields: bson::Document) -> Document {
        Document::hydrated(fields, RuleSet::empty(), Namespace::new("db", "c"))
    }

    #[test]
    fn test_identity_keys_keep_type() {
        let oid = ObjectId::new();
        assert_ne!(
            identity_key(&Bson::ObjectId(oid)),
            identity_key(&Bson::String(oid.to_hex()))
        );
        assert_ne!(
            identity_key(&Bson::Int32(5)),
            identity_key(&Bson::String("5".into()))
        );
        assert_eq!(identity_key(&Bson::Int32(5)), identity_key(&Bson::Int64(5)));
    }

    #[test]
    fn test_string_and_object_id_entries_are_separate() {
        let pool = DocumentPool::default();
        let oid = ObjectId::new();
        let by_oid = pool.intern(&Bson::ObjectId(oid), hydrated(doc! { "_id": oid, "kind": "oid" }));
        let by_hex = pool.intern(
            &Bson::String(oid.to_hex()),
            hydrated(doc! { "_id": oid.to_hex(), "kind": "string" }),
        );

        assert!(!Arc::ptr_eq(&by_oid, &by_hex));
        assert_eq!(pool.len(), 2);
        let pooled = pool.get(&Bson::ObjectId(oid)).unwrap();
        assert_eq!(pooled.read().get_str("kind"), Some("oid"));
    }

    #[test]
    fn test_intern_never_overwrites() {
        let pool = DocumentPool::default();
        let id = Bson::Int32(1);

        let first = pool.intern(&id, hydrated(doc! { "_id": 1, "v": "old" }));
        let second = pool.intern(&id, hydrated(doc! { "_id": 1, "v": "new" }));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.read().get_str("v"), Some("old"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_disable_keeps_entries_and_clear_keeps_flag() {
        let pool = DocumentPool::new(true);
        pool.intern(&Bson::Int32(1), hydrated(doc! { "_id": 1 }));

        pool.disable();
        assert!(!pool.is_enabled());
        assert!(!pool.is_empty());

        pool.enable();
        pool.clear();
        assert!(pool.is_empty());
        assert!(pool.is_enabled());
    }

    #[test]
    fn test_remove() {
        let pool = DocumentPool::default();
        pool.intern(&Bson::Int32(1), hydrated(doc! { "_id": 1 }));
        assert!(pool.contains(&Bson::Int32(1)));
        assert!(pool.remove(&Bson::Int32(1)).is_some());
        assert!(pool.get(&Bson::Int32(1)).is_none());
    }
}
