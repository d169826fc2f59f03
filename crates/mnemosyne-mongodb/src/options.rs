//! Request options passed across the driver boundary

use bson::{doc, Bson, Document as BsonDocument};
use std::collections::BTreeMap;
use std::fmt;

/// Fully qualified collection name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Options for `update`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Apply to every matching document instead of the first
    pub multiple: bool,
    /// Insert a new document when nothing matches
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn multiple() -> Self {
        Self {
            multiple: true,
            upsert: false,
        }
    }

    pub fn upsert() -> Self {
        Self {
            multiple: false,
            upsert: true,
        }
    }
}

/// Options for `remove`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub just_one: bool,
}

/// Server selection mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadMode::Primary => "primary",
            ReadMode::PrimaryPreferred => "primaryPreferred",
            ReadMode::Secondary => "secondary",
            ReadMode::SecondaryPreferred => "secondaryPreferred",
            ReadMode::Nearest => "nearest",
        }
    }
}

pub type TagSet = BTreeMap<String, String>;

/// Read preference applied to find, count and distinct
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadPreference {
    pub mode: ReadMode,
    pub tags: Vec<TagSet>,
}

impl ReadPreference {
    pub fn new(mode: ReadMode, tags: Vec<TagSet>) -> Self {
        Self { mode, tags }
    }

    pub fn primary() -> Self {
        Self::default()
    }

    /// `{mode, tags}` as reported by `Collection::read_preference`
    pub fn to_document(&self) -> BsonDocument {
        let tags: Vec<Bson> = self
            .tags
            .iter()
            .map(|set| {
                Bson::Document(
                    set.iter()
                        .map(|(k, v)| (k.clone(), Bson::String(v.clone())))
                        .collect(),
                )
            })
            .collect();
        doc! { "mode": self.mode.as_str(), "tags": tags }
    }
}

/// Options for `find`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<BsonDocument>,
    pub skip: u64,
    /// 0 means no limit
    pub limit: i64,
    pub projection: Option<BsonDocument>,
    pub read_preference: ReadPreference,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_display() {
        assert_eq!(Namespace::new("shop", "orders").to_string(), "shop.orders");
    }

    #[test]
    fn test_read_preference_document() {
        let mut tags = TagSet::new();
        tags.insert("dc".to_string(), "east".to_string());
        let pref = ReadPreference::new(ReadMode::Nearest, vec![tags]);
        assert_eq!(
            pref.to_document(),
            doc! { "mode": "nearest", "tags": [{ "dc": "east" }] }
        );
    }
}
