//! Index declarations

use bson::{doc, Bson, Document as BsonDocument};
use mnemosyne_common::{MnemosyneError, Result};

/// Index options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub unique: bool,
    pub sparse: bool,
    pub ttl_seconds: Option<u64>,
    pub background: bool,
    /// Legacy: drop documents that violate a new unique index
    pub drop_dups: bool,
    pub name: Option<String>,
}

impl IndexOptions {
    /// Wire form; only options that are switched on are rendered
    pub fn to_document(&self) -> BsonDocument {
        let mut options = BsonDocument::new();
        if self.unique {
            options.insert("unique", true);
        }
        if self.sparse {
            options.insert("sparse", true);
        }
        if let Some(ttl) = self.ttl_seconds {
            options.insert("expireAfterSeconds", ttl as i64);
        }
        if self.background {
            options.insert("background", true);
        }
        if self.drop_dups {
            options.insert("dropDups", true);
        }
        if let Some(name) = &self.name {
            options.insert("name", name.as_str());
        }
        options
    }
}

/// One entry of a collection's index table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexDeclaration {
    /// Field path to direction; `None` is a declaration error
    pub keys: Option<BsonDocument>,
    pub options: IndexOptions,
}

impl IndexDeclaration {
    pub fn new(keys: BsonDocument) -> Self {
        Self {
            keys: Some(keys),
            options: IndexOptions::default(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.options.sparse = true;
        self
    }

    pub fn ttl(mut self, seconds: u64) -> Self {
        self.options.ttl_seconds = Some(seconds);
        self
    }

    pub fn background(mut self) -> Self {
        self.options.background = true;
        self
    }

    pub fn drop_dups(mut self) -> Self {
        self.options.drop_dups = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Checked key spec
    pub fn keys(&self) -> Result<&BsonDocument> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| MnemosyneError::InvalidArgument("keys not specified".to_string()))?;
        check_keys(keys)?;
        Ok(keys)
    }
}

/// Validate a key spec: non-empty, each direction 1, -1 or a named index type
pub fn check_keys(keys: &BsonDocument) -> Result<()> {
    if keys.is_empty() {
        return Err(MnemosyneError::InvalidArgument(
            "keys not specified".to_string(),
        ));
    }
    for (field, direction) in keys.iter() {
        let valid = match direction {
            Bson::Int32(d) => *d == 1 || *d == -1,
            Bson::Int64(d) => *d == 1 || *d == -1,
            Bson::Double(d) => *d == 1.0 || *d == -1.0,
            Bson::String(kind) => matches!(kind.as_str(), "2d" | "2dsphere" | "text" | "hashed"),
            _ => false,
        };
        if !valid {
            return Err(MnemosyneError::InvalidArgument(format!(
                "invalid direction for index key '{}': {}",
                field, direction
            )));
        }
    }
    Ok(())
}

/// Default index name, `field_1_other_-1`
pub fn index_name(keys: &BsonDocument) -> String {
    keys.iter()
        .map(|(field, direction)| {
            let direction = match direction {
                Bson::Int32(d) => d.to_string(),
                Bson::Int64(d) => d.to_string(),
                Bson::Double(d) => (*d as i64).to_string(),
                Bson::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}_{}", field, direction)
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// The index every collection carries
pub fn id_index() -> BsonDocument {
    doc! { "v": 2, "key": { "_id": 1 }, "name": "_id_" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_render() {
        let decl = IndexDeclaration::new(doc! { "createdAt": 1 }).ttl(3600).background();
        assert_eq!(
            decl.options.to_document(),
            doc! { "expireAfterSeconds": 3600i64, "background": true }
        );
    }

    #[test]
    fn test_missing_keys() {
        let decl = IndexDeclaration::default();
        let err = decl.keys().unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: keys not specified");
    }

    #[test]
    fn test_check_keys() {
        assert!(check_keys(&doc! { "a": 1, "b": -1 }).is_ok());
        assert!(check_keys(&doc! { "loc": "2dsphere" }).is_ok());
        assert!(check_keys(&doc! { "a": 2 }).is_err());
        assert!(check_keys(&doc! { "a": "sideways" }).is_err());
        assert!(check_keys(&doc! {}).is_err());
    }

    #[test]
    fn test_index_name() {
        assert_eq!(index_name(&doc! { "a": 1, "b": -1 }), "a_1_b_-1");
        assert_eq!(index_name(&doc! { "body": "text" }), "body_text");
    }
}
