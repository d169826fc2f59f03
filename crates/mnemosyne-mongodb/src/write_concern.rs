//! Write concern model

use bson::{doc, Bson, Document as BsonDocument};
use serde::{Deserialize, Serialize};

/// Default `wtimeout` in milliseconds
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// The `w` component of a write concern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawW", into = "RawW")]
pub enum Acknowledgment {
    /// Number of nodes; 0 disables acknowledgement
    Nodes(i32),
    Majority,
    /// Custom tag set name
    Tag(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawW {
    Nodes(i32),
    Name(String),
}

impl From<RawW> for Acknowledgment {
    fn from(raw: RawW) -> Self {
        match raw {
            RawW::Nodes(n) => Acknowledgment::Nodes(n),
            RawW::Name(name) => Acknowledgment::from(name.as_str()),
        }
    }
}

impl From<Acknowledgment> for RawW {
    fn from(w: Acknowledgment) -> Self {
        match w {
            Acknowledgment::Nodes(n) => RawW::Nodes(n),
            Acknowledgment::Majority => RawW::Name("majority".to_string()),
            Acknowledgment::Tag(tag) => RawW::Name(tag),
        }
    }
}

impl From<i32> for Acknowledgment {
    fn from(n: i32) -> Self {
        Acknowledgment::Nodes(n)
    }
}

impl From<&str> for Acknowledgment {
    fn from(name: &str) -> Self {
        if name == "majority" {
            Acknowledgment::Majority
        } else {
            Acknowledgment::Tag(name.to_string())
        }
    }
}

impl From<&Acknowledgment> for Bson {
    fn from(w: &Acknowledgment) -> Self {
        match w {
            Acknowledgment::Nodes(n) => Bson::Int32(*n),
            Acknowledgment::Majority => Bson::String("majority".to_string()),
            Acknowledgment::Tag(tag) => Bson::String(tag.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConcern {
    pub w: Acknowledgment,
    #[serde(rename = "wtimeout")]
    pub timeout_ms: u64,
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self {
            w: Acknowledgment::Nodes(1),
            timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl WriteConcern {
    pub fn new(w: impl Into<Acknowledgment>, timeout_ms: u64) -> Self {
        Self {
            w: w.into(),
            timeout_ms,
        }
    }

    /// `w=0`
    pub fn unacknowledged(timeout_ms: u64) -> Self {
        Self::new(0, timeout_ms)
    }

    /// `w="majority"`
    pub fn majority(timeout_ms: u64) -> Self {
        Self::new(Acknowledgment::Majority, timeout_ms)
    }

    /// False only for `w=0`
    pub fn is_acknowledged(&self) -> bool {
        self.w != Acknowledgment::Nodes(0)
    }

    /// Wire form `{w, wtimeout}`
    pub fn to_document(&self) -> BsonDocument {
        doc! {
            "w": Bson::from(&self.w),
            "wtimeout": self.timeout_ms as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_acknowledged() {
        let wc = WriteConcern::default();
        assert!(wc.is_acknowledged());
        assert_eq!(wc.to_document(), doc! { "w": 1, "wtimeout": 10000i64 });
    }

    #[test]
    fn test_unacknowledged_and_majority() {
        assert!(!WriteConcern::unacknowledged(500).is_acknowledged());
        assert_eq!(
            WriteConcern::majority(10_000).to_document(),
            doc! { "w": "majority", "wtimeout": 10000i64 }
        );
    }

    #[test]
    fn test_deserialize_from_json() {
        let wc: WriteConcern = serde_json::from_str(r#"{"w":"majority","wtimeout":250}"#).unwrap();
        assert_eq!(wc, WriteConcern::majority(250));

        let wc: WriteConcern = serde_json::from_str(r#"{"w":"dc-east","wtimeout":1}"#).unwrap();
        assert_eq!(wc.w, Acknowledgment::Tag("dc-east".to_string()));

        let wc: WriteConcern = serde_json::from_str(r#"{"w":0,"wtimeout":1}"#).unwrap();
        assert!(!wc.is_acknowledged());
    }
}
