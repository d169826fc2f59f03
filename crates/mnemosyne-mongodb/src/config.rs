//! Client-wide configuration

use crate::write_concern::WriteConcern;
use mnemosyne_common::Result;
use serde::Deserialize;

/// Minimum server version that supports explaining an aggregation
pub const MIN_EXPLAIN_VERSION: &str = "2.6.0";

/// Settings shared by every database and collection handed out by a client
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Write concern new collections start with
    pub write_concern: WriteConcern,
    /// Whether new collections start with the document pool enabled
    pub document_pool_enabled: bool,
    /// Server version required by `explain_aggregate`
    pub min_explain_version: String,
    /// Emit rendered filters/updates/pipelines at debug level
    pub log_payloads: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            write_concern: WriteConcern::default(),
            document_pool_enabled: true,
            min_explain_version: MIN_EXPLAIN_VERSION.to_string(),
            log_payloads: true,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON settings object; absent keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = write_concern;
        self
    }

    pub fn with_document_pool(mut self, enabled: bool) -> Self {
        self.document_pool_enabled = enabled;
        self
    }

    pub fn with_min_explain_version(mut self, version: impl Into<String>) -> Self {
        self.min_explain_version = version.into();
        self
    }

    pub fn with_log_payloads(mut self, enabled: bool) -> Self {
        self.log_payloads = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.document_pool_enabled);
        assert!(config.log_payloads);
        assert_eq!(config.min_explain_version, "2.6.0");
        assert!(config.write_concern.is_acknowledged());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ClientConfig::from_json(r#"{"document_pool_enabled": false}"#).unwrap();
        assert!(!config.document_pool_enabled);
        assert_eq!(config.write_concern, WriteConcern::default());
    }

    #[test]
    fn test_write_concern_from_json() {
        let config = ClientConfig::from_json(
            r#"{"write_concern": {"w": "majority", "wtimeout": 500}, "log_payloads": false}"#,
        )
        .unwrap();
        assert_eq!(config.write_concern, WriteConcern::majority(500));
        assert!(!config.log_payloads);
        assert!(ClientConfig::from_json("{").is_err());
    }
}
