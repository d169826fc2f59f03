//! Error types for mnemosyne

use crate::violation::Violations;
use thiserror::Error;

/// Result type alias for mnemosyne operations
pub type Result<T> = std::result::Result<T, MnemosyneError>;

/// Unified error type for all mnemosyne operations
#[derive(Error, Debug, Clone)]
pub enum MnemosyneError {
    /// Bad client, connection or write-concern setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Document failed its declared rules; carries every violation found
    #[error("Validation failed: {0}")]
    ValidationFailed(Violations),

    /// Malformed builder input (pipeline shape, index keys, operand type)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store rejected a write. The message is already composed
    /// as `<operation> error[: <err>][: <errmsg>]`.
    #[error("{message}")]
    WriteError { code: Option<i32>, message: String },

    /// The store rejected a non-write command (aggregate, distinct, ...)
    #[error("{message}")]
    Command { code: Option<i32>, message: String },

    /// Server version lacks a requested capability
    #[error("{0}")]
    Unsupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Failure raised by the driver layer itself, passed through unchanged
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MnemosyneError {
    /// Shorthand for a store-reported write failure
    pub fn write(code: Option<i32>, message: impl Into<String>) -> Self {
        MnemosyneError::WriteError {
            code,
            message: message.into(),
        }
    }

    /// Returns true if the store rejected a write
    pub fn is_write_error(&self) -> bool {
        matches!(self, MnemosyneError::WriteError { .. })
    }

    /// Returns true if the error carries a violation set
    pub fn is_validation(&self) -> bool {
        matches!(self, MnemosyneError::ValidationFailed(_))
    }

    /// Store-assigned error code, when the store reported one
    pub fn code(&self) -> Option<i32> {
        match self {
            MnemosyneError::WriteError { code, .. } | MnemosyneError::Command { code, .. } => {
                *code
            }
            _ => None,
        }
    }

    /// Violations carried by a validation failure
    pub fn violations(&self) -> Option<&Violations> {
        match self {
            MnemosyneError::ValidationFailed(v) => Some(v),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MnemosyneError {
    fn from(err: serde_json::Error) -> Self {
        MnemosyneError::Serialization(err.to_string())
    }
}

impl From<bson::ser::Error> for MnemosyneError {
    fn from(err: bson::ser::Error) -> Self {
        MnemosyneError::Serialization(format!("BSON serialization error: {}", err))
    }
}

impl From<bson::de::Error> for MnemosyneError {
    fn from(err: bson::de::Error) -> Self {
        MnemosyneError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

impl From<bson::oid::Error> for MnemosyneError {
    fn from(err: bson::oid::Error) -> Self {
        MnemosyneError::InvalidArgument(format!("Invalid ObjectId: {}", err))
    }
}

// Driver-level failures surface as transport errors (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for MnemosyneError {
    fn from(err: mongodb::error::Error) -> Self {
        MnemosyneError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::violation::Violation;

    #[test]
    fn test_error_display_configuration() {
        let err = MnemosyneError::Configuration("Error setting write concern".to_string());
        assert_eq!(err.to_string(), "Configuration error: Error setting write concern");
    }

    #[test]
    fn test_error_display_write_error_is_bare_message() {
        let err = MnemosyneError::write(Some(11000), "Insert error: E: boom");
        assert_eq!(err.to_string(), "Insert error: E: boom");
        assert_eq!(err.code(), Some(11000));
    }

    #[test]
    fn test_error_display_command() {
        let err = MnemosyneError::Command {
            code: None,
            message: "Aggregate error: some_error".to_string(),
        };
        assert_eq!(err.to_string(), "Aggregate error: some_error");
    }

    #[test]
    fn test_error_display_invalid_argument() {
        let err = MnemosyneError::InvalidArgument("wrong pipelines specified".to_string());
        assert_eq!(err.to_string(), "Invalid argument: wrong pipelines specified");
    }

    #[test]
    fn test_error_display_unsupported() {
        let err = MnemosyneError::Unsupported(
            "Explain of aggregation implemented only from 2.6.0".to_string(),
        );
        assert_eq!(
            err.to_string(),
            "Explain of aggregation implemented only from 2.6.0"
        );
    }

    #[test]
    fn test_error_display_transport() {
        let err = MnemosyneError::Transport("connection reset".to_string());
        assert_eq!(err.to_string(), "Transport error: connection reset");
    }

    #[test]
    fn test_validation_failed_carries_violations() {
        let mut violations = Violations::new();
        violations.add(Violation::new("email", "required", "Field required"));
        let err = MnemosyneError::ValidationFailed(violations);

        assert!(err.is_validation());
        assert!(!err.is_write_error());
        assert_eq!(err.violations().map(|v| v.len()), Some(1));
        assert!(err.to_string().starts_with("Validation failed: "));
    }

    #[test]
    fn test_code_absent_for_other_kinds() {
        assert_eq!(MnemosyneError::NotFound("x".to_string()).code(), None);
        assert_eq!(MnemosyneError::write(None, "Insert error").code(), None);
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: MnemosyneError = json_err.into();
        assert!(matches!(err, MnemosyneError::Serialization(_)));
    }

    #[test]
    fn test_from_oid_error() {
        let oid_err = bson::oid::ObjectId::parse_str("not-an-id").unwrap_err();
        let err: MnemosyneError = oid_err.into();
        assert!(matches!(err, MnemosyneError::InvalidArgument(_)));
    }
}
