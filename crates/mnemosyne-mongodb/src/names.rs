//! Collection and field name checks
//!
//! Names are rejected before they reach the store so that a malformed name
//! never produces a partial write.

use mnemosyne_common::{MnemosyneError, Result};
use tracing::warn;

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Maximum allowed length for field paths
const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Check a collection name.
///
/// # Errors
/// `InvalidArgument` if the name is empty, longer than 120 characters,
/// contains a null byte or `$`, or starts with `system.`.
pub fn check_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MnemosyneError::InvalidArgument(
            "Collection name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_COLLECTION_NAME_LENGTH {
        return Err(MnemosyneError::InvalidArgument(format!(
            "Collection name exceeds maximum length of {} characters: '{}'",
            MAX_COLLECTION_NAME_LENGTH, name
        )));
    }

    if name.contains('\0') {
        return Err(MnemosyneError::InvalidArgument(
            "Collection name cannot contain null bytes".to_string(),
        ));
    }

    if name.starts_with("system.") {
        return Err(MnemosyneError::InvalidArgument(format!(
            "Collection name cannot start with 'system.' (reserved): '{}'",
            name
        )));
    }

    if name.contains('$') {
        return Err(MnemosyneError::InvalidArgument(format!(
            "Collection name cannot contain '$' character: '{}'",
            name
        )));
    }

    if name.contains("..") {
        warn!(collection = name, "Collection name contains suspicious pattern");
    }

    Ok(())
}

/// Check a database name
pub fn check_database_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MnemosyneError::InvalidArgument(
            "Database name cannot be empty".to_string(),
        ));
    }
    if let Some(c) = name.chars().find(|c| "/\\. \"$\0".contains(*c)) {
        return Err(MnemosyneError::InvalidArgument(format!(
            "Database name cannot contain {:?}: '{}'",
            c, name
        )));
    }
    Ok(())
}

/// Check a dotted document field path.
///
/// Every segment must be non-empty, free of null bytes and must not start
/// with `$`.
pub fn check_field_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(MnemosyneError::InvalidArgument(
            "Field name cannot be empty".to_string(),
        ));
    }

    if path.len() > MAX_FIELD_NAME_LENGTH {
        return Err(MnemosyneError::InvalidArgument(format!(
            "Field name exceeds maximum length of {} characters",
            MAX_FIELD_NAME_LENGTH
        )));
    }

    if path.contains('\0') {
        return Err(MnemosyneError::InvalidArgument(
            "Field name cannot contain null bytes".to_string(),
        ));
    }

    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(MnemosyneError::InvalidArgument(format!(
                "Field path has an empty segment: '{}'",
                path
            )));
        }
        if segment.starts_with('$') {
            return Err(MnemosyneError::InvalidArgument(format!(
                "Field name cannot start with '$' (reserved for operators): '{}'",
                path
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_collection_names() {
        assert!(check_collection_name("users").is_ok());
        assert!(check_collection_name("user_profiles").is_ok());
        assert!(check_collection_name("fs.files").is_ok());
    }

    #[test]
    fn test_invalid_collection_names() {
        assert!(check_collection_name("").is_err());
        assert!(check_collection_name("system.users").is_err());
        assert!(check_collection_name("users$").is_err());
        assert!(check_collection_name("a\0b").is_err());
        assert!(check_collection_name(&"a".repeat(121)).is_err());
    }

    #[test]
    fn test_database_names() {
        assert!(check_database_name("shop").is_ok());
        assert!(check_database_name("").is_err());
        assert!(check_database_name("a.b").is_err());
        assert!(check_database_name("a/b").is_err());
    }

    #[test]
    fn test_field_paths() {
        assert!(check_field_path("name").is_ok());
        assert!(check_field_path("address.city").is_ok());
        assert!(check_field_path("tags.0").is_ok());

        let err = check_field_path("$where").unwrap_err();
        assert!(matches!(err, MnemosyneError::InvalidArgument(_)));
        assert!(check_field_path("a.$b").is_err());
        assert!(check_field_path("a..b").is_err());
        assert!(check_field_path("").is_err());
    }
}
