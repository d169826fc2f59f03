//! Format validation for common string patterns

use once_cell::sync::Lazy;
use regex::Regex;

// ============================================================================
// Pre-compiled Regex Patterns
// ============================================================================

/// Email regex pattern (RFC 5322 simplified)
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern")
});

/// URL regex pattern (http/https)
static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("url pattern")
});

// ============================================================================
// Format Validators
// ============================================================================

/// Validate email format
///
/// # Example
/// ```
/// use mnemosyne_validation::formats::validate_email;
///
/// assert!(validate_email("user@example.com"));
/// assert!(!validate_email("invalid-email"));
/// ```
pub fn validate_email(value: &str) -> bool {
    EMAIL_REGEX.is_match(value)
}

/// Validate URL format (http/https)
///
/// # Example
/// ```
/// use mnemosyne_validation::formats::validate_url;
///
/// assert!(validate_url("https://example.com"));
/// assert!(!validate_url("ftp://example.com"));
/// ```
pub fn validate_url(value: &str) -> bool {
    URL_REGEX.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email() {
        assert!(validate_email("a.b+c@mail.example.org"));
        assert!(!validate_email("user@"));
        assert!(!validate_email("@example.com"));
    }

    #[test]
    fn test_url() {
        assert!(validate_url("http://localhost:8080/path?q=1"));
        assert!(!validate_url("https://"));
        assert!(!validate_url("not a url"));
    }
}
