//! Validation Utilities
//!
//! Input validation helpers shared by the inbound request payloads.

use regex::Regex;
use std::sync::OnceLock;
use validator::ValidationError;

/// Maximum accepted email length
pub const MAX_EMAIL_LENGTH: usize = 255;

/// Validates email address format
pub fn validate_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    let trimmed = email.trim();
    trimmed.len() >= 3 && trimmed.len() <= MAX_EMAIL_LENGTH && regex.is_match(trimmed)
}

/// Normalizes email address to lowercase and removes whitespace
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validates that a login has no surrounding or embedded whitespace
pub fn validate_login(login: &str) -> bool {
    !login.is_empty() && !login.chars().any(char::is_whitespace)
}

/// Custom validator for email fields using the validator crate
pub fn email_validator(email: &str) -> Result<(), ValidationError> {
    if validate_email(email) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_email"))
    }
}

/// Custom validator for login fields using the validator crate
pub fn login_validator(login: &str) -> Result<(), ValidationError> {
    if validate_login(login) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_login"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("test.user+tag@domain.co.uk"));
        assert!(validate_email("  a@b.com  "));
        assert!(!validate_email("invalid.email"));
        assert!(!validate_email("@domain.com"));
        assert!(!validate_email("user@"));
        assert!(!validate_email(""));
        assert!(!validate_email(&format!("{}@example.com", "a".repeat(250))));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  USER@EXAMPLE.COM  "), "user@example.com");
        assert_eq!(normalize_email("Test@Domain.org"), "test@domain.org");
    }

    #[test]
    fn test_validate_login() {
        assert!(validate_login("root"));
        assert!(validate_login("user_01"));
        assert!(!validate_login(""));
        assert!(!validate_login("two words"));
        assert!(!validate_login(" root"));
    }
}
