//! Error Handling Utilities
//!
//! Error taxonomy for the session core. Callers only ever see the
//! [`ErrorKind`] of a failure; internal causes stay in the logs.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error returned by every [`SessionService`](crate::service::SessionService) operation
#[derive(Error, Debug)]
pub enum SessionError {
    /// Unknown user, verification code or session
    #[error("Resource not found")]
    NotFound,

    /// Login or email already belongs to a verified account
    #[error("Account already exists")]
    AlreadyExists,

    /// Login/password pair did not match any account
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Credentials are valid but the account has not been confirmed
    #[error("Account not verified")]
    NotVerified,

    /// Refresh token is past its validity; the caller must sign in again
    #[error("Token expired")]
    TokenExpired,

    /// Malformed, forged, unknown or wrong-namespace token
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Inbound payload failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Too many attempts for this identifier in the current window
    #[error("Rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    /// The account was committed but the verification mail could not be sent
    #[error("Notification error: {0}")]
    Notification(String),

    /// The operation did not finish before its deadline
    #[error("Operation timed out")]
    Timeout,

    /// Storage, signing or other infrastructure failure
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// The boundary-safe classification of a [`SessionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidCredentials,
    NotVerified,
    TokenExpired,
    InvalidToken,
    Validation,
    RateLimited,
    Notification,
    Timeout,
    Unexpected,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorKind::NotVerified => "NOT_VERIFIED",
            ErrorKind::TokenExpired => "TOKEN_EXPIRED",
            ErrorKind::InvalidToken => "INVALID_TOKEN",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::RateLimited => "RATE_LIMIT_EXCEEDED",
            ErrorKind::Notification => "NOTIFICATION_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Unexpected => "INTERNAL_ERROR",
        }
    }

    /// Generic user-facing message; never includes internal detail
    pub fn public_message(self) -> &'static str {
        match self {
            // Unknown user/code/token all read the same to avoid leaking existence
            ErrorKind::NotFound | ErrorKind::InvalidToken => "Invalid or unknown credentials",
            ErrorKind::AlreadyExists => "An account with these details already exists",
            ErrorKind::InvalidCredentials => "Invalid login or password",
            ErrorKind::NotVerified => "Account has not been verified",
            ErrorKind::TokenExpired => "Session expired, please sign in again",
            ErrorKind::Validation => "Request data is invalid",
            ErrorKind::RateLimited => "Too many attempts, try again later",
            ErrorKind::Notification => "Account created but the verification email could not be sent",
            ErrorKind::Timeout => "The request took too long, try again",
            ErrorKind::Unexpected => "An internal error occurred",
        }
    }

    /// Whether the caller counts as unauthenticated for this failure
    pub fn is_unauthenticated(self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound
                | ErrorKind::InvalidCredentials
                | ErrorKind::TokenExpired
                | ErrorKind::InvalidToken
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl SessionError {
    /// Classify this error for the caller
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotFound => ErrorKind::NotFound,
            SessionError::AlreadyExists => ErrorKind::AlreadyExists,
            SessionError::InvalidCredentials => ErrorKind::InvalidCredentials,
            SessionError::NotVerified => ErrorKind::NotVerified,
            SessionError::TokenExpired => ErrorKind::TokenExpired,
            SessionError::InvalidToken(_) => ErrorKind::InvalidToken,
            SessionError::Validation(_) => ErrorKind::Validation,
            SessionError::RateLimited { .. } => ErrorKind::RateLimited,
            SessionError::Notification(_) => ErrorKind::Notification,
            SessionError::Timeout => ErrorKind::Timeout,
            SessionError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

impl From<validator::ValidationErrors> for SessionError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();

        for (field, errors) in err.field_errors() {
            for error in errors {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("invalid value for field '{}'", field));
                messages.push(format!("{}: {}", field, message));
            }
        }
        messages.sort();

        SessionError::Validation(messages.join(", "))
    }
}

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Boundary representation of an error: the kind and a generic message only
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            error: kind.code().to_string(),
            message: kind.public_message().to_string(),
            retry_after_seconds: None,
        }
    }
}

impl From<&SessionError> for ErrorResponse {
    fn from(err: &SessionError) -> Self {
        let mut response = ErrorResponse::new(err.kind());
        if let SessionError::RateLimited {
            retry_after_seconds,
        } = err
        {
            response.retry_after_seconds = Some(*retry_after_seconds);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_hides_internal_detail() {
        let err = SessionError::Unexpected("connection reset by peer at 10.0.0.3".to_string());
        let response = ErrorResponse::from(&err);

        assert_eq!(response.error, "INTERNAL_ERROR");
        assert!(!response.message.contains("10.0.0.3"));
        assert!(response.retry_after_seconds.is_none());
    }

    #[test]
    fn test_error_response_rate_limited() {
        let err = SessionError::RateLimited {
            retry_after_seconds: 42,
        };
        let response = ErrorResponse::from(&err);

        assert_eq!(response.error, "RATE_LIMIT_EXCEEDED");
        assert_eq!(response.retry_after_seconds, Some(42));
    }

    #[test]
    fn test_not_found_and_invalid_token_read_the_same() {
        let not_found = ErrorResponse::from(&SessionError::NotFound);
        let invalid = ErrorResponse::from(&SessionError::InvalidToken("bad signature".into()));

        assert_eq!(not_found.message, invalid.message);
        assert!(ErrorKind::NotFound.is_unauthenticated());
        assert!(!ErrorKind::Unexpected.is_unauthenticated());
    }

    #[test]
    fn test_error_kind_serializes_as_code() {
        let json = serde_json::to_string(&ErrorKind::TokenExpired).unwrap();
        assert_eq!(json, "\"TOKEN_EXPIRED\"");
        assert_eq!(ErrorKind::TokenExpired.to_string(), "TOKEN_EXPIRED");
    }

    #[test]
    fn test_session_error_display() {
        let error = SessionError::Validation("email: invalid".to_string());
        assert_eq!(error.to_string(), "Validation error: email: invalid");
    }
}
