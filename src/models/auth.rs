//! Authentication Models
//!
//! Data structures for JWT tokens and per-device session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-device refresh-token record
///
/// Keyed by `(user_id, device_id)`: a device holds at most one live record,
/// and signing in again on the same device overwrites it. Only the SHA-256
/// digest of the refresh token is stored.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    /// Reference to the user who owns this session
    pub user_id: Uuid,

    /// Caller-supplied device identifier
    pub device_id: String,

    /// Hashed refresh token (SHA-256 hex)
    pub token_hash: String,

    /// Timestamp when the session expires
    pub expires_at: DateTime<Utc>,

    /// Timestamp when the current token was issued
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Check if the session is past its validity at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Remaining validity at `now` (negative once expired)
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at - now
    }
}

/// JWT token pair containing access and refresh tokens
///
/// Returned when a user signs in or refreshes a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Short-lived access token for API authentication
    pub access_token: String,

    /// Long-lived refresh token for obtaining new access tokens
    pub refresh_token: String,

    /// Token type (always "Bearer" for JWT)
    pub token_type: String,

    /// Access token expiration time in seconds
    pub expires_in: i64,
}

impl TokenPair {
    /// Create a new token pair
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

/// Signing domain of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenNamespace {
    Access,
    Refresh,
}

impl TokenNamespace {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenNamespace::Access => "access",
            TokenNamespace::Refresh => "refresh",
        }
    }
}

/// JWT claims shared by access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - user ID
    pub sub: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// JWT ID - unique token identifier
    pub jti: String,

    /// Which signing domain issued the token
    #[serde(rename = "type")]
    pub token_type: TokenNamespace,
}

impl TokenClaims {
    pub fn new(
        namespace: TokenNamespace,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: user_id.to_string(),
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: namespace,
        }
    }
}

/// A freshly signed token
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Identity extracted from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    /// User ID extracted from token subject
    pub user_id: Uuid,

    /// Token ID for tracking
    pub token_id: String,

    /// Token expiration time
    pub expires_at: DateTime<Utc>,
}

impl UserContext {
    /// Build a context from verified claims
    pub fn from_claims(claims: &TokenClaims) -> Result<Self, uuid::Error> {
        Ok(Self {
            user_id: Uuid::parse_str(&claims.sub)?,
            token_id: claims.jti.clone(),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC),
        })
    }
}
