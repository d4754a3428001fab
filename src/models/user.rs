//! User Model
//!
//! Account identity records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Stored account row
///
/// Login and email are each unique across all users. Accounts start
/// unverified and flip to verified exactly once, when a verification code
/// is consumed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    /// Unique identifier for the user
    pub id: Uuid,

    /// Unique login name
    pub login: String,

    /// Unique, normalized email address
    pub email: String,

    /// Stored form of the password produced by the configured hasher
    pub password_hash: String,

    /// Whether the email address has been confirmed
    pub verified: bool,

    /// Timestamp when the account was created
    pub created_at: DateTime<Utc>,
}

/// Public view of an account, without the password hash
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub email: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        User {
            id: record.id,
            login: record.login,
            email: record.email,
            verified: record.verified,
            created_at: record.created_at,
        }
    }
}

/// Data needed to insert a new, unverified account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub email: String,
    pub password_hash: String,
}
