//! Verification Code Model
//!
//! One-time codes that prove control of an email address.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A live verification code
///
/// At most one row exists per user; issuing a new code replaces the old one.
/// A code is usable only while `now < expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VerificationCode {
    /// Account the code confirms
    pub user_id: Uuid,

    /// Short human-enterable code
    pub code: String,

    /// Instant after which the code is inert
    pub expires_at: DateTime<Utc>,
}

impl VerificationCode {
    /// Check if the code has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check if `candidate` consumes this code at `now`
    pub fn matches(&self, candidate: &str, now: DateTime<Utc>) -> bool {
        self.code == candidate && !self.is_expired(now)
    }
}

/// Result of issuing (or re-issuing) a verification code
///
/// Carries no account identifier: the same response is returned whether the
/// code went to a new account or to an existing unverified one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationIssued {
    /// When the issued code stops being usable
    pub expires_at: DateTime<Utc>,
}
