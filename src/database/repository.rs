//! Account Store Capabilities
//!
//! Row-level operations over users, verification codes and refresh-token
//! records. The same [`AccountRepository`] surface is offered by a store
//! handle (each call commits on its own) and by a transaction handle (calls
//! commit together or not at all).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewUser, RefreshTokenRecord, UserRecord, VerificationCode};

/// Storage-layer errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// No row satisfied the lookup or the write matched zero rows
    #[error("record not found")]
    NotFound,

    /// A unique constraint (login, email) rejected the insert
    #[error("record already exists")]
    AlreadyExists,

    /// Any other database failure, tagged with the operation that raised it
    #[error("{op}: {source}")]
    Database {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// The transaction handle was used after it finished
    #[error("{0}: transaction already finished")]
    Closed(&'static str),
}

impl StoreError {
    /// Wrap a driver error, mapping the sentinel conditions
    pub(crate) fn from_sqlx(op: &'static str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::AlreadyExists
            }
            source => StoreError::Database { op, source },
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Rows removed by a maintenance purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub verification_codes: u64,
    pub refresh_tokens: u64,
}

/// Row-level account operations
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert an unverified user; `AlreadyExists` if login or email is taken
    async fn create_user(&self, user: &NewUser, now: DateTime<Utc>) -> StoreResult<Uuid>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<UserRecord>;

    async fn find_user_by_login(&self, login: &str) -> StoreResult<UserRecord>;

    /// `NotFound` if no such user
    async fn mark_user_verified(&self, user_id: Uuid) -> StoreResult<()>;

    /// Insert or replace the single live code of `code.user_id`
    async fn upsert_verification_code(&self, code: &VerificationCode) -> StoreResult<()>;

    /// Read the unexpired row matching `code`, locking it until the
    /// surrounding transaction ends
    async fn lock_verification_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<VerificationCode>;

    async fn delete_verification_code(&self, user_id: Uuid) -> StoreResult<()>;

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<RefreshTokenRecord>;

    /// Insert or overwrite the record for `(record.user_id, record.device_id)`
    async fn upsert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()>;

    /// `NotFound` if zero rows were deleted
    async fn delete_refresh_token(&self, token_hash: &str) -> StoreResult<()>;

    /// Delete every session of a user, returning how many were removed
    async fn delete_user_refresh_tokens(&self, user_id: Uuid) -> StoreResult<u64>;

    /// Remove expired verification codes and refresh-token records
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport>;
}

/// A durable account store that can open transactions
#[async_trait]
pub trait AccountStore: AccountRepository {
    /// Open a transaction; dropping the handle without committing rolls it back
    async fn begin(&self) -> StoreResult<Box<dyn AccountTransaction>>;

    /// Cheap connectivity check
    async fn ping(&self) -> StoreResult<()>;
}

/// Repository handle bound to one open transaction
#[async_trait]
pub trait AccountTransaction: AccountRepository {
    /// View this handle as a plain repository
    fn repository(&self) -> &dyn AccountRepository;

    /// Make every write made through this handle visible
    async fn commit(&self) -> StoreResult<()>;
}
