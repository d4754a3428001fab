//! PostgreSQL Account Store
//!
//! [`AccountStore`] backed by a SQLx connection pool. Every query lives in a
//! helper generic over the executor so the pool handle and the transaction
//! handle share one set of SQL statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repository::{
    AccountRepository, AccountStore, AccountTransaction, PurgeReport, StoreError, StoreResult,
};
use crate::models::{NewUser, RefreshTokenRecord, UserRecord, VerificationCode};

mod queries {
    use super::*;

    pub async fn create_user<'e, E: PgExecutor<'e>>(
        executor: E,
        user: &NewUser,
        now: DateTime<Utc>,
    ) -> StoreResult<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO users (id, login, email, password_hash, verified, created_at)
            VALUES ($1, $2, $3, $4, FALSE, $5)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.login)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(|e| StoreError::from_sqlx("repository.create_user", e))
    }

    pub async fn find_user_by_email<'e, E: PgExecutor<'e>>(
        executor: E,
        email: &str,
    ) -> StoreResult<UserRecord> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, login, email, password_hash, verified, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_one(executor)
        .await
        .map_err(|e| StoreError::from_sqlx("repository.find_user_by_email", e))
    }

    pub async fn find_user_by_login<'e, E: PgExecutor<'e>>(
        executor: E,
        login: &str,
    ) -> StoreResult<UserRecord> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, login, email, password_hash, verified, created_at
            FROM users
            WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_one(executor)
        .await
        .map_err(|e| StoreError::from_sqlx("repository.find_user_by_login", e))
    }

    pub async fn mark_user_verified<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: Uuid,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET verified = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(executor)
            .await
            .map_err(|e| StoreError::from_sqlx("repository.mark_user_verified", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn upsert_verification_code<'e, E: PgExecutor<'e>>(
        executor: E,
        code: &VerificationCode,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO verification_codes (user_id, code, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(code.user_id)
        .bind(&code.code)
        .bind(code.expires_at)
        .execute(executor)
        .await
        .map_err(|e| StoreError::from_sqlx("repository.upsert_verification_code", e))?;

        Ok(())
    }

    pub async fn lock_verification_code<'e, E: PgExecutor<'e>>(
        executor: E,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<VerificationCode> {
        sqlx::query_as::<_, VerificationCode>(
            r#"
            SELECT user_id, code, expires_at
            FROM verification_codes
            WHERE code = $1 AND expires_at > $2
            ORDER BY expires_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(code)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(|e| StoreError::from_sqlx("repository.lock_verification_code", e))
    }

    pub async fn delete_verification_code<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: Uuid,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM verification_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(executor)
            .await
            .map_err(|e| StoreError::from_sqlx("repository.delete_verification_code", e))?;

        Ok(())
    }

    pub async fn find_refresh_token<'e, E: PgExecutor<'e>>(
        executor: E,
        token_hash: &str,
    ) -> StoreResult<RefreshTokenRecord> {
        sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT user_id, device_id, token_hash, expires_at, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_one(executor)
        .await
        .map_err(|e| StoreError::from_sqlx("repository.find_refresh_token", e))
    }

    pub async fn upsert_refresh_token<'e, E: PgExecutor<'e>>(
        executor: E,
        record: &RefreshTokenRecord,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, device_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, device_id)
            DO UPDATE SET token_hash = EXCLUDED.token_hash,
                          expires_at = EXCLUDED.expires_at,
                          created_at = EXCLUDED.created_at
            "#,
        )
        .bind(record.user_id)
        .bind(&record.device_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(executor)
        .await
        .map_err(|e| StoreError::from_sqlx("repository.upsert_refresh_token", e))?;

        Ok(())
    }

    pub async fn delete_refresh_token<'e, E: PgExecutor<'e>>(
        executor: E,
        token_hash: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(executor)
            .await
            .map_err(|e| StoreError::from_sqlx("repository.delete_refresh_token", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_user_refresh_tokens<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: Uuid,
    ) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(executor)
            .await
            .map_err(|e| StoreError::from_sqlx("repository.delete_user_refresh_tokens", e))?;

        Ok(result.rows_affected())
    }

    pub async fn purge_expired_codes<'e, E: PgExecutor<'e>>(
        executor: E,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM verification_codes WHERE expires_at <= $1")
            .bind(now)
            .execute(executor)
            .await
            .map_err(|e| StoreError::from_sqlx("repository.purge_expired", e))?;

        Ok(result.rows_affected())
    }

    pub async fn purge_expired_tokens<'e, E: PgExecutor<'e>>(
        executor: E,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(executor)
            .await
            .map_err(|e| StoreError::from_sqlx("repository.purge_expired", e))?;

        Ok(result.rows_affected())
    }
}

/// Pool-backed account store; each call outside a transaction autocommits
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountStore {
    async fn create_user(&self, user: &NewUser, now: DateTime<Utc>) -> StoreResult<Uuid> {
        queries::create_user(&self.pool, user, now).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<UserRecord> {
        queries::find_user_by_email(&self.pool, email).await
    }

    async fn find_user_by_login(&self, login: &str) -> StoreResult<UserRecord> {
        queries::find_user_by_login(&self.pool, login).await
    }

    async fn mark_user_verified(&self, user_id: Uuid) -> StoreResult<()> {
        queries::mark_user_verified(&self.pool, user_id).await
    }

    async fn upsert_verification_code(&self, code: &VerificationCode) -> StoreResult<()> {
        queries::upsert_verification_code(&self.pool, code).await
    }

    async fn lock_verification_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<VerificationCode> {
        queries::lock_verification_code(&self.pool, code, now).await
    }

    async fn delete_verification_code(&self, user_id: Uuid) -> StoreResult<()> {
        queries::delete_verification_code(&self.pool, user_id).await
    }

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<RefreshTokenRecord> {
        queries::find_refresh_token(&self.pool, token_hash).await
    }

    async fn upsert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()> {
        queries::upsert_refresh_token(&self.pool, record).await
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> StoreResult<()> {
        queries::delete_refresh_token(&self.pool, token_hash).await
    }

    async fn delete_user_refresh_tokens(&self, user_id: Uuid) -> StoreResult<u64> {
        queries::delete_user_refresh_tokens(&self.pool, user_id).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        Ok(PurgeReport {
            verification_codes: queries::purge_expired_codes(&self.pool, now).await?,
            refresh_tokens: queries::purge_expired_tokens(&self.pool, now).await?,
        })
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn begin(&self) -> StoreResult<Box<dyn AccountTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::from_sqlx("transaction.begin", e))?;

        Ok(Box::new(PgAccountTransaction {
            tx: Mutex::new(Some(tx)),
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("repository.ping", e))?;
        Ok(())
    }
}

/// Repository handle bound to one open PostgreSQL transaction
///
/// Dropping the handle before [`AccountTransaction::commit`] rolls back.
pub struct PgAccountTransaction {
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

#[async_trait]
impl AccountRepository for PgAccountTransaction {
    async fn create_user(&self, user: &NewUser, now: DateTime<Utc>) -> StoreResult<Uuid> {
        let mut tx = self.tx.lock().await;
        let conn = tx.as_deref_mut().ok_or(StoreError::Closed("repository.create_user"))?;
        queries::create_user(conn, user, now).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<UserRecord> {
        let mut tx = self.tx.lock().await;
        let conn = tx
            .as_deref_mut()
            .ok_or(StoreError::Closed("repository.find_user_by_email"))?;
        queries::find_user_by_email(conn, email).await
    }

    async fn find_user_by_login(&self, login: &str) -> StoreResult<UserRecord> {
        let mut tx = self.tx.lock().await;
        let conn = tx
            .as_deref_mut()
            .ok_or(StoreError::Closed("repository.find_user_by_login"))?;
        queries::find_user_by_login(conn, login).await
    }

    async fn mark_user_verified(&self, user_id: Uuid) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        let conn = tx
            .as_deref_mut()
            .ok_or(StoreError::Closed("repository.mark_user_verified"))?;
        queries::mark_user_verified(conn, user_id).await
    }

    async fn upsert_verification_code(&self, code: &VerificationCode) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        let conn = tx
            .as_deref_mut()
            .ok_or(StoreError::Closed("repository.upsert_verification_code"))?;
        queries::upsert_verification_code(conn, code).await
    }

    async fn lock_verification_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<VerificationCode> {
        let mut tx = self.tx.lock().await;
        let conn = tx
            .as_deref_mut()
            .ok_or(StoreError::Closed("repository.lock_verification_code"))?;
        queries::lock_verification_code(conn, code, now).await
    }

    async fn delete_verification_code(&self, user_id: Uuid) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        let conn = tx
            .as_deref_mut()
            .ok_or(StoreError::Closed("repository.delete_verification_code"))?;
        queries::delete_verification_code(conn, user_id).await
    }

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<RefreshTokenRecord> {
        let mut tx = self.tx.lock().await;
        let conn = tx
            .as_deref_mut()
            .ok_or(StoreError::Closed("repository.find_refresh_token"))?;
        queries::find_refresh_token(conn, token_hash).await
    }

    async fn upsert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        let conn = tx
            .as_deref_mut()
            .ok_or(StoreError::Closed("repository.upsert_refresh_token"))?;
        queries::upsert_refresh_token(conn, record).await
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        let conn = tx
            .as_deref_mut()
            .ok_or(StoreError::Closed("repository.delete_refresh_token"))?;
        queries::delete_refresh_token(conn, token_hash).await
    }

    async fn delete_user_refresh_tokens(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut tx = self.tx.lock().await;
        let conn = tx
            .as_deref_mut()
            .ok_or(StoreError::Closed("repository.delete_user_refresh_tokens"))?;
        queries::delete_user_refresh_tokens(conn, user_id).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        let mut tx = self.tx.lock().await;
        let conn = tx.as_deref_mut().ok_or(StoreError::Closed("repository.purge_expired"))?;
        let verification_codes = queries::purge_expired_codes(&mut *conn, now).await?;
        let refresh_tokens = queries::purge_expired_tokens(&mut *conn, now).await?;
        Ok(PurgeReport {
            verification_codes,
            refresh_tokens,
        })
    }
}

#[async_trait]
impl AccountTransaction for PgAccountTransaction {
    fn repository(&self) -> &dyn AccountRepository {
        self
    }

    async fn commit(&self) -> StoreResult<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(StoreError::Closed("transaction.commit"))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx("transaction.commit", e))
    }
}
