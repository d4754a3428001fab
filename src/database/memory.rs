//! In-Memory Account Store
//!
//! [`AccountStore`] kept in process memory, for tests and single-process
//! embeddings.
//!
//! A transaction takes the store lock for its whole lifetime and works on a
//! staged copy of the state, so transactions are fully serialized and a
//! dropped transaction leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::repository::{
    AccountRepository, AccountStore, AccountTransaction, PurgeReport, StoreError, StoreResult,
};
use crate::models::{NewUser, RefreshTokenRecord, UserRecord, VerificationCode};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, UserRecord>,
    /// Keyed by user: one live code per account
    codes: HashMap<Uuid, VerificationCode>,
    sessions: HashMap<(Uuid, String), RefreshTokenRecord>,
}

impl MemoryState {
    fn create_user(&mut self, user: &NewUser, now: DateTime<Utc>) -> StoreResult<Uuid> {
        let taken = self
            .users
            .values()
            .any(|u| u.login == user.login || u.email == user.email);
        if taken {
            return Err(StoreError::AlreadyExists);
        }

        let id = Uuid::new_v4();
        self.users.insert(
            id,
            UserRecord {
                id,
                login: user.login.clone(),
                email: user.email.clone(),
                password_hash: user.password_hash.clone(),
                verified: false,
                created_at: now,
            },
        );
        Ok(id)
    }

    fn find_user(&self, pred: impl Fn(&UserRecord) -> bool) -> StoreResult<UserRecord> {
        self.users
            .values()
            .find(|u| pred(u))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn mark_user_verified(&mut self, user_id: Uuid) -> StoreResult<()> {
        let user = self.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.verified = true;
        Ok(())
    }

    fn upsert_verification_code(&mut self, code: &VerificationCode) -> StoreResult<()> {
        if !self.users.contains_key(&code.user_id) {
            return Err(StoreError::NotFound);
        }
        self.codes.insert(code.user_id, code.clone());
        Ok(())
    }

    fn lock_verification_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<VerificationCode> {
        self.codes
            .values()
            .filter(|c| c.matches(code, now))
            .max_by_key(|c| c.expires_at)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn find_refresh_token(&self, token_hash: &str) -> StoreResult<RefreshTokenRecord> {
        self.sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn upsert_refresh_token(&mut self, record: &RefreshTokenRecord) -> StoreResult<()> {
        if !self.users.contains_key(&record.user_id) {
            return Err(StoreError::NotFound);
        }
        self.sessions
            .insert((record.user_id, record.device_id.clone()), record.clone());
        Ok(())
    }

    fn delete_refresh_token(&mut self, token_hash: &str) -> StoreResult<()> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.token_hash != token_hash);
        if self.sessions.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn delete_user_refresh_tokens(&mut self, user_id: Uuid) -> u64 {
        let before = self.sessions.len();
        self.sessions.retain(|(owner, _), _| *owner != user_id);
        (before - self.sessions.len()) as u64
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> PurgeReport {
        let codes_before = self.codes.len();
        self.codes.retain(|_, c| !c.is_expired(now));
        let sessions_before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now));

        PurgeReport {
            verification_codes: (codes_before - self.codes.len()) as u64,
            refresh_tokens: (sessions_before - self.sessions.len()) as u64,
        }
    }
}

/// Process-local account store
#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for MemoryAccountStore {
    async fn create_user(&self, user: &NewUser, now: DateTime<Utc>) -> StoreResult<Uuid> {
        self.state.lock().await.create_user(user, now)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<UserRecord> {
        self.state.lock().await.find_user(|u| u.email == email)
    }

    async fn find_user_by_login(&self, login: &str) -> StoreResult<UserRecord> {
        self.state.lock().await.find_user(|u| u.login == login)
    }

    async fn mark_user_verified(&self, user_id: Uuid) -> StoreResult<()> {
        self.state.lock().await.mark_user_verified(user_id)
    }

    async fn upsert_verification_code(&self, code: &VerificationCode) -> StoreResult<()> {
        self.state.lock().await.upsert_verification_code(code)
    }

    async fn lock_verification_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<VerificationCode> {
        self.state.lock().await.lock_verification_code(code, now)
    }

    async fn delete_verification_code(&self, user_id: Uuid) -> StoreResult<()> {
        self.state.lock().await.codes.remove(&user_id);
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<RefreshTokenRecord> {
        self.state.lock().await.find_refresh_token(token_hash)
    }

    async fn upsert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()> {
        self.state.lock().await.upsert_refresh_token(record)
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> StoreResult<()> {
        self.state.lock().await.delete_refresh_token(token_hash)
    }

    async fn delete_user_refresh_tokens(&self, user_id: Uuid) -> StoreResult<u64> {
        Ok(self.state.lock().await.delete_user_refresh_tokens(user_id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        Ok(self.state.lock().await.purge_expired(now))
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn begin(&self) -> StoreResult<Box<dyn AccountTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();

        Ok(Box::new(MemoryAccountTransaction {
            inner: StdMutex::new(Some(Staged { guard, staged })),
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct Staged {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

/// Transaction over a [`MemoryAccountStore`]
///
/// Holds the store lock until committed or dropped.
pub struct MemoryAccountTransaction {
    inner: StdMutex<Option<Staged>>,
}

impl MemoryAccountTransaction {
    fn with_state<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut MemoryState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let staged = inner.as_mut().ok_or(StoreError::Closed(op))?;
        f(&mut staged.staged)
    }
}

#[async_trait]
impl AccountRepository for MemoryAccountTransaction {
    async fn create_user(&self, user: &NewUser, now: DateTime<Utc>) -> StoreResult<Uuid> {
        self.with_state("repository.create_user", |s| s.create_user(user, now))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<UserRecord> {
        self.with_state("repository.find_user_by_email", |s| {
            s.find_user(|u| u.email == email)
        })
    }

    async fn find_user_by_login(&self, login: &str) -> StoreResult<UserRecord> {
        self.with_state("repository.find_user_by_login", |s| {
            s.find_user(|u| u.login == login)
        })
    }

    async fn mark_user_verified(&self, user_id: Uuid) -> StoreResult<()> {
        self.with_state("repository.mark_user_verified", |s| {
            s.mark_user_verified(user_id)
        })
    }

    async fn upsert_verification_code(&self, code: &VerificationCode) -> StoreResult<()> {
        self.with_state("repository.upsert_verification_code", |s| {
            s.upsert_verification_code(code)
        })
    }

    async fn lock_verification_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<VerificationCode> {
        self.with_state("repository.lock_verification_code", |s| {
            s.lock_verification_code(code, now)
        })
    }

    async fn delete_verification_code(&self, user_id: Uuid) -> StoreResult<()> {
        self.with_state("repository.delete_verification_code", |s| {
            s.codes.remove(&user_id);
            Ok(())
        })
    }

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<RefreshTokenRecord> {
        self.with_state("repository.find_refresh_token", |s| {
            s.find_refresh_token(token_hash)
        })
    }

    async fn upsert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()> {
        self.with_state("repository.upsert_refresh_token", |s| {
            s.upsert_refresh_token(record)
        })
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> StoreResult<()> {
        self.with_state("repository.delete_refresh_token", |s| {
            s.delete_refresh_token(token_hash)
        })
    }

    async fn delete_user_refresh_tokens(&self, user_id: Uuid) -> StoreResult<u64> {
        self.with_state("repository.delete_user_refresh_tokens", |s| {
            Ok(s.delete_user_refresh_tokens(user_id))
        })
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        self.with_state("repository.purge_expired", |s| Ok(s.purge_expired(now)))
    }
}

#[async_trait]
impl AccountTransaction for MemoryAccountTransaction {
    fn repository(&self) -> &dyn AccountRepository {
        self
    }

    async fn commit(&self) -> StoreResult<()> {
        let finished = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(StoreError::Closed("transaction.commit"))?;

        let Staged { mut guard, staged } = finished;
        *guard = staged;
        Ok(())
    }
}
