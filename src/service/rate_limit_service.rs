//! Rate Limiting Service
//!
//! Fixed-window attempt counters for the unauthenticated entry points
//! (sign-up, sign-in, resend). Counters live in a store shared by every
//! service instance, so limits hold across a multi-instance deployment.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::config::env;

/// Rate limiting specific errors
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Database error in rate limiting: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Rate limit exceeded for {action}: {attempts} attempts in window")]
    RateLimitExceeded {
        action: &'static str,
        attempts: u32,
        retry_after: u64,
    },
}

/// Result type for rate limiting operations
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Entry points subject to rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    SignUp,
    SignIn,
    ResendVerification,
}

impl RateLimitAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitAction::SignUp => "sign_up",
            RateLimitAction::SignIn => "sign_in",
            RateLimitAction::ResendVerification => "resend_verification",
        }
    }
}

/// Window settings shared by every action
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub window_minutes: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            window_minutes: 15,
        }
    }
}

impl RateLimitConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env::get_bool("RATE_LIMIT_ENABLED", defaults.enabled),
            max_attempts: env::get_u32("RATE_LIMIT_MAX_ATTEMPTS", defaults.max_attempts),
            window_minutes: env::get_u32("RATE_LIMIT_WINDOW_MINUTES", defaults.window_minutes),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes as i64)
    }
}

/// Counter state after recording one attempt
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub attempts: u32,
    pub max_attempts: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl RateLimitStatus {
    pub fn is_limit_exceeded(&self) -> bool {
        self.attempts > self.max_attempts
    }

    /// Seconds until the window resets, at least one
    pub fn retry_after(&self, now: DateTime<Utc>) -> u64 {
        (self.window_end - now).num_seconds().max(1) as u64
    }

    fn into_result(self, action: RateLimitAction, now: DateTime<Utc>) -> RateLimitResult<Self> {
        if self.is_limit_exceeded() {
            log::warn!(
                "Rate limit exceeded for {}: {} attempts in window",
                action.as_str(),
                self.attempts
            );
            return Err(RateLimitError::RateLimitExceeded {
                action: action.as_str(),
                attempts: self.attempts,
                retry_after: self.retry_after(now),
            });
        }
        Ok(self)
    }
}

/// Shared attempt counter
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record one attempt by `identifier`; `RateLimitExceeded` once the
    /// window's budget is spent
    async fn hit(
        &self,
        identifier: &str,
        action: RateLimitAction,
        now: DateTime<Utc>,
    ) -> RateLimitResult<RateLimitStatus>;

    /// Drop counters whose window has closed
    async fn purge_stale(&self, now: DateTime<Utc>) -> RateLimitResult<u64>;
}

#[derive(Debug, sqlx::FromRow)]
struct RateLimitRecord {
    window_start: DateTime<Utc>,
    attempt_count: i32,
}

/// Counters in the `auth_rate_limits` table
pub struct PgRateLimiter {
    pool: PgPool,
    config: RateLimitConfig,
}

impl PgRateLimiter {
    pub fn new(pool: PgPool, config: RateLimitConfig) -> Self {
        Self { pool, config }
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn hit(
        &self,
        identifier: &str,
        action: RateLimitAction,
        now: DateTime<Utc>,
    ) -> RateLimitResult<RateLimitStatus> {
        let window = self.config.window();

        // Single statement: concurrent hits from other instances serialize on the row
        let record = sqlx::query_as::<_, RateLimitRecord>(
            r#"
            INSERT INTO auth_rate_limits (identifier, action, window_start, attempt_count)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (identifier, action) DO UPDATE SET
                window_start = CASE
                    WHEN auth_rate_limits.window_start <= $4 THEN EXCLUDED.window_start
                    ELSE auth_rate_limits.window_start
                END,
                attempt_count = CASE
                    WHEN auth_rate_limits.window_start <= $4 THEN 1
                    ELSE auth_rate_limits.attempt_count + 1
                END
            RETURNING window_start, attempt_count
            "#,
        )
        .bind(identifier)
        .bind(action.as_str())
        .bind(now)
        .bind(now - window)
        .fetch_one(&self.pool)
        .await?;

        RateLimitStatus {
            attempts: record.attempt_count.max(0) as u32,
            max_attempts: self.config.max_attempts,
            window_start: record.window_start,
            window_end: record.window_start + window,
        }
        .into_result(action, now)
    }

    async fn purge_stale(&self, now: DateTime<Utc>) -> RateLimitResult<u64> {
        let result = sqlx::query("DELETE FROM auth_rate_limits WHERE window_start <= $1")
            .bind(now - self.config.window())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Process-local counters, for tests and single-instance tooling
pub struct MemoryRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(String, RateLimitAction), (DateTime<Utc>, u32)>>,
}

impl MemoryRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn hit(
        &self,
        identifier: &str,
        action: RateLimitAction,
        now: DateTime<Utc>,
    ) -> RateLimitResult<RateLimitStatus> {
        let window = self.config.window();
        let (window_start, attempts) = {
            let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
            let entry = windows
                .entry((identifier.to_string(), action))
                .or_insert((now, 0));

            if entry.0 <= now - window {
                *entry = (now, 0);
            }
            entry.1 += 1;
            *entry
        };

        RateLimitStatus {
            attempts,
            max_attempts: self.config.max_attempts,
            window_start,
            window_end: window_start + window,
        }
        .into_result(action, now)
    }

    async fn purge_stale(&self, now: DateTime<Utc>) -> RateLimitResult<u64> {
        let cutoff = now - self.config.window();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        windows.retain(|_, (start, _)| *start > cutoff);
        Ok((before - windows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_attempts: u32) -> MemoryRateLimiter {
        MemoryRateLimiter::new(RateLimitConfig {
            enabled: true,
            max_attempts,
            window_minutes: 15,
        })
    }

    #[tokio::test]
    async fn test_limit_exceeded_after_budget() {
        let limiter = limiter(3);
        let now = Utc::now();

        for attempt in 1..=3 {
            let status = limiter.hit("a@b.com", RateLimitAction::SignUp, now).await.unwrap();
            assert_eq!(status.attempts, attempt);
        }

        let err = limiter
            .hit("a@b.com", RateLimitAction::SignUp, now + Duration::minutes(5))
            .await
            .unwrap_err();
        match err {
            RateLimitError::RateLimitExceeded {
                action,
                attempts,
                retry_after,
            } => {
                assert_eq!(action, "sign_up");
                assert_eq!(attempts, 4);
                assert_eq!(retry_after, 10 * 60);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_counters_are_per_identifier_and_action() {
        let limiter = limiter(1);
        let now = Utc::now();

        limiter.hit("root", RateLimitAction::SignIn, now).await.unwrap();
        limiter.hit("other", RateLimitAction::SignIn, now).await.unwrap();
        limiter.hit("root", RateLimitAction::SignUp, now).await.unwrap();

        assert!(limiter.hit("root", RateLimitAction::SignIn, now).await.is_err());
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = limiter(1);
        let now = Utc::now();

        limiter.hit("root", RateLimitAction::SignIn, now).await.unwrap();
        assert!(limiter.hit("root", RateLimitAction::SignIn, now).await.is_err());

        let later = now + Duration::minutes(15);
        let status = limiter.hit("root", RateLimitAction::SignIn, later).await.unwrap();
        assert_eq!(status.attempts, 1);
        assert_eq!(status.window_start, later);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = limiter(5);
        let now = Utc::now();

        limiter.hit("old", RateLimitAction::SignIn, now).await.unwrap();
        limiter
            .hit("fresh", RateLimitAction::SignIn, now + Duration::minutes(10))
            .await
            .unwrap();

        let purged = limiter.purge_stale(now + Duration::minutes(15)).await.unwrap();
        assert_eq!(purged, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_limiter_window(pool: PgPool) {
        let limiter = PgRateLimiter::new(
            pool,
            RateLimitConfig {
                enabled: true,
                max_attempts: 2,
                window_minutes: 15,
            },
        );
        let now = Utc::now();

        limiter.hit("root", RateLimitAction::SignIn, now).await.unwrap();
        limiter.hit("root", RateLimitAction::SignIn, now).await.unwrap();
        assert!(matches!(
            limiter.hit("root", RateLimitAction::SignIn, now).await,
            Err(RateLimitError::RateLimitExceeded { attempts: 3, .. })
        ));

        let later = now + Duration::minutes(16);
        let status = limiter.hit("root", RateLimitAction::SignIn, later).await.unwrap();
        assert_eq!(status.attempts, 1);
        assert_eq!(limiter.purge_stale(later + Duration::minutes(15)).await.unwrap(), 1);
    }
}
