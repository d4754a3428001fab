//! Configuration Module
//!
//! Environment-driven configuration for the session service: database pool,
//! signing secrets, session lifetimes, SMTP and rate limiting.

use chrono::Duration;
use std::fmt;

use crate::database::DatabaseConfig;
use crate::service::email_service::EmailConfig;
use crate::service::rate_limit_service::RateLimitConfig;
use crate::utils::DEFAULT_BCRYPT_COST;

/// Environment variable helpers
pub mod env {
    use std::env;

    /// Get environment variable as string with default
    pub fn get_string(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get environment variable as boolean with default
    pub fn get_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u32 with default
    pub fn get_u32(key: &str, default: u32) -> u32 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u16 with default
    pub fn get_u16(key: &str, default: u16) -> u16 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u64 with default
    pub fn get_u64(key: &str, default: u64) -> u64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as i64 with default
    pub fn get_i64(key: &str, default: i64) -> i64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Check if environment variable is set
    pub fn is_set(key: &str) -> bool {
        env::var(key).is_ok()
    }

    /// Get a required environment variable
    pub fn get_required(key: &str) -> anyhow::Result<String> {
        env::var(key)
            .map_err(|_| anyhow::anyhow!("Required environment variable {} is not set", key))
    }
}

/// Signing secrets, one per token namespace
#[derive(Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
}

impl JwtConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            access_secret: env::get_required("JWT_ACCESS_SECRET")?,
            refresh_secret: env::get_required("JWT_REFRESH_SECRET")?,
        })
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .finish()
    }
}

/// Lifetimes and deadlines of the session lifecycle
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Validity of access tokens
    pub access_token_ttl: Duration,
    /// Validity of a session (refresh token) from issuance
    pub refresh_token_ttl: Duration,
    /// Remaining validity below which refresh re-mints the session
    pub rotation_grace: Duration,
    /// Validity of verification codes
    pub verification_code_ttl: Duration,
    /// Deadline for the storage work of one operation
    pub operation_timeout: std::time::Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::hours(720),
            rotation_grace: Duration::hours(24),
            verification_code_ttl: Duration::minutes(10),
            operation_timeout: std::time::Duration::from_secs(5),
        }
    }
}

/// Upper bound for any token or code lifetime
pub const MAX_TTL_DAYS: i64 = 3650;

impl SessionConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            access_token_ttl: minutes("ACCESS_TOKEN_TTL_MINUTES", 15)?,
            refresh_token_ttl: hours("REFRESH_TOKEN_TTL_HOURS", 720)?,
            rotation_grace: hours("REFRESH_ROTATION_GRACE_HOURS", 24)?,
            verification_code_ttl: minutes("VERIFICATION_CODE_TTL_MINUTES", 10)?,
            operation_timeout: std::time::Duration::from_secs(env::get_u64(
                "DB_WRITE_TIMEOUT_SECONDS",
                5,
            )),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let max = Duration::days(MAX_TTL_DAYS);
        for (name, ttl) in [
            ("Access token", self.access_token_ttl),
            ("Refresh token", self.refresh_token_ttl),
            ("Verification code", self.verification_code_ttl),
        ] {
            if ttl <= Duration::zero() {
                anyhow::bail!("{} TTL must be positive", name);
            }
            if ttl > max {
                anyhow::bail!("{} TTL must not exceed {} days", name, MAX_TTL_DAYS);
            }
        }
        if self.rotation_grace < Duration::zero() || self.rotation_grace >= self.refresh_token_ttl {
            anyhow::bail!("Refresh rotation grace window must be shorter than the refresh token TTL");
        }
        if self.operation_timeout.is_zero() {
            anyhow::bail!("Operation timeout must be greater than 0");
        }
        Ok(())
    }
}

fn minutes(key: &str, default: i64) -> anyhow::Result<Duration> {
    let value = env::get_i64(key, default);
    Duration::try_minutes(value).ok_or_else(|| anyhow::anyhow!("{} is out of range: {}", key, value))
}

fn hours(key: &str, default: i64) -> anyhow::Result<Duration> {
    let value = env::get_i64(key, default);
    Duration::try_hours(value).ok_or_else(|| anyhow::anyhow!("{} is out of range: {}", key, value))
}

/// Application configuration combining all service configurations
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT configuration
    pub jwt: JwtConfig,

    /// Session lifetimes
    pub session: SessionConfig,

    /// bcrypt cost factor for password hashing
    pub bcrypt_cost: u32,

    /// Email configuration; verification mails go to an outbox when unset
    pub email: Option<EmailConfig>,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Load complete application configuration from environment
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            jwt: JwtConfig::from_env()?,
            session: SessionConfig::from_env()?,
            bcrypt_cost: env::get_u32("BCRYPT_COST", DEFAULT_BCRYPT_COST),
            email: EmailConfig::from_env()?,
            rate_limit: RateLimitConfig::from_env(),
        })
    }

    /// Validate the complete configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate database configuration
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!("Database min_connections cannot be greater than max_connections");
        }

        // Validate JWT configuration
        if self.jwt.access_secret.is_empty() {
            anyhow::bail!("JWT access secret cannot be empty");
        }

        if self.jwt.refresh_secret.is_empty() {
            anyhow::bail!("JWT refresh secret cannot be empty");
        }

        if self.jwt.access_secret == self.jwt.refresh_secret {
            anyhow::bail!("JWT access and refresh secrets must be different");
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            anyhow::bail!("BCRYPT_COST must be between 4 and 31");
        }

        if self.rate_limit.enabled && self.rate_limit.max_attempts == 0 {
            anyhow::bail!("RATE_LIMIT_MAX_ATTEMPTS must be greater than 0");
        }

        self.session.validate()
    }
}
