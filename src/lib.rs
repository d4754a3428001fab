//! Session Service Library
//!
//! Account registration, email verification and per-device session
//! management. Accounts are created unverified and confirmed with a
//! short-lived one-time code; verified accounts sign in per device and
//! receive an access/refresh token pair whose refresh half is stored only
//! as a digest.
//!
//! # Features
//!
//! - **Atomic multi-step operations**: units of work run through a
//!   [`TransactionCoordinator`] and roll back on any error
//! - **Race-free verification**: codes are consumed under a row lock, so a
//!   code verifies at most one account exactly once
//! - **Per-device sessions**: one refresh-token record per `(user, device)`,
//!   reused inside a grace window and rotated near expiry
//! - **Swappable capabilities**: store, token signer, hasher, notifier,
//!   clock and rate limiter are traits injected at construction
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use session_service::{
//!     database::{DatabaseConfig, PgAccountStore},
//!     models::{SignInRequest, SignUpRequest, VerifyRequest},
//!     service::{JwtSigner, OutboxNotifier, SessionService},
//!     config::SessionConfig,
//!     utils::SystemClock,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = DatabaseConfig::from_env()?.create_pool().await?;
//!     let clock = Arc::new(SystemClock);
//!
//!     let service = SessionService::new(
//!         Arc::new(PgAccountStore::new(pool)),
//!         Arc::new(JwtSigner::access("access-secret", clock.clone())),
//!         Arc::new(JwtSigner::refresh("refresh-secret", clock.clone())),
//!         Arc::new(OutboxNotifier::new()),
//!         clock,
//!         SessionConfig::default(),
//!     );
//!
//!     service
//!         .sign_up(SignUpRequest {
//!             login: "root".to_string(),
//!             email: "a@b.com".to_string(),
//!             password: "password123".to_string(),
//!         })
//!         .await?;
//!
//!     service.verify(VerifyRequest { code: "ABC234".to_string() }).await?;
//!
//!     let tokens = service
//!         .sign_in(SignInRequest {
//!             login: "root".to_string(),
//!             password: "password123".to_string(),
//!             device_id: "d1".to_string(),
//!         })
//!         .await?;
//!     println!("access token expires in {}s", tokens.expires_in);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Service Layer**: [`SessionService`] orchestration plus the token
//!   signer, notifier and rate limiter capabilities
//! - **Database**: Account Store traits, the transaction coordinator and
//!   the PostgreSQL and in-memory backings
//! - **Models**: persisted records, token types and validated payloads
//! - **Utils**: error taxonomy, credential hashing, validation and clock

/// Configuration management for all service settings
pub mod config;

/// Account Store capabilities and backings
pub mod database;

/// Data models and request/response structures
pub mod models;

/// Session orchestration and its capabilities
pub mod service;

/// Shared utilities for security, validation, and error handling
pub mod utils;

// Re-export commonly used types for convenient access
pub use database::{
    AccountRepository, AccountStore, DatabaseConfig, DatabasePool, MemoryAccountStore,
    PgAccountStore, StoreError, TransactionCoordinator,
};
pub use models::{
    RefreshTokenRequest, ResendRequest, SignInRequest, SignUpRequest, TokenPair, User,
    UserContext, VerificationIssued, VerifyRequest,
};
pub use service::{JwtSigner, Notifier, SessionService, TokenSigner};
pub use utils::{Clock, ErrorKind, ErrorResponse, SessionError, SessionResult};

// Re-export configuration system
pub use config::{env, AppConfig, JwtConfig, SessionConfig};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
