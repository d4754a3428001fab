//! Service Layer
//!
//! Session orchestration and the capabilities it is composed from: token
//! signing, mail delivery and rate limiting.

pub mod email_service;
pub mod jwt;
pub mod rate_limit_service;
pub mod session;

// Re-export services
pub use email_service::{
    extract_verification_code, EmailConfig, EmailTemplates, Mail, Notifier, NotifyError,
    OutboxNotifier, SmtpNotifier,
};
pub use jwt::{JwtSigner, TokenError, TokenSigner};
pub use rate_limit_service::{
    MemoryRateLimiter, PgRateLimiter, RateLimitAction, RateLimitConfig, RateLimitError,
    RateLimiter,
};
pub use session::{PurgeSummary, SessionService};
