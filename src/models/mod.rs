//! Data Models Module
//!
//! Persisted records, token types and inbound request payloads used by the
//! session service.

pub mod auth;
pub mod requests;
pub mod user;
pub mod verification;

// Re-export commonly used types
pub use auth::*;
pub use requests::*;
pub use user::*;
pub use verification::*;
