//! Utilities Module
//!
//! Shared utilities for error handling, security, validation and time used
//! throughout the session service.

pub mod clock;
pub mod error;
pub mod security;
pub mod validation;

// Re-export commonly used utilities
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, ErrorResponse, SessionError, SessionResult};
pub use security::*;
pub use validation::*;
