//! Request Models
//!
//! Inbound payloads handed to the session service by the request layer.

use serde::Deserialize;
use validator::Validate;

use crate::utils::validation::{email_validator, login_validator};

/// Request payload for creating a new account
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignUpRequest {
    /// Unique login name
    #[validate(length(min = 2, max = 86, message = "Login must be 2-86 characters without spaces"))]
    #[validate(custom(function = "login_validator"))]
    pub login: String,

    /// Email address the verification code is sent to
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    /// Plaintext password
    #[validate(length(min = 8, max = 86, message = "Password must be between 8 and 86 characters"))]
    pub password: String,
}

/// Request payload for signing in on one device
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(length(min = 2, max = 86, message = "Login must be 2-86 characters without spaces"))]
    pub login: String,

    #[validate(length(min = 8, max = 86, message = "Password must be between 8 and 86 characters"))]
    pub password: String,

    /// Identifier of the physical device or app instance
    #[validate(length(min = 1, max = 255, message = "Device identifier must be 1-255 characters"))]
    pub device_id: String,
}

/// Request payload for confirming an account
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyRequest {
    #[validate(length(equal = 6, message = "Verification code must be 6 characters"))]
    pub code: String,
}

/// Request payload for re-sending a verification code
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResendRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,
}

/// Request payload carrying a refresh token (refresh and logout)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Refresh token cannot be empty"))]
    pub refresh_token: String,
}
