//! JWT Token Signer
//!
//! Issues and verifies HS256 bearer tokens. Each [`JwtSigner`] owns one
//! signing namespace (access or refresh) with its own secret, and rejects
//! tokens minted for the other namespace even when the secrets coincide.

use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{SignedToken, TokenClaims, TokenNamespace, UserContext};
use crate::utils::Clock;

/// Token signing and verification failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token could not be minted
    #[error("Token generation failed: {0}")]
    Generation(String),

    /// Malformed, forged, expired or wrong-namespace token
    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Issues and verifies time-limited bearer tokens for one namespace
pub trait TokenSigner: Send + Sync {
    /// Mint a token for `subject` valid for `ttl`
    fn issue(&self, subject: Uuid, ttl: Duration) -> Result<SignedToken, TokenError>;

    /// Check signature, algorithm, namespace, expiry and subject
    fn verify(&self, token: &str) -> Result<UserContext, TokenError>;
}

/// HS256 signer for a single namespace
#[derive(Clone)]
pub struct JwtSigner {
    namespace: TokenNamespace,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl JwtSigner {
    /// Create a signer for `namespace` using a shared secret
    pub fn new(namespace: TokenNamespace, secret: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            namespace,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            clock,
        }
    }

    /// Access-namespace signer
    pub fn access(secret: &str, clock: Arc<dyn Clock>) -> Self {
        Self::new(TokenNamespace::Access, secret, clock)
    }

    /// Refresh-namespace signer
    pub fn refresh(secret: &str, clock: Arc<dyn Clock>) -> Self {
        Self::new(TokenNamespace::Refresh, secret, clock)
    }

    fn decode_claims(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock below
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }
}

impl TokenSigner for JwtSigner {
    fn issue(&self, subject: Uuid, ttl: Duration) -> Result<SignedToken, TokenError> {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| TokenError::Generation("token lifetime out of range".to_string()))?;
        let claims = TokenClaims::new(self.namespace, subject, expires_at, now);

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Generation(e.to_string()))?;

        Ok(SignedToken {
            token,
            token_id: claims.jti,
            expires_at,
        })
    }

    fn verify(&self, token: &str) -> Result<UserContext, TokenError> {
        let claims = self.decode_claims(token)?;

        if claims.token_type != self.namespace {
            return Err(TokenError::Invalid(format!(
                "expected {} token, got {}",
                self.namespace.as_str(),
                claims.token_type.as_str()
            )));
        }

        if claims.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Invalid("token has expired".to_string()));
        }

        UserContext::from_claims(&claims)
            .map_err(|_| TokenError::Invalid("Invalid user ID in token".to_string()))
    }
}
