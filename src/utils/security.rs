//! Security Utilities
//!
//! Credential hashing, token digests and verification code generation.

use bcrypt::{hash, verify, DEFAULT_COST};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default bcrypt cost for password hashing
pub const DEFAULT_BCRYPT_COST: u32 = DEFAULT_COST;

/// Length of generated verification codes
pub const VERIFICATION_CODE_LENGTH: usize = 6;

/// Characters used in verification codes (no 0/O or 1/I lookalikes)
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Errors raised while hashing or checking a credential
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Password hashing error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

/// One-way transform of a plaintext secret into its stored form
pub trait CredentialHasher: Send + Sync {
    /// Produce the stored form of `plain`
    fn hash(&self, plain: &str) -> Result<String, CredentialError>;

    /// Check `plain` against a stored form produced by [`hash`](Self::hash)
    fn verify(&self, plain: &str, stored: &str) -> Result<bool, CredentialError>;
}

/// bcrypt with a configurable cost factor
#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}

impl CredentialHasher for BcryptHasher {
    fn hash(&self, plain: &str) -> Result<String, CredentialError> {
        Ok(hash(plain, self.cost)?)
    }

    fn verify(&self, plain: &str, stored: &str) -> Result<bool, CredentialError> {
        Ok(verify(plain, stored)?)
    }
}

/// Deterministic peppered SHA-256
///
/// The same input always yields the same digest, so stored values can be
/// matched by equality. Prefer [`BcryptHasher`] for new deployments.
#[derive(Clone)]
pub struct Sha256Hasher {
    pepper: String,
}

impl Sha256Hasher {
    pub fn new(pepper: impl Into<String>) -> Self {
        Self {
            pepper: pepper.into(),
        }
    }
}

impl CredentialHasher for Sha256Hasher {
    fn hash(&self, plain: &str) -> Result<String, CredentialError> {
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_bytes());
        hasher.update(plain.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn verify(&self, plain: &str, stored: &str) -> Result<bool, CredentialError> {
        Ok(constant_time_compare(&self.hash(plain)?, stored))
    }
}

/// Digest a bearer token for storage; only the digest is ever persisted
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Timing-safe string comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }
    result == 0
}

/// Source of short human-enterable verification codes
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random codes drawn from the thread-local CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..VERIFICATION_CODE_LENGTH)
            .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
            .collect()
    }
}
