//! Shared harness for the session flow tests: in-memory store, manual clock
//! and an outbox in place of SMTP.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use session_service::{
    config::SessionConfig,
    database::{AccountRepository, MemoryAccountStore},
    models::{
        SignInRequest, SignUpRequest, SignedToken, TokenNamespace, TokenPair, UserContext,
        VerificationIssued, VerifyRequest,
    },
    service::{
        JwtSigner, Mail, MemoryRateLimiter, Notifier, NotifyError, OutboxNotifier,
        RateLimitConfig, SessionService, TokenError, TokenSigner,
    },
    utils::{CodeGenerator, ManualClock, Sha256Hasher},
};

pub const ACCESS_SECRET: &str = "test_access_secret_key";
pub const REFRESH_SECRET: &str = "test_refresh_secret_key";
pub const PASSWORD: &str = "password123";

/// Codes `C00001`, `C00002`, ... in issue order
#[derive(Default)]
pub struct SequentialCodes {
    next: AtomicUsize,
}

impl SequentialCodes {
    pub fn code(n: usize) -> String {
        format!("C{:05}", n)
    }
}

impl CodeGenerator for SequentialCodes {
    fn generate(&self) -> String {
        Self::code(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Rejects every message
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _mail: Mail) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("connection refused".to_string()))
    }
}

/// Never finishes within any reasonable deadline
pub struct StalledNotifier;

#[async_trait]
impl Notifier for StalledNotifier {
    async fn send(&self, _mail: Mail) -> Result<(), NotifyError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Signer whose key material is unusable
pub struct BrokenSigner(pub TokenNamespace);

impl TokenSigner for BrokenSigner {
    fn issue(&self, _subject: Uuid, _ttl: Duration) -> Result<SignedToken, TokenError> {
        Err(TokenError::Generation("signing key unavailable".to_string()))
    }

    fn verify(&self, _token: &str) -> Result<UserContext, TokenError> {
        Err(TokenError::Invalid("signing key unavailable".to_string()))
    }
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        access_token_ttl: Duration::minutes(15),
        refresh_token_ttl: Duration::hours(720),
        rotation_grace: Duration::hours(24),
        verification_code_ttl: Duration::minutes(10),
        operation_timeout: std::time::Duration::from_secs(5),
    }
}

pub struct Harness {
    pub service: SessionService,
    pub store: MemoryAccountStore,
    pub clock: Arc<ManualClock>,
    pub outbox: OutboxNotifier,
}

pub struct HarnessBuilder {
    notifier: Option<Arc<dyn Notifier>>,
    refresh_signer: Option<Arc<dyn TokenSigner>>,
    rate_limit: Option<RateLimitConfig>,
}

impl HarnessBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn refresh_signer(mut self, signer: Arc<dyn TokenSigner>) -> Self {
        self.refresh_signer = Some(signer);
        self
    }

    pub fn rate_limit(mut self, max_attempts: u32) -> Self {
        self.rate_limit = Some(RateLimitConfig {
            enabled: true,
            max_attempts,
            window_minutes: 15,
        });
        self
    }

    pub fn build(self) -> Harness {
        let store = MemoryAccountStore::new();
        let clock = Arc::new(ManualClock::starting_now());
        let outbox = OutboxNotifier::new();

        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(outbox.clone()),
        };
        let refresh_signer: Arc<dyn TokenSigner> = match self.refresh_signer {
            Some(signer) => signer,
            None => Arc::new(JwtSigner::refresh(REFRESH_SECRET, clock.clone())),
        };

        let mut service = SessionService::new(
            Arc::new(store.clone()),
            Arc::new(JwtSigner::access(ACCESS_SECRET, clock.clone())),
            refresh_signer,
            notifier,
            clock.clone(),
            session_config(),
        )
        .with_hasher(Arc::new(Sha256Hasher::new("pepper")))
        .with_code_generator(Arc::new(SequentialCodes::default()));

        if let Some(config) = self.rate_limit {
            service = service.with_rate_limiter(Arc::new(MemoryRateLimiter::new(config)));
        }

        Harness {
            service,
            store,
            clock,
            outbox,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            notifier: None,
            refresh_signer: None,
            rate_limit: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub async fn sign_up(
        &self,
        login: &str,
        email: &str,
    ) -> session_service::SessionResult<VerificationIssued> {
        self.service
            .sign_up(SignUpRequest {
                login: login.to_string(),
                email: email.to_string(),
                password: PASSWORD.to_string(),
            })
            .await
    }

    /// Account ID behind `email`, read straight from the store
    pub async fn user_id(&self, email: &str) -> Uuid {
        self.store
            .find_user_by_email(email)
            .await
            .expect("no account for email")
            .id
    }

    pub async fn verify(&self, code: &str) -> session_service::SessionResult<Uuid> {
        self.service
            .verify(VerifyRequest {
                code: code.to_string(),
            })
            .await
    }

    pub async fn sign_in(
        &self,
        login: &str,
        device_id: &str,
    ) -> session_service::SessionResult<TokenPair> {
        self.sign_in_with(login, PASSWORD, device_id).await
    }

    pub async fn sign_in_with(
        &self,
        login: &str,
        password: &str,
        device_id: &str,
    ) -> session_service::SessionResult<TokenPair> {
        self.service
            .sign_in(SignInRequest {
                login: login.to_string(),
                password: password.to_string(),
                device_id: device_id.to_string(),
            })
            .await
    }

    /// Sign up, verify with the mailed code and return the account ID
    pub async fn verified_account(&self, login: &str, email: &str) -> Uuid {
        self.sign_up(login, email).await.unwrap();
        let code = self.mailed_code(email);
        self.verify(&code).await.unwrap()
    }

    /// Code from the most recent mail to `email`
    pub fn mailed_code(&self, email: &str) -> String {
        let mail = self.outbox.last_to(email).expect("no mail sent");
        session_service::service::extract_verification_code(&mail.body)
            .expect("mail carries no code")
            .to_string()
    }
}
