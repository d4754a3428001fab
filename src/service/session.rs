//! Session Service Implementation
//!
//! Orchestrates the account lifecycle: sign-up, verification, sign-in,
//! token refresh and logout. Storage goes through the Account Store
//! capability, multi-write steps through the [`TransactionCoordinator`], and
//! mail is only sent after the writes it announces have committed.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;
use validator::Validate;

use crate::config::SessionConfig;
use crate::database::{AccountStore, StoreError, TransactionCoordinator};
use crate::models::{
    NewUser, RefreshTokenRecord, RefreshTokenRequest, ResendRequest, SignInRequest,
    SignUpRequest, TokenPair, UserContext, UserRecord, VerificationCode, VerificationIssued,
    VerifyRequest,
};
use crate::service::email_service::{EmailTemplates, Mail, Notifier};
use crate::service::jwt::TokenSigner;
use crate::service::rate_limit_service::{RateLimitAction, RateLimitError, RateLimiter};
use crate::utils::{
    hash_token, normalize_email, BcryptHasher, Clock, CodeGenerator, CredentialHasher,
    RandomCodeGenerator, SessionError, SessionResult,
};

/// Rows removed by [`SessionService::purge_expired`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeSummary {
    pub verification_codes: u64,
    pub refresh_tokens: u64,
    pub rate_limit_windows: u64,
}

/// Password hashed once per service; unknown logins are checked against it
/// so they cost the same as a wrong password
const DUMMY_PASSWORD: &str = "session-service-dummy-password";

/// Map a storage failure to the caller-facing taxonomy
fn store_failure(op: &'static str, err: StoreError) -> SessionError {
    match err {
        StoreError::NotFound => SessionError::NotFound,
        StoreError::AlreadyExists => SessionError::AlreadyExists,
        other => unexpected(op, other),
    }
}

/// Log an infrastructure failure and hide it behind `Unexpected`
fn unexpected(op: &'static str, err: impl Display) -> SessionError {
    error!("{}: {}", op, err);
    SessionError::Unexpected(op.to_string())
}

/// Authentication and session lifecycle
pub struct SessionService {
    coordinator: TransactionCoordinator,
    access_signer: Arc<dyn TokenSigner>,
    refresh_signer: Arc<dyn TokenSigner>,
    hasher: Arc<dyn CredentialHasher>,
    codes: Arc<dyn CodeGenerator>,
    notifier: Arc<dyn Notifier>,
    templates: EmailTemplates,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    dummy_hash: OnceLock<String>,
}

impl SessionService {
    /// Creates a session service with bcrypt hashing, random codes and no
    /// rate limiting
    pub fn new(
        store: Arc<dyn AccountStore>,
        access_signer: Arc<dyn TokenSigner>,
        refresh_signer: Arc<dyn TokenSigner>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(store),
            access_signer,
            refresh_signer,
            hasher: Arc::new(BcryptHasher::default()),
            codes: Arc::new(RandomCodeGenerator),
            notifier,
            templates: EmailTemplates::default(),
            rate_limiter: None,
            clock,
            config,
            dummy_hash: OnceLock::new(),
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn CredentialHasher>) -> Self {
        self.hasher = hasher;
        self.dummy_hash = OnceLock::new();
        self
    }

    pub fn with_code_generator(mut self, codes: Arc<dyn CodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn with_templates(mut self, templates: EmailTemplates) -> Self {
        self.templates = templates;
        self
    }

    fn store(&self) -> &Arc<dyn AccountStore> {
        self.coordinator.store()
    }

    /// Registers an unverified account and mails it a verification code
    ///
    /// If the email already belongs to an unverified account, a fresh code
    /// is issued to that account instead (replacing its previous one) and
    /// the call succeeds. A verified account yields `AlreadyExists`.
    ///
    /// A mail failure after the account was committed is reported as
    /// `Notification`; the account stays.
    pub async fn sign_up(&self, request: SignUpRequest) -> SessionResult<VerificationIssued> {
        const OP: &str = "service.sign_up";
        request.validate()?;

        let email = normalize_email(&request.email);
        let (issued, mail) = self
            .with_deadline(OP, async move {
                self.check_rate_limit(&email, RateLimitAction::SignUp).await?;

                let now = self.clock.now();
                let password_hash = self
                    .hasher
                    .hash(&request.password)
                    .map_err(|e| unexpected(OP, e))?;

                let code = self.codes.generate();
                let expires_at = self.code_expiry(OP, now)?;
                let mail = self.verification_mail(OP, &email, &request.login, &code)?;

                let new_user = NewUser {
                    login: request.login.clone(),
                    email: email.clone(),
                    password_hash,
                };
                let created = self
                    .coordinator
                    .run(move |repo| {
                        Box::pin(async move {
                            let user_id = repo.create_user(&new_user, now).await?;
                            repo.upsert_verification_code(&VerificationCode {
                                user_id,
                                code,
                                expires_at,
                            })
                            .await?;
                            Ok::<_, StoreError>(user_id)
                        })
                    })
                    .await;

                match created {
                    Ok(user_id) => {
                        info!("Created account {} pending verification", user_id);
                        Ok((VerificationIssued { expires_at }, mail))
                    }
                    Err(StoreError::AlreadyExists) => {
                        let existing = match self.store().find_user_by_email(&email).await {
                            Ok(user) => user,
                            // The login collided, not the email
                            Err(StoreError::NotFound) => return Err(SessionError::AlreadyExists),
                            Err(e) => return Err(store_failure(OP, e)),
                        };

                        if existing.verified {
                            warn!("Sign-up rejected: account {} already verified", existing.id);
                            return Err(SessionError::AlreadyExists);
                        }

                        info!(
                            "Sign-up for unverified account {}, re-issuing verification code",
                            existing.id
                        );
                        self.trigger_verification(OP, &existing, now).await
                    }
                    Err(e) => Err(store_failure(OP, e)),
                }
            })
            .await?;

        self.deliver(OP, mail).await?;
        Ok(issued)
    }

    /// Consumes a verification code and marks its account verified
    ///
    /// Wrong, already-used and expired codes all yield `NotFound`. Concurrent
    /// attempts with the same code are serialized by the store: exactly one
    /// succeeds.
    pub async fn verify(&self, request: VerifyRequest) -> SessionResult<Uuid> {
        const OP: &str = "service.verify";
        request.validate()?;

        self.with_deadline(OP, async move {
            let now = self.clock.now();
            let code = request.code;

            let user_id = self
                .coordinator
                .run(move |repo| {
                    Box::pin(async move {
                        let pending = repo.lock_verification_code(&code, now).await?;
                        repo.mark_user_verified(pending.user_id).await?;
                        repo.delete_verification_code(pending.user_id).await?;
                        Ok::<_, StoreError>(pending.user_id)
                    })
                })
                .await
                .map_err(|e| store_failure(OP, e))?;

            info!("Account {} verified", user_id);
            Ok(user_id)
        })
        .await
    }

    /// Issues a new verification code for an unverified account, replacing
    /// the previous one
    pub async fn resend_verification(
        &self,
        request: ResendRequest,
    ) -> SessionResult<VerificationIssued> {
        const OP: &str = "service.resend_verification";
        request.validate()?;

        let email = normalize_email(&request.email);
        let (issued, mail) = self
            .with_deadline(OP, async move {
                self.check_rate_limit(&email, RateLimitAction::ResendVerification)
                    .await?;

                let user = self
                    .store()
                    .find_user_by_email(&email)
                    .await
                    .map_err(|e| store_failure(OP, e))?;

                if user.verified {
                    warn!("Resend rejected: account {} already verified", user.id);
                    return Err(SessionError::AlreadyExists);
                }

                self.trigger_verification(OP, &user, self.clock.now()).await
            })
            .await?;

        self.deliver(OP, mail).await?;
        Ok(issued)
    }

    /// Checks credentials and opens a session on one device
    pub async fn sign_in(&self, request: SignInRequest) -> SessionResult<TokenPair> {
        const OP: &str = "service.sign_in";
        request.validate()?;

        self.with_deadline(OP, async move {
            self.check_rate_limit(&request.login, RateLimitAction::SignIn)
                .await?;

            let user = match self.store().find_user_by_login(&request.login).await {
                Ok(user) => user,
                Err(StoreError::NotFound) => {
                    self.verify_dummy_password(&request.password);
                    warn!("Sign-in failed: unknown login");
                    return Err(SessionError::InvalidCredentials);
                }
                Err(e) => return Err(store_failure(OP, e)),
            };

            let password_ok = self
                .hasher
                .verify(&request.password, &user.password_hash)
                .map_err(|e| unexpected(OP, e))?;
            if !password_ok {
                warn!("Sign-in failed: wrong password for account {}", user.id);
                return Err(SessionError::InvalidCredentials);
            }

            if !user.verified {
                warn!("Sign-in rejected: account {} not verified", user.id);
                return Err(SessionError::NotVerified);
            }

            let tokens = self
                .create_session(OP, user.id, &request.device_id, self.clock.now())
                .await?;
            info!("Account {} signed in on device {}", user.id, request.device_id);
            Ok(tokens)
        })
        .await
    }

    /// Exchanges a refresh token for a new access token
    ///
    /// While the session has more than the rotation grace window left, the
    /// same refresh token is handed back and nothing is written. Closer to
    /// expiry the session is re-minted and the old refresh token stops
    /// working.
    pub async fn refresh(&self, request: RefreshTokenRequest) -> SessionResult<TokenPair> {
        const OP: &str = "service.refresh";
        request.validate()?;

        self.with_deadline(OP, async move {
            let now = self.clock.now();
            let token_hash = hash_token(&request.refresh_token);

            let record = match self.store().find_refresh_token(&token_hash).await {
                Ok(record) => record,
                Err(StoreError::NotFound) => {
                    warn!("Refresh rejected: unknown refresh token");
                    return Err(SessionError::InvalidToken(
                        "unknown refresh token".to_string(),
                    ));
                }
                Err(e) => return Err(store_failure(OP, e)),
            };

            if record.is_expired(now) {
                warn!(
                    "Refresh rejected: session for account {} on device {} expired",
                    record.user_id, record.device_id
                );
                return Err(SessionError::TokenExpired);
            }

            if record.remaining(now) > self.config.rotation_grace {
                debug!(
                    "Reusing refresh token for account {} on device {}",
                    record.user_id, record.device_id
                );
                let access = self
                    .access_signer
                    .issue(record.user_id, self.config.access_token_ttl)
                    .map_err(|e| unexpected(OP, e))?;
                return Ok(TokenPair::new(
                    access.token,
                    request.refresh_token,
                    self.config.access_token_ttl.num_seconds(),
                ));
            }

            info!(
                "Rotating session for account {} on device {}",
                record.user_id, record.device_id
            );
            self.create_session(OP, record.user_id, &record.device_id, now)
                .await
        })
        .await
    }

    /// Ends the session the refresh token belongs to
    pub async fn logout(&self, request: RefreshTokenRequest) -> SessionResult<()> {
        const OP: &str = "service.logout";
        request.validate()?;

        self.with_deadline(OP, async move {
            self.store()
                .delete_refresh_token(&hash_token(&request.refresh_token))
                .await
                .map_err(|e| store_failure(OP, e))?;

            info!("Session ended");
            Ok(())
        })
        .await
    }

    /// Validates an access token and returns its identity
    ///
    /// Refresh tokens are rejected here.
    pub fn authenticate(&self, access_token: &str) -> SessionResult<UserContext> {
        self.access_signer
            .verify(access_token)
            .map_err(|e| SessionError::InvalidToken(e.to_string()))
    }

    /// Ends every session of the account behind `access_token`
    pub async fn logout_all(&self, access_token: &str) -> SessionResult<u64> {
        const OP: &str = "service.logout_all";
        let context = self.authenticate(access_token)?;

        self.with_deadline(OP, async move {
            let removed = self
                .store()
                .delete_user_refresh_tokens(context.user_id)
                .await
                .map_err(|e| store_failure(OP, e))?;

            info!("Ended {} sessions for account {}", removed, context.user_id);
            Ok(removed)
        })
        .await
    }

    /// Deletes expired codes, expired sessions and closed rate-limit windows
    pub async fn purge_expired(&self) -> SessionResult<PurgeSummary> {
        const OP: &str = "service.purge_expired";

        self.with_deadline(OP, async move {
            let now = self.clock.now();
            let report = self
                .store()
                .purge_expired(now)
                .await
                .map_err(|e| store_failure(OP, e))?;

            let rate_limit_windows = match &self.rate_limiter {
                Some(limiter) => limiter
                    .purge_stale(now)
                    .await
                    .map_err(|e| unexpected(OP, e))?,
                None => 0,
            };

            let summary = PurgeSummary {
                verification_codes: report.verification_codes,
                refresh_tokens: report.refresh_tokens,
                rate_limit_windows,
            };
            info!(
                "Purged {} verification codes, {} sessions, {} rate-limit windows",
                summary.verification_codes, summary.refresh_tokens, summary.rate_limit_windows
            );
            Ok(summary)
        })
        .await
    }

    /// Checks that the store is reachable
    pub async fn health_check(&self) -> SessionResult<()> {
        const OP: &str = "service.health_check";

        self.with_deadline(OP, async move {
            self.store().ping().await.map_err(|e| unexpected(OP, e))
        })
        .await
    }

    /// Mint an access/refresh pair and record the refresh token for the device
    ///
    /// Both tokens are minted before the store is touched; the only write is
    /// the upsert of the device's record, which invalidates any previous
    /// refresh token for that device.
    async fn create_session(
        &self,
        op: &'static str,
        user_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> SessionResult<TokenPair> {
        let access = self
            .access_signer
            .issue(user_id, self.config.access_token_ttl)
            .map_err(|e| unexpected(op, e))?;
        let refresh = self
            .refresh_signer
            .issue(user_id, self.config.refresh_token_ttl)
            .map_err(|e| unexpected(op, e))?;

        let record = RefreshTokenRecord {
            user_id,
            device_id: device_id.to_string(),
            token_hash: hash_token(&refresh.token),
            expires_at: refresh.expires_at,
            created_at: now,
        };
        self.store()
            .upsert_refresh_token(&record)
            .await
            .map_err(|e| store_failure(op, e))?;

        Ok(TokenPair::new(
            access.token,
            refresh.token,
            self.config.access_token_ttl.num_seconds(),
        ))
    }

    /// Replace the live code of an unverified account and prepare its mail
    async fn trigger_verification(
        &self,
        op: &'static str,
        user: &UserRecord,
        now: DateTime<Utc>,
    ) -> SessionResult<(VerificationIssued, Mail)> {
        let code = self.codes.generate();
        let mail = self.verification_mail(op, &user.email, &user.login, &code)?;

        let record = VerificationCode {
            user_id: user.id,
            code,
            expires_at: self.code_expiry(op, now)?,
        };
        let issued = VerificationIssued {
            expires_at: record.expires_at,
        };

        self.coordinator
            .run(move |repo| Box::pin(async move { repo.upsert_verification_code(&record).await }))
            .await
            .map_err(|e| store_failure(op, e))?;

        Ok((issued, mail))
    }

    fn code_expiry(&self, op: &'static str, now: DateTime<Utc>) -> SessionResult<DateTime<Utc>> {
        now.checked_add_signed(self.config.verification_code_ttl)
            .ok_or_else(|| unexpected(op, "verification code lifetime out of range"))
    }

    /// Spend one password check on an unknown login
    ///
    /// The outcome is ignored; only the cost matters.
    fn verify_dummy_password(&self, password: &str) {
        let stored = match self.dummy_hash.get() {
            Some(stored) => stored,
            None => match self.hasher.hash(DUMMY_PASSWORD) {
                Ok(stored) => self.dummy_hash.get_or_init(|| stored),
                Err(e) => {
                    warn!("Could not prepare dummy password hash: {}", e);
                    return;
                }
            },
        };
        let _ = self.hasher.verify(password, stored);
    }

    fn verification_mail(
        &self,
        op: &'static str,
        to: &str,
        login: &str,
        code: &str,
    ) -> SessionResult<Mail> {
        self.templates
            .verification(
                to,
                login,
                code,
                self.config.verification_code_ttl.num_minutes(),
            )
            .map_err(|e| unexpected(op, e))
    }

    /// Send after commit; failures do not undo what was committed
    async fn deliver(&self, op: &'static str, mail: Mail) -> SessionResult<()> {
        let to = mail.to.clone();
        match tokio::time::timeout(self.config.operation_timeout, self.notifier.send(mail)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("{}: verification email to {} not sent: {}", op, to, e);
                Err(SessionError::Notification(e.to_string()))
            }
            Err(_) => {
                error!("{}: verification email to {} timed out", op, to);
                Err(SessionError::Notification("send timed out".to_string()))
            }
        }
    }

    async fn check_rate_limit(&self, identifier: &str, action: RateLimitAction) -> SessionResult<()> {
        let Some(limiter) = &self.rate_limiter else {
            return Ok(());
        };

        match limiter.hit(identifier, action, self.clock.now()).await {
            Ok(_) => Ok(()),
            Err(RateLimitError::RateLimitExceeded { retry_after, .. }) => {
                Err(SessionError::RateLimited {
                    retry_after_seconds: retry_after,
                })
            }
            Err(e) => Err(unexpected("service.rate_limit", e)),
        }
    }

    /// Bound `work` by the configured operation timeout
    ///
    /// On expiry the future is dropped, which rolls back any open transaction.
    async fn with_deadline<T, F>(&self, op: &'static str, work: F) -> SessionResult<T>
    where
        F: Future<Output = SessionResult<T>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "{}: exceeded deadline of {:?}",
                    op, self.config.operation_timeout
                );
                Err(SessionError::Timeout)
            }
        }
    }
}
