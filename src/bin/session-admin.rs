//! Session Service Administration CLI
//!
//! Drives the session lifecycle against the configured PostgreSQL store
//! without a request layer in front: schema migrations, account sign-up
//! and verification, sign-in, refresh, logout and housekeeping.

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;

use session_service::{
    config::AppConfig,
    database::{run_migrations, PgAccountStore},
    models::{RefreshTokenRequest, ResendRequest, SignInRequest, SignUpRequest, VerifyRequest},
    service::{
        extract_verification_code, EmailTemplates, JwtSigner, Notifier, OutboxNotifier,
        PgRateLimiter, SessionService, SmtpNotifier,
    },
    utils::{BcryptHasher, ErrorResponse, SessionError, SystemClock},
};

/// Session service administration CLI
#[derive(Parser)]
#[command(
    name = "session-admin",
    about = "Session service administration CLI",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Register a new account and send its verification code
    SignUp(SignUpArgs),
    /// Confirm an account with its verification code
    Verify(VerifyArgs),
    /// Send a fresh verification code to an unverified account
    Resend(ResendArgs),
    /// Sign in on a device and print the token pair
    SignIn(SignInArgs),
    /// Exchange a refresh token for a new access token
    Refresh(TokenArgs),
    /// End the session a refresh token belongs to
    Logout(TokenArgs),
    /// End every session of the account behind an access token
    LogoutAll(AccessTokenArgs),
    /// Delete expired verification codes, sessions and rate-limit windows
    Purge,
    /// Check that the database is reachable
    Health,
}

#[derive(Args)]
struct SignUpArgs {
    /// Login name
    #[arg(long)]
    login: String,

    /// Email address
    #[arg(long)]
    email: String,

    /// Password
    #[arg(long)]
    password: String,
}

#[derive(Args)]
struct VerifyArgs {
    /// Verification code from the email
    #[arg(long)]
    code: String,
}

#[derive(Args)]
struct ResendArgs {
    /// Email address of the unverified account
    #[arg(long)]
    email: String,
}

#[derive(Args)]
struct SignInArgs {
    /// Login name
    #[arg(long)]
    login: String,

    /// Password
    #[arg(long)]
    password: String,

    /// Device identifier
    #[arg(long, default_value = "session-admin")]
    device: String,
}

#[derive(Args)]
struct TokenArgs {
    /// Refresh token
    #[arg(long)]
    refresh_token: String,
}

#[derive(Args)]
struct AccessTokenArgs {
    /// Access token
    #[arg(long)]
    access_token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let config = AppConfig::from_env()?;
    config.validate()?;
    let database_pool = config.database.create_pool().await?;

    if let Commands::Migrate = cli.command {
        run_migrations(&database_pool).await?;
        println!("✅ Migrations applied");
        return Ok(());
    }

    // Without SMTP settings, verification mails are printed instead of sent
    let outbox = OutboxNotifier::new();
    let notifier: Arc<dyn Notifier> = match &config.email {
        Some(email) => Arc::new(SmtpNotifier::new(email)?),
        None => Arc::new(outbox.clone()),
    };

    let clock = Arc::new(SystemClock);
    let mut service = SessionService::new(
        Arc::new(PgAccountStore::new(database_pool.clone())),
        Arc::new(JwtSigner::access(&config.jwt.access_secret, clock.clone())),
        Arc::new(JwtSigner::refresh(&config.jwt.refresh_secret, clock.clone())),
        notifier,
        clock,
        config.session.clone(),
    )
    .with_hasher(Arc::new(BcryptHasher::new(config.bcrypt_cost)));

    if let Some(email) = &config.email {
        service = service.with_templates(EmailTemplates::new(email.from_name.clone()));
    }

    if config.rate_limit.enabled {
        service = service.with_rate_limiter(Arc::new(PgRateLimiter::new(
            database_pool,
            config.rate_limit.clone(),
        )));
    }

    let result = match cli.command {
        Commands::Migrate => Ok(()),
        Commands::SignUp(args) => sign_up(&service, args).await,
        Commands::Verify(args) => verify(&service, args).await,
        Commands::Resend(args) => resend(&service, args).await,
        Commands::SignIn(args) => sign_in(&service, args).await,
        Commands::Refresh(args) => refresh(&service, args).await,
        Commands::Logout(args) => logout(&service, args).await,
        Commands::LogoutAll(args) => logout_all(&service, args).await,
        Commands::Purge => purge(&service).await,
        Commands::Health => health(&service).await,
    };

    print_outbox(&outbox);

    if let Err(e) = result {
        let response = ErrorResponse::from(&e);
        eprintln!("❌ {}", serde_json::to_string_pretty(&response)?);
        std::process::exit(1);
    }

    Ok(())
}

async fn sign_up(service: &SessionService, args: SignUpArgs) -> Result<(), SessionError> {
    println!("🔧 Creating account {}...", args.login);

    let issued = service
        .sign_up(SignUpRequest {
            login: args.login,
            email: args.email,
            password: args.password,
        })
        .await?;

    println!("✅ Verification code issued");
    println!("   Code expires: {}", issued.expires_at);

    Ok(())
}

async fn verify(service: &SessionService, args: VerifyArgs) -> Result<(), SessionError> {
    let user_id = service.verify(VerifyRequest { code: args.code }).await?;

    println!("✅ Account {} verified", user_id);
    Ok(())
}

async fn resend(service: &SessionService, args: ResendArgs) -> Result<(), SessionError> {
    let issued = service
        .resend_verification(ResendRequest { email: args.email })
        .await?;

    println!("✅ New verification code issued");
    println!("   Code expires: {}", issued.expires_at);

    Ok(())
}

async fn sign_in(service: &SessionService, args: SignInArgs) -> Result<(), SessionError> {
    let tokens = service
        .sign_in(SignInRequest {
            login: args.login,
            password: args.password,
            device_id: args.device,
        })
        .await?;

    println!("✅ Signed in");
    println!();
    println!("🔑 Tokens:");
    println!("   Access Token: {}", tokens.access_token);
    println!("   Refresh Token: {}", tokens.refresh_token);
    println!("   Expires In: {}s", tokens.expires_in);

    Ok(())
}

async fn refresh(service: &SessionService, args: TokenArgs) -> Result<(), SessionError> {
    let tokens = service
        .refresh(RefreshTokenRequest {
            refresh_token: args.refresh_token.clone(),
        })
        .await?;

    println!("✅ Session refreshed");
    println!("   Access Token: {}", tokens.access_token);
    if tokens.refresh_token == args.refresh_token {
        println!("   Refresh Token: unchanged");
    } else {
        println!("   Refresh Token (rotated): {}", tokens.refresh_token);
    }
    println!("   Expires In: {}s", tokens.expires_in);

    Ok(())
}

async fn logout(service: &SessionService, args: TokenArgs) -> Result<(), SessionError> {
    service
        .logout(RefreshTokenRequest {
            refresh_token: args.refresh_token,
        })
        .await?;

    println!("✅ Session ended");
    Ok(())
}

async fn logout_all(service: &SessionService, args: AccessTokenArgs) -> Result<(), SessionError> {
    let removed = service.logout_all(&args.access_token).await?;

    println!("✅ Ended {} session(s)", removed);
    Ok(())
}

async fn purge(service: &SessionService) -> Result<(), SessionError> {
    println!("🧹 Purging expired records...");

    let summary = service.purge_expired().await?;

    println!("   Verification codes: {}", summary.verification_codes);
    println!("   Sessions: {}", summary.refresh_tokens);
    println!("   Rate-limit windows: {}", summary.rate_limit_windows);

    Ok(())
}

async fn health(service: &SessionService) -> Result<(), SessionError> {
    service.health_check().await?;

    println!("✅ Database reachable");
    Ok(())
}

fn print_outbox(outbox: &OutboxNotifier) {
    for mail in outbox.drain() {
        println!();
        println!("📧 Email to {} ({})", mail.to, mail.subject);
        if let Some(code) = extract_verification_code(&mail.body) {
            println!("   Verification code: {}", code);
        }
    }
}
