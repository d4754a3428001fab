mod common;

use chrono::Duration;
use std::sync::Arc;

use common::{BrokenSigner, FailingNotifier, Harness, SequentialCodes, StalledNotifier, PASSWORD};
use session_service::{
    database::AccountRepository,
    models::{RefreshTokenRequest, ResendRequest, SignUpRequest, TokenNamespace, VerificationIssued},
    utils::{Clock, ErrorKind, SessionError},
};

fn refresh_request(token: &str) -> RefreshTokenRequest {
    RefreshTokenRequest {
        refresh_token: token.to_string(),
    }
}

#[tokio::test]
async fn test_sign_up_verify_sign_in() {
    let h = Harness::new();

    h.sign_up("root", "a@b.com").await.unwrap();
    let user_id = h.user_id("a@b.com").await;
    assert_eq!(h.outbox.len(), 1);

    let code = h.mailed_code("a@b.com");
    assert_eq!(code, SequentialCodes::code(1));
    assert_eq!(h.verify(&code).await.unwrap(), user_id);

    let tokens = h.sign_in("root", "d1").await.unwrap();
    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.expires_in, 15 * 60);

    let context = h.service.authenticate(&tokens.access_token).unwrap();
    assert_eq!(context.user_id, user_id);

    let user = h.store.find_user_by_login("root").await.unwrap();
    assert!(user.verified);
    assert_ne!(user.password_hash, PASSWORD);
}

#[tokio::test]
async fn test_code_is_single_use() {
    let h = Harness::new();
    h.sign_up("root", "a@b.com").await.unwrap();
    let code = h.mailed_code("a@b.com");

    h.verify(&code).await.unwrap();
    assert!(matches!(h.verify(&code).await, Err(SessionError::NotFound)));
}

#[tokio::test]
async fn test_unknown_code_not_found() {
    let h = Harness::new();
    h.sign_up("root", "a@b.com").await.unwrap();

    assert!(matches!(
        h.verify("ZZZZZZ").await,
        Err(SessionError::NotFound)
    ));
}

#[tokio::test]
async fn test_expired_code_not_found() {
    let h = Harness::new();
    h.sign_up("root", "a@b.com").await.unwrap();
    let code = h.mailed_code("a@b.com");

    h.clock.advance(Duration::minutes(10));

    assert!(matches!(h.verify(&code).await, Err(SessionError::NotFound)));
    assert!(!h.store.find_user_by_email("a@b.com").await.unwrap().verified);
}

#[tokio::test]
async fn test_resend_replaces_previous_code() {
    let h = Harness::new();
    h.sign_up("root", "a@b.com").await.unwrap();
    let user_id = h.user_id("a@b.com").await;
    let first = h.mailed_code("a@b.com");

    let issued = h
        .service
        .resend_verification(ResendRequest {
            email: "a@b.com".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(issued.expires_at, h.clock.now() + Duration::minutes(10));

    let second = h.mailed_code("a@b.com");
    assert_ne!(first, second);
    assert_eq!(h.outbox.len(), 2);

    assert!(matches!(h.verify(&first).await, Err(SessionError::NotFound)));
    assert_eq!(h.verify(&second).await.unwrap(), user_id);
}

#[tokio::test]
async fn test_resend_after_expiry_allows_verification() {
    let h = Harness::new();
    h.sign_up("root", "a@b.com").await.unwrap();
    let user_id = h.user_id("a@b.com").await;

    h.clock.advance(Duration::minutes(30));
    h.service
        .resend_verification(ResendRequest {
            email: "A@B.com".to_string(),
        })
        .await
        .unwrap();

    let code = h.mailed_code("a@b.com");
    assert_eq!(h.verify(&code).await.unwrap(), user_id);
}

#[tokio::test]
async fn test_resend_rejects_verified_and_unknown_accounts() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;
    let sent = h.outbox.len();

    let verified = h
        .service
        .resend_verification(ResendRequest {
            email: "a@b.com".to_string(),
        })
        .await;
    assert!(matches!(verified, Err(SessionError::AlreadyExists)));

    let unknown = h
        .service
        .resend_verification(ResendRequest {
            email: "nobody@b.com".to_string(),
        })
        .await;
    assert!(matches!(unknown, Err(SessionError::NotFound)));
    assert_eq!(h.outbox.len(), sent);
}

#[tokio::test]
async fn test_sign_up_again_while_unverified_reissues_code() {
    let h = Harness::new();
    h.sign_up("root", "a@b.com").await.unwrap();
    let user_id = h.user_id("a@b.com").await;
    let first = h.mailed_code("a@b.com");

    // Same email, different login: the pending account gets a new code
    let again = h.sign_up("root2", "a@b.com").await.unwrap();
    assert_eq!(
        again,
        VerificationIssued {
            expires_at: h.clock.now() + Duration::minutes(10),
        }
    );

    let second = h.mailed_code("a@b.com");
    assert_ne!(first, second);
    assert!(matches!(h.verify(&first).await, Err(SessionError::NotFound)));
    assert_eq!(h.verify(&second).await.unwrap(), user_id);
    assert!(matches!(
        h.store.find_user_by_login("root2").await,
        Err(session_service::StoreError::NotFound)
    ));
}

#[tokio::test]
async fn test_sign_up_verified_duplicate_rejected_without_mail() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;
    let sent = h.outbox.len();

    assert!(matches!(
        h.sign_up("root", "a@b.com").await,
        Err(SessionError::AlreadyExists)
    ));
    assert!(matches!(
        h.sign_up("other", "a@b.com").await,
        Err(SessionError::AlreadyExists)
    ));
    assert_eq!(h.outbox.len(), sent);
}

#[tokio::test]
async fn test_sign_up_login_collision_rejected() {
    let h = Harness::new();
    h.sign_up("root", "a@b.com").await.unwrap();

    assert!(matches!(
        h.sign_up("root", "c@d.com").await,
        Err(SessionError::AlreadyExists)
    ));
    assert!(h.outbox.last_to("c@d.com").is_none());
}

#[tokio::test]
async fn test_sign_up_rejects_invalid_payload() {
    let h = Harness::new();

    let result = h
        .service
        .sign_up(SignUpRequest {
            login: "root".to_string(),
            email: "a@b.com".to_string(),
            password: "short".to_string(),
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.outbox.is_empty());
}

#[tokio::test]
async fn test_notification_failure_keeps_account() {
    let h = Harness::builder()
        .notifier(Arc::new(FailingNotifier))
        .build();

    let result = h.sign_up("root", "a@b.com").await;
    assert!(matches!(result, Err(SessionError::Notification(_))));

    // Account and code were committed before delivery was attempted
    let user = h.store.find_user_by_email("a@b.com").await.unwrap();
    assert!(!user.verified);
    assert_eq!(h.verify(&SequentialCodes::code(1)).await.unwrap(), user.id);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_notifier_times_out_as_notification_failure() {
    let h = Harness::builder()
        .notifier(Arc::new(StalledNotifier))
        .build();

    let result = h.sign_up("root", "a@b.com").await;
    assert!(matches!(result, Err(SessionError::Notification(_))));
    assert!(h.store.find_user_by_email("a@b.com").await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_verify_has_one_winner() {
    let h = Arc::new(Harness::new());
    h.sign_up("root", "a@b.com").await.unwrap();
    let user_id = h.user_id("a@b.com").await;
    let code = h.mailed_code("a@b.com");

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            let code = code.clone();
            tokio::spawn(async move { h.verify(&code).await })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(id) => {
                assert_eq!(id, user_id);
                winners += 1;
            }
            Err(SessionError::NotFound) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_sign_in_failures() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;
    h.sign_up("pending", "p@b.com").await.unwrap();

    assert!(matches!(
        h.sign_in("nobody", "d1").await,
        Err(SessionError::InvalidCredentials)
    ));
    assert!(matches!(
        h.sign_in_with("root", "wrongpassword", "d1").await,
        Err(SessionError::InvalidCredentials)
    ));
    assert!(matches!(
        h.sign_in("pending", "d1").await,
        Err(SessionError::NotVerified)
    ));
}

#[tokio::test]
async fn test_refresh_within_grace_reuses_token() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;
    let tokens = h.sign_in("root", "d1").await.unwrap();

    h.clock.advance(Duration::hours(100));
    let refreshed = h
        .service
        .refresh(refresh_request(&tokens.refresh_token))
        .await
        .unwrap();

    assert_eq!(refreshed.refresh_token, tokens.refresh_token);
    assert_ne!(refreshed.access_token, tokens.access_token);
    assert!(h.service.authenticate(&refreshed.access_token).is_ok());
}

#[tokio::test]
async fn test_refresh_near_expiry_rotates_token() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;
    let tokens = h.sign_in("root", "d1").await.unwrap();

    // 20h left, inside the 24h grace window
    h.clock.advance(Duration::hours(700));
    let rotated = h
        .service
        .refresh(refresh_request(&tokens.refresh_token))
        .await
        .unwrap();
    assert_ne!(rotated.refresh_token, tokens.refresh_token);

    let stale = h.service.refresh(refresh_request(&tokens.refresh_token)).await;
    assert!(matches!(stale, Err(SessionError::InvalidToken(_))));

    // The rotated session has a full lifetime again
    h.clock.advance(Duration::hours(100));
    let reused = h
        .service
        .refresh(refresh_request(&rotated.refresh_token))
        .await
        .unwrap();
    assert_eq!(reused.refresh_token, rotated.refresh_token);
}

#[tokio::test]
async fn test_expired_refresh_token() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;
    let tokens = h.sign_in("root", "d1").await.unwrap();

    h.clock.advance(Duration::hours(720));
    let result = h.service.refresh(refresh_request(&tokens.refresh_token)).await;

    assert!(matches!(result, Err(SessionError::TokenExpired)));
}

#[tokio::test]
async fn test_refresh_rejects_unknown_and_access_tokens() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;
    let tokens = h.sign_in("root", "d1").await.unwrap();

    let unknown = h.service.refresh(refresh_request("not-a-token")).await;
    assert!(matches!(unknown, Err(SessionError::InvalidToken(_))));

    let access = h.service.refresh(refresh_request(&tokens.access_token)).await;
    assert!(matches!(access, Err(SessionError::InvalidToken(_))));
}

#[tokio::test]
async fn test_sessions_are_per_device() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;

    let d1 = h.sign_in("root", "d1").await.unwrap();
    let d2 = h.sign_in("root", "d2").await.unwrap();

    h.service
        .logout(refresh_request(&d1.refresh_token))
        .await
        .unwrap();

    assert!(matches!(
        h.service.refresh(refresh_request(&d1.refresh_token)).await,
        Err(SessionError::InvalidToken(_))
    ));
    assert!(h
        .service
        .refresh(refresh_request(&d2.refresh_token))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_sign_in_again_replaces_device_session() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;

    let first = h.sign_in("root", "d1").await.unwrap();
    let second = h.sign_in("root", "d1").await.unwrap();
    assert_ne!(first.refresh_token, second.refresh_token);

    assert!(matches!(
        h.service.refresh(refresh_request(&first.refresh_token)).await,
        Err(SessionError::InvalidToken(_))
    ));
    assert!(h
        .service
        .refresh(refresh_request(&second.refresh_token))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_logout_twice_not_found() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;
    let tokens = h.sign_in("root", "d1").await.unwrap();

    h.service
        .logout(refresh_request(&tokens.refresh_token))
        .await
        .unwrap();
    assert!(matches!(
        h.service.logout(refresh_request(&tokens.refresh_token)).await,
        Err(SessionError::NotFound)
    ));
}

#[tokio::test]
async fn test_logout_all_ends_every_device() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;
    h.verified_account("other", "o@b.com").await;

    let d1 = h.sign_in("root", "d1").await.unwrap();
    let d2 = h.sign_in("root", "d2").await.unwrap();
    let other = h.sign_in("other", "d1").await.unwrap();

    // A refresh token is not accepted as an access token
    assert!(matches!(
        h.service.logout_all(&d1.refresh_token).await,
        Err(SessionError::InvalidToken(_))
    ));

    assert_eq!(h.service.logout_all(&d1.access_token).await.unwrap(), 2);
    for token in [&d1.refresh_token, &d2.refresh_token] {
        assert!(matches!(
            h.service.refresh(refresh_request(token)).await,
            Err(SessionError::InvalidToken(_))
        ));
    }
    assert!(h
        .service
        .refresh(refresh_request(&other.refresh_token))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_authenticate_rejects_expired_access_token() {
    let h = Harness::new();
    h.verified_account("root", "a@b.com").await;
    let tokens = h.sign_in("root", "d1").await.unwrap();

    h.clock.advance(Duration::minutes(15));
    let err = h.service.authenticate(&tokens.access_token).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidToken);
}

#[tokio::test]
async fn test_signer_failure_writes_no_session() {
    let h = Harness::builder()
        .refresh_signer(Arc::new(BrokenSigner(TokenNamespace::Refresh)))
        .build();
    let user_id = h.verified_account("root", "a@b.com").await;

    let result = h.sign_in("root", "d1").await;
    assert!(matches!(result, Err(SessionError::Unexpected(_))));
    assert_eq!(h.store.delete_user_refresh_tokens(user_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_rate_limited_sign_in() {
    let h = Harness::builder().rate_limit(3).build();
    h.verified_account("root", "a@b.com").await;

    for _ in 0..3 {
        assert!(matches!(
            h.sign_in_with("root", "wrongpassword", "d1").await,
            Err(SessionError::InvalidCredentials)
        ));
    }

    match h.sign_in("root", "d1").await {
        Err(SessionError::RateLimited {
            retry_after_seconds,
        }) => assert!(retry_after_seconds > 0),
        other => panic!("expected rate limit, got {other:?}"),
    }

    // Another login has its own budget
    h.verified_account("other", "o@b.com").await;
    assert!(h.sign_in("other", "d1").await.is_ok());
}

#[tokio::test]
async fn test_purge_expired() {
    let h = Harness::builder().rate_limit(10).build();
    h.verified_account("root", "a@b.com").await;
    h.sign_in("root", "d1").await.unwrap();
    h.sign_up("pending", "p@b.com").await.unwrap();

    let nothing = h.service.purge_expired().await.unwrap();
    assert_eq!(nothing.verification_codes, 0);
    assert_eq!(nothing.refresh_tokens, 0);
    assert_eq!(nothing.rate_limit_windows, 0);

    h.clock.advance(Duration::hours(720));
    let summary = h.service.purge_expired().await.unwrap();

    assert_eq!(summary.verification_codes, 1);
    assert_eq!(summary.refresh_tokens, 1);
    // sign-up windows for both emails plus the sign-in window for root
    assert_eq!(summary.rate_limit_windows, 3);
}

#[tokio::test]
async fn test_health_check() {
    let h = Harness::new();
    assert!(h.service.health_check().await.is_ok());
}
