//! Streaming and download credentials at the service level.

use std::sync::Arc;
use std::time::Duration;

use paystream::services::AccessTokenIssuer;

mod common;
use common::*;

async fn grant_for(env: &TestEnv, user: &str, video_id: &str) -> paystream::services::EntitlementGrant {
    env.state
        .entitlements
        .check_access(user, video_id)
        .await
        .unwrap()
        .require_grant()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_download_redemption_has_one_winner() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    let grant = grant_for(&env, "creator", &video.id).await;

    for _ in 0..20 {
        let issued = env.state.tokens.issue_download_token(&grant).await.unwrap();

        let tokens = env.state.tokens.clone();
        let first = {
            let tokens = tokens.clone();
            let id = issued.token.clone();
            tokio::spawn(async move { tokens.redeem_download_token(&id).await })
        };
        let second = {
            let id = issued.token.clone();
            tokio::spawn(async move { tokens.redeem_download_token(&id).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(AppError::VideoAccess(_))))
        );
    }
}

#[tokio::test]
async fn test_stream_token_dies_with_its_mirror_entry() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    let grant = grant_for(&env, "creator", &video.id).await;

    let store = Arc::new(MemoryStore::new());
    let issuer = AccessTokenIssuer::new(
        store.clone(),
        StreamSigner::from_seed(&[1u8; 32]).unwrap(),
        Duration::from_millis(30),
        Duration::from_secs(60),
    );

    let issued = issuer.issue_streaming_token(&grant).await.unwrap();
    let access = issuer.validate_streaming_token(&issued.token).await.unwrap();
    assert_eq!(access.user_id, "creator");
    assert_eq!(access.video_id, video.id);

    // The JWT itself is still within its (second-granular) validity here
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(matches!(
        issuer.validate_streaming_token(&issued.token).await,
        Err(AppError::VideoAccess(_))
    ));
}

#[tokio::test]
async fn test_tokens_from_another_key_are_rejected() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    let grant = grant_for(&env, "creator", &video.id).await;

    // Same store, different signing key
    let foreign = AccessTokenIssuer::new(
        env.store.clone(),
        StreamSigner::from_seed(&[9u8; 32]).unwrap(),
        Duration::from_secs(60),
        Duration::from_secs(60),
    );
    let issued = foreign.issue_streaming_token(&grant).await.unwrap();

    assert!(matches!(
        env.state.tokens.validate_streaming_token(&issued.token).await,
        Err(AppError::VideoAccess(_))
    ));
}

#[tokio::test]
async fn test_revoking_twice_reports_false() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    let grant = grant_for(&env, "creator", &video.id).await;

    let issued = env.state.tokens.issue_streaming_token(&grant).await.unwrap();
    assert!(env.state.tokens.revoke(&issued.token, "creator").await.unwrap());
    assert!(!env.state.tokens.revoke(&issued.token, "creator").await.unwrap());
}
