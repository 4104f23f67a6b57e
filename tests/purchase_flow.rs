//! End-to-end purchase pipeline at the service level: intent creation,
//! webhook fulfillment and the access decision that follows.

use std::sync::Arc;
use std::time::Duration;

use paystream::services::FulfillmentOutcome;

mod common;
use common::*;

fn assert_payment_error<T: std::fmt::Debug>(result: paystream::error::Result<T>, expected: PaymentError) {
    match result {
        Err(AppError::Payment(e)) => assert_eq!(e, expected),
        other => panic!("expected {:?}, got {:?}", expected, other),
    }
}

#[tokio::test]
async fn test_nine_ninety_nine_purchase_scenario() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));

    let created = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();
    assert_eq!(created.amount, 9.99);
    assert_eq!(created.client_secret, "pi_test_1_secret_abc");

    let pending = env.state.ledger.find_by_id(&created.purchase_id).unwrap().unwrap();
    assert_eq!(pending.status, PurchaseStatus::Pending);
    assert_eq!(pending.amount(), 9.99);
    assert_eq!(pending.gateway_payment_id.as_deref(), Some("pi_test_1"));

    let metadata = env.gateway.last_metadata().unwrap();
    assert_eq!(metadata.purchase_id, created.purchase_id);
    assert_eq!(metadata.video_id, video.id);
    assert_eq!(metadata.user_id, "buyer");

    let outcome = env
        .deliver(&event_payload(
            "evt_1",
            "payment_intent.succeeded",
            "pi_test_1",
            Some(&created.purchase_id),
        ))
        .await;
    assert_eq!(
        outcome,
        FulfillmentOutcome::Completed {
            purchase_id: created.purchase_id.clone()
        }
    );

    let completed = env.state.ledger.find_by_id(&created.purchase_id).unwrap().unwrap();
    assert_eq!(completed.status, PurchaseStatus::Completed);
    assert!(completed.completed_at.is_some());

    let decision = env.state.entitlements.check_access("buyer", &video.id).await.unwrap();
    assert!(decision.has_access);
    assert!(!decision.is_owner);

    assert_payment_error(
        env.state.purchases.create_intent("buyer", &video.id).await,
        PaymentError::AlreadyPurchased,
    );
}

#[tokio::test]
async fn test_validation_order() {
    let env = TestEnv::new();
    let free = env.video("creator", None);
    let zero = env.video("creator", Some(0));
    let priced = env.video("creator", Some(500));

    assert_payment_error(
        env.state.purchases.create_intent("buyer", "no-such-video").await,
        PaymentError::VideoNotFound,
    );
    assert_payment_error(
        env.state.purchases.create_intent("buyer", &free.id).await,
        PaymentError::InvalidPrice,
    );
    assert_payment_error(
        env.state.purchases.create_intent("buyer", &zero.id).await,
        PaymentError::InvalidPrice,
    );
    assert_payment_error(
        env.state.purchases.create_intent("creator", &priced.id).await,
        PaymentError::CannotPurchaseOwnContent,
    );

    env.state.purchases.create_intent("buyer", &priced.id).await.unwrap();
    assert_payment_error(
        env.state.purchases.create_intent("buyer", &priced.id).await,
        PaymentError::PurchaseInProgress,
    );
    assert_eq!(env.gateway.intents_created(), 1);
}

#[tokio::test]
async fn test_duplicate_success_events_complete_exactly_once() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    let created = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();
    let payload = event_payload(
        "evt_dup",
        "payment_intent.succeeded",
        "pi_test_1",
        Some(&created.purchase_id),
    );

    let mut completions = 0;
    let mut completed_at = None;
    for _ in 0..5 {
        if let FulfillmentOutcome::Completed { .. } = env.deliver(&payload).await {
            completions += 1;
        }
        let purchase = env.state.ledger.find_by_id(&created.purchase_id).unwrap().unwrap();
        assert_eq!(purchase.status, PurchaseStatus::Completed);
        match completed_at {
            None => completed_at = purchase.completed_at,
            Some(_) => assert_eq!(purchase.completed_at, completed_at),
        }
    }
    assert_eq!(completions, 1);

    // Later deliveries are short-circuited by the completion marker
    assert_eq!(env.deliver(&payload).await, FulfillmentOutcome::AlreadyFulfilled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_duplicate_deliveries() {
    let env = Arc::new(TestEnv::new());
    let video = env.video("creator", Some(999));
    let created = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();
    let payload = event_payload(
        "evt_conc",
        "payment_intent.succeeded",
        "pi_test_1",
        Some(&created.purchase_id),
    );

    let mut handles = Vec::new();
    for _ in 0..10 {
        let env = env.clone();
        let payload = payload.clone();
        handles.push(tokio::spawn(async move { env.deliver(&payload).await }));
    }

    let mut completed = 0;
    for handle in handles {
        if let FulfillmentOutcome::Completed { .. } = handle.await.unwrap() {
            completed += 1;
        }
    }
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_marker_expiry_still_cannot_reprocess() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    let created = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();
    let payload = event_payload(
        "evt_late",
        "payment_intent.succeeded",
        "pi_test_1",
        Some(&created.purchase_id),
    );
    env.deliver(&payload).await;

    env.store
        .delete(&paystream::services::fulfillment_marker_key("pi_test_1"))
        .await
        .unwrap();

    match env.deliver(&payload).await {
        FulfillmentOutcome::NoChange { status, .. } => assert_eq!(status, PurchaseStatus::Completed),
        other => panic!("expected no change, got {:?}", other),
    }
}

#[tokio::test]
async fn test_held_fulfillment_lock_means_already_processing() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    let created = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();

    env.store
        .set_if_absent("fulfillment:pi_test_1", "other-holder", Duration::from_secs(60))
        .await
        .unwrap();

    let outcome = env
        .deliver(&event_payload(
            "evt_1",
            "payment_intent.succeeded",
            "pi_test_1",
            Some(&created.purchase_id),
        ))
        .await;
    assert_eq!(outcome, FulfillmentOutcome::AlreadyProcessing);

    let purchase = env.state.ledger.find_by_id(&created.purchase_id).unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Pending);
    // The other holder's lock is untouched
    assert_eq!(
        env.store.get("fulfillment:pi_test_1").await.unwrap().as_deref(),
        Some("other-holder")
    );
}

#[tokio::test]
async fn test_failure_then_success_does_not_regress() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    let created = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();

    let failed = env
        .deliver(&event_payload(
            "evt_f",
            "payment_intent.payment_failed",
            "pi_test_1",
            Some(&created.purchase_id),
        ))
        .await;
    assert_eq!(
        failed,
        FulfillmentOutcome::Failed {
            purchase_id: created.purchase_id.clone()
        }
    );

    let late = env
        .deliver(&event_payload(
            "evt_s",
            "payment_intent.succeeded",
            "pi_test_1",
            Some(&created.purchase_id),
        ))
        .await;
    assert_eq!(late, FulfillmentOutcome::AlreadyFulfilled);

    let purchase = env.state.ledger.find_by_id(&created.purchase_id).unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Failed);
    assert!(!env.state.entitlements.check_access("buyer", &video.id).await.unwrap().has_access);

    // A failed attempt does not block a new one
    env.state.purchases.create_intent("buyer", &video.id).await.unwrap();
}

#[tokio::test]
async fn test_processing_event_is_a_no_op() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    let created = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();

    let outcome = env
        .deliver(&event_payload(
            "evt_p",
            "payment_intent.processing",
            "pi_test_1",
            Some(&created.purchase_id),
        ))
        .await;
    assert_eq!(
        outcome,
        FulfillmentOutcome::NoChange {
            purchase_id: created.purchase_id.clone(),
            status: PurchaseStatus::Pending,
        }
    );
}

#[tokio::test]
async fn test_event_without_metadata_resolves_by_payment_id() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    let created = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();

    // Via the intent mapping
    let outcome = env
        .deliver(&event_payload("evt_1", "payment_intent.succeeded", "pi_test_1", None))
        .await;
    assert_eq!(
        outcome,
        FulfillmentOutcome::Completed {
            purchase_id: created.purchase_id.clone()
        }
    );

    // Via the ledger once the mapping is gone
    let other = env.video("creator", Some(250));
    let second = env.state.purchases.create_intent("buyer", &other.id).await.unwrap();
    env.store.delete("intent:pi_test_2").await.unwrap();
    let outcome = env
        .deliver(&event_payload("evt_2", "payment_intent.payment_failed", "pi_test_2", None))
        .await;
    assert_eq!(
        outcome,
        FulfillmentOutcome::Failed {
            purchase_id: second.purchase_id
        }
    );
}

#[tokio::test]
async fn test_unknown_and_unmatched_events_are_acknowledged() {
    let env = TestEnv::new();

    let ignored = env
        .deliver(&event_payload("evt_x", "charge.refunded", "ch_1", None))
        .await;
    assert_eq!(
        ignored,
        FulfillmentOutcome::Ignored {
            event_type: "charge.refunded".into()
        }
    );

    let unmatched = env
        .deliver(&event_payload("evt_y", "payment_intent.succeeded", "pi_unknown", None))
        .await;
    assert_eq!(unmatched, FulfillmentOutcome::Unmatched);
}

#[tokio::test]
async fn test_entitlement_is_visible_immediately_after_completion() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));

    // Owners never need a purchase
    let owner = env.state.entitlements.check_access("creator", &video.id).await.unwrap();
    assert!(owner.has_access && owner.is_owner);

    let created = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();
    let before = env.state.entitlements.check_access("buyer", &video.id).await.unwrap();
    assert!(!before.has_access);
    assert!(before.grant().is_none());

    env.deliver(&event_payload(
        "evt_1",
        "payment_intent.succeeded",
        "pi_test_1",
        Some(&created.purchase_id),
    ))
    .await;

    let after = env.state.entitlements.check_access("buyer", &video.id).await.unwrap();
    assert!(after.has_access);
    let grant = after.grant().unwrap();
    assert_eq!(grant.user_id(), "buyer");
    assert_eq!(grant.video_id(), video.id);

    // Another user is unaffected
    assert!(!env.state.entitlements.check_access("stranger", &video.id).await.unwrap().has_access);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_fifty_concurrent_intents_yield_one_live_purchase() {
    let env = Arc::new(TestEnv::new());
    let video = env.video("creator", Some(999));
    env.gateway.set_delay(Duration::from_millis(20));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let env = env.clone();
        let video_id = video.id.clone();
        handles.push(tokio::spawn(async move {
            env.state.purchases.create_intent("buyer", &video_id).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AppError::Payment(PaymentError::PurchaseInProgress)) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(env.gateway.intents_created(), 1);

    let live = env
        .state
        .ledger
        .list_for_user("buyer")
        .unwrap()
        .into_iter()
        .filter(|p| p.status != PurchaseStatus::Failed)
        .count();
    assert_eq!(live, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_simultaneous_pair_only_one_reaches_gateway() {
    let env = Arc::new(TestEnv::new());
    let video = env.video("creator", Some(999));
    env.gateway.set_delay(Duration::from_millis(200));

    let (a, b) = tokio::join!(
        env.state.purchases.create_intent("buyer", &video.id),
        env.state.purchases.create_intent("buyer", &video.id),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(AppError::Payment(PaymentError::PurchaseInProgress))
    )));
    assert_eq!(env.gateway.intents_created(), 1);
}

#[tokio::test]
async fn test_gateway_failure_marks_purchase_failed_and_releases_lock() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    env.gateway.set_failing(true);

    let err = env.state.purchases.create_intent("buyer", &video.id).await.unwrap_err();
    assert!(matches!(err, AppError::Gateway(_)));

    let purchases = env.state.ledger.list_for_user("buyer").unwrap();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].status, PurchaseStatus::Failed);
    assert!(env.store.get(&format!("purchase:buyer:{}", video.id)).await.unwrap().is_none());
    assert!(env.store.is_empty().await);

    // The buyer can retry right away
    env.gateway.set_failing(false);
    env.state.purchases.create_intent("buyer", &video.id).await.unwrap();
}

#[tokio::test]
async fn test_success_webhook_arriving_before_intent_response() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    env.gateway
        .succeed_before_returning(env.state.fulfillment.clone());

    let created = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();

    assert_eq!(
        env.gateway.early_outcome(),
        Some(FulfillmentOutcome::Completed {
            purchase_id: created.purchase_id.clone()
        })
    );
    let purchase = env.state.ledger.find_by_id(&created.purchase_id).unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);
    assert_eq!(purchase.gateway_payment_id.as_deref(), Some("pi_test_1"));

    let decision = env.state.entitlements.check_access("buyer", &video.id).await.unwrap();
    assert!(decision.has_access);
}

#[tokio::test]
async fn test_purchase_bound_to_another_payment_is_abandoned() {
    let env = TestEnv::new();
    let video = env.video("creator", Some(999));
    env.gateway
        .bind_elsewhere_before_returning(env.state.ledger.clone(), "pi_foreign");

    let err = env.state.purchases.create_intent("buyer", &video.id).await.unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));

    let purchases = env.state.ledger.list_for_user("buyer").unwrap();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].status, PurchaseStatus::Failed);

    // Nothing left pending, so the retry goes through
    let retried = env.state.purchases.create_intent("buyer", &video.id).await.unwrap();
    assert_eq!(retried.client_secret, "pi_test_2_secret_abc");
}

#[tokio::test]
async fn test_intent_creation_is_rate_limited_per_user() {
    let env = TestEnv::with_policy(Policy {
        intent_rate_limit: 2,
        ..Policy::default()
    });
    let videos: Vec<_> = (0..3).map(|_| env.video("creator", Some(100))).collect();

    env.state.purchases.create_intent("buyer", &videos[0].id).await.unwrap();
    env.state.purchases.create_intent("buyer", &videos[1].id).await.unwrap();
    let err = env.state.purchases.create_intent("buyer", &videos[2].id).await.unwrap_err();
    assert!(matches!(err, AppError::RateLimited { .. }));

    // Other users have their own budget
    env.state.purchases.create_intent("someone-else", &videos[2].id).await.unwrap();
}
