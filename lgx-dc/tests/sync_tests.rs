//! ERP synchronization: idempotency, retry exhaustion, rejection, locking

mod helpers;

use futures::future::join_all;
use helpers::*;
use lgx_common::events::{Broadcaster, Channel, DeliveryEvent, SyncState};
use lgx_dc::db::deliveries;
use lgx_dc::models::{SyncFilter, SyncOutcome};
use lgx_dc::services::erp_client::classify;
use lgx_dc::services::{ErpError, RetryPolicy, SyncService};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct SyncFixture {
    _dir: tempfile::TempDir,
    pool: sqlx::SqlitePool,
    erp: Arc<FakeErp>,
    broadcaster: Broadcaster,
    service: Arc<SyncService>,
}

async fn fixture(policy: RetryPolicy) -> SyncFixture {
    let (dir, pool) = test_db().await;
    let erp = FakeErp::new();
    let broadcaster = Broadcaster::new(64);
    let service = Arc::new(SyncService::new(
        pool.clone(),
        erp.clone(),
        broadcaster.clone(),
        dir.path().join("photos"),
        policy,
        CancellationToken::new(),
    ));
    SyncFixture {
        _dir: dir,
        pool,
        erp,
        broadcaster,
        service,
    }
}

fn transient() -> ErpError {
    ErpError::Transient("503: maintenance".to_string())
}

#[tokio::test]
async fn test_second_sync_makes_no_erp_calls() {
    let f = fixture(fast_retry(3)).await;
    let delivery = insert_delivery(&f.pool, 42, SyncState::Pending).await;

    let first = f.service.sync(delivery.id).await.unwrap();
    assert_eq!(first, SyncOutcome::Synced { attempts: 1 });
    assert_eq!(f.erp.status_calls(), 1);
    assert_eq!(f.erp.tracking_calls(), 1, "GPS present, tracking row expected");

    let second = f.service.sync(delivery.id).await.unwrap();
    assert_eq!(second, SyncOutcome::AlreadySynced);
    assert_eq!(f.erp.status_calls(), 1);
    assert_eq!(f.erp.tracking_calls(), 1);

    let stored = deliveries::load_delivery(&f.pool, delivery.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_state, SyncState::Synced);
    assert!(stored.erp_sync_timestamp.is_some());
    assert_eq!(stored.sync_error, None);
}

#[tokio::test]
async fn test_every_call_carries_idempotency_key() {
    let f = fixture(fast_retry(3)).await;
    let delivery = insert_delivery(&f.pool, 42, SyncState::Pending).await;

    f.service.sync(delivery.id).await.unwrap();

    let keys = f.erp.idempotency_keys();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], format!("42:status:{}", delivery.id));
    assert_eq!(keys[1], format!("42:tracking:{}", delivery.id));
}

#[tokio::test]
async fn test_retry_exhaustion_makes_exactly_n_attempts() {
    let f = fixture(fast_retry(3)).await;
    let delivery = insert_delivery(&f.pool, 42, SyncState::Pending).await;
    f.erp.fail_always(transient(), 10);

    let outcome = f.service.sync(delivery.id).await.unwrap();

    match &outcome {
        SyncOutcome::Failed { attempts, error } => {
            assert_eq!(*attempts, 3);
            assert!(error.contains("ERP sync failed after 3 attempts"), "{}", error);
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(f.erp.status_calls(), 3);

    let stored = deliveries::load_delivery(&f.pool, delivery.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_state, SyncState::SyncFailed);
    assert_eq!(stored.sync_attempts, 3);
    assert!(stored
        .sync_error
        .as_deref()
        .unwrap()
        .starts_with("ERP sync failed after"));
    assert!(stored.erp_sync_timestamp.is_none());
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let f = fixture(fast_retry(3)).await;
    let delivery = insert_delivery(&f.pool, 42, SyncState::Pending).await;
    f.erp.fail_next([transient(), ErpError::Timeout(Duration::from_secs(10))]);

    let outcome = f.service.sync(delivery.id).await.unwrap();

    assert_eq!(outcome, SyncOutcome::Synced { attempts: 3 });
    assert_eq!(f.erp.status_calls(), 3);
    let stored = deliveries::load_delivery(&f.pool, delivery.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_state, SyncState::Synced);
    assert_eq!(stored.sync_attempts, 3);
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let f = fixture(fast_retry(3)).await;
    let delivery = insert_delivery(&f.pool, 42, SyncState::Pending).await;
    f.erp.fail_next([ErpError::Rejected {
        status: 422,
        message: "unknown shipment state".to_string(),
    }]);

    let outcome = f.service.sync(delivery.id).await.unwrap();

    assert!(matches!(outcome, SyncOutcome::Rejected { .. }));
    assert_eq!(f.erp.status_calls(), 1);
    let stored = deliveries::load_delivery(&f.pool, delivery.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_state, SyncState::SyncFailed);
    assert!(stored
        .sync_error
        .as_deref()
        .unwrap()
        .starts_with("ERP rejected delivery:"));
}

#[tokio::test]
async fn test_document_format_rejection_is_not_retried() {
    let f = fixture(fast_retry(3)).await;
    let delivery = insert_delivery(&f.pool, 42, SyncState::Pending).await;
    insert_signature(&f.pool, delivery.id).await;
    f.erp.fail_documents([classify(
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        "image/png not accepted".to_string(),
    )]);

    let outcome = f.service.sync(delivery.id).await.unwrap();

    assert!(matches!(outcome, SyncOutcome::Rejected { .. }), "{:?}", outcome);
    assert_eq!(f.erp.status_calls(), 1);
    assert_eq!(f.erp.document_calls(), 1);
    assert_eq!(f.erp.tracking_calls(), 0);
    assert_eq!(
        deliveries::sync_state(&f.pool, delivery.id).await.unwrap(),
        Some(SyncState::SyncFailed)
    );
}

#[tokio::test]
async fn test_attempt_timeout_counts_as_failed_attempt() {
    let policy = RetryPolicy {
        attempt_timeout: Duration::from_millis(50),
        ..fast_retry(2)
    };
    let f = fixture(policy).await;
    let delivery = insert_delivery(&f.pool, 42, SyncState::Pending).await;
    f.erp.set_delay(Duration::from_millis(500));

    let outcome = f.service.sync(delivery.id).await.unwrap();

    match outcome {
        SyncOutcome::Failed { attempts, error } => {
            assert_eq!(attempts, 2);
            assert!(error.contains("timed out"), "{}", error);
        }
        other => panic!("expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_syncs_push_once() {
    let f = fixture(fast_retry(3)).await;
    let delivery = insert_delivery(&f.pool, 42, SyncState::Pending).await;
    f.erp.set_delay(Duration::from_millis(50));

    let calls = (0..5).map(|_| {
        let service = f.service.clone();
        let id = delivery.id;
        tokio::spawn(async move { service.sync(id).await.unwrap() })
    });
    let outcomes: Vec<SyncOutcome> = join_all(calls)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(f.erp.status_calls(), 1);
    let pushed = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Synced { .. }))
        .count();
    assert_eq!(pushed, 1);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(f.service.active_syncs(), 0);
}

#[tokio::test]
async fn test_resync_rearms_failed_delivery() {
    let f = fixture(fast_retry(2)).await;
    let delivery = insert_delivery(&f.pool, 42, SyncState::Pending).await;
    f.erp.fail_always(transient(), 2);

    let first = f.service.sync(delivery.id).await.unwrap();
    assert!(matches!(first, SyncOutcome::Failed { .. }));

    let second = f.service.resync(delivery.id).await.unwrap();
    assert_eq!(second, SyncOutcome::Synced { attempts: 1 });

    let stored = deliveries::load_delivery(&f.pool, delivery.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_state, SyncState::Synced);
    assert_eq!(stored.sync_error, None);
    assert_eq!(stored.sync_attempts, 1);
}

#[tokio::test]
async fn test_sync_publishes_status_update() {
    let f = fixture(fast_retry(3)).await;
    let delivery = insert_delivery(&f.pool, 42, SyncState::Pending).await;
    let mut subscription = f.broadcaster.subscribe(Channel::Delivery(delivery.id));

    f.service.sync(delivery.id).await.unwrap();

    match subscription.try_recv() {
        Some(DeliveryEvent::StatusUpdated {
            delivery_id,
            sync_state,
            ..
        }) => {
            assert_eq!(delivery_id, delivery.id);
            assert_eq!(sync_state, SyncState::Synced);
        }
        other => panic!("expected StatusUpdated, got {:?}", other),
    }
}

#[tokio::test]
async fn test_batch_tolerates_partial_failure() {
    let f = fixture(fast_retry(3)).await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(insert_delivery(&f.pool, 42, SyncState::Pending).await.id);
    }
    let missing = Uuid::new_v4();
    ids.push(missing);

    let result = f.service.sync_batch(&ids, 2).await;

    assert_eq!(result.total, 4);
    assert_eq!(result.successful, 3);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].delivery_id, missing);
}

#[tokio::test]
async fn test_statistics_success_rate() {
    let f = fixture(fast_retry(3)).await;
    for _ in 0..3 {
        insert_delivery(&f.pool, 42, SyncState::Synced).await;
    }
    for _ in 0..2 {
        insert_delivery(&f.pool, 42, SyncState::Pending).await;
    }

    let stats = f.service.statistics(&SyncFilter::default()).await.unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.synced, 3);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.success_rate, 60.0);

    let filter = SyncFilter {
        shipment_id: Some(7),
        ..SyncFilter::default()
    };
    let empty = f.service.statistics(&filter).await.unwrap();
    assert_eq!(empty.total, 0);
    assert_eq!(empty.success_rate, 0.0);
}

#[tokio::test]
async fn test_queued_counts_as_pending() {
    let f = fixture(fast_retry(3)).await;
    insert_delivery(&f.pool, 42, SyncState::Queued).await;
    insert_delivery(&f.pool, 42, SyncState::SyncFailed).await;

    let stats = f.service.statistics(&SyncFilter::default()).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate, 0.0);
}
