mod common;

use std::time::Duration;
use uuid::Uuid;
use wharf::semaphore::{SemaphoreAcquireOutcome, SemaphoreRenewOutcome, SemaphoreStore};
use wharf_postgres::PgSemaphoreStore;

fn unique_name() -> String {
    format!("db-connections:{}", Uuid::new_v4())
}

#[tokio::test]
async fn acquire_admits_up_to_limit_then_refuses() {
    let pool = common::test_pool().await;
    let store = PgSemaphoreStore::new(pool);
    let name = unique_name();
    store.ensure(&name, 2).await.unwrap();

    let first = store
        .acquire(&name, "worker-a", Duration::from_secs(30), None)
        .await
        .unwrap();
    assert!(matches!(first, SemaphoreAcquireOutcome::Acquired { .. }));

    let second = store
        .acquire(&name, "worker-b", Duration::from_secs(30), None)
        .await
        .unwrap();
    assert!(matches!(second, SemaphoreAcquireOutcome::Acquired { .. }));

    let third = store
        .acquire(&name, "worker-c", Duration::from_secs(30), None)
        .await
        .unwrap();
    assert_eq!(third, SemaphoreAcquireOutcome::NotAcquired);
}

#[tokio::test]
async fn acquire_with_same_client_request_id_is_idempotent() {
    let pool = common::test_pool().await;
    let store = PgSemaphoreStore::new(pool);
    let name = unique_name();
    store.ensure(&name, 1).await.unwrap();

    let first = store
        .acquire(&name, "worker-a", Duration::from_secs(30), Some("req-1"))
        .await
        .unwrap();
    let SemaphoreAcquireOutcome::Acquired { token: first_token, .. } = first else {
        panic!("expected acquisition");
    };

    let second = store
        .acquire(&name, "worker-a", Duration::from_secs(30), Some("req-1"))
        .await
        .unwrap();
    let SemaphoreAcquireOutcome::Acquired { token: second_token, .. } = second else {
        panic!("expected the same acquisition to be returned");
    };

    assert_eq!(first_token, second_token);
}

#[tokio::test]
async fn release_frees_a_slot_for_the_next_acquirer() {
    let pool = common::test_pool().await;
    let store = PgSemaphoreStore::new(pool);
    let name = unique_name();
    store.ensure(&name, 1).await.unwrap();

    let first = store
        .acquire(&name, "worker-a", Duration::from_secs(30), None)
        .await
        .unwrap();
    let SemaphoreAcquireOutcome::Acquired { token, .. } = first else {
        panic!("expected acquisition");
    };

    let refused = store
        .acquire(&name, "worker-b", Duration::from_secs(30), None)
        .await
        .unwrap();
    assert_eq!(refused, SemaphoreAcquireOutcome::NotAcquired);

    let released = store.release(&name, token).await.unwrap();
    assert!(released);

    let after_release = store
        .acquire(&name, "worker-b", Duration::from_secs(30), None)
        .await
        .unwrap();
    assert!(matches!(after_release, SemaphoreAcquireOutcome::Acquired { .. }));
}

#[tokio::test]
async fn fencing_counter_strictly_increases_across_acquires() {
    let pool = common::test_pool().await;
    let store = PgSemaphoreStore::new(pool);
    let name = unique_name();
    store.ensure(&name, 5).await.unwrap();

    let SemaphoreAcquireOutcome::Acquired { fencing: first, .. } = store
        .acquire(&name, "worker-a", Duration::from_secs(30), None)
        .await
        .unwrap()
    else {
        panic!("expected acquisition");
    };
    let SemaphoreAcquireOutcome::Acquired { fencing: second, .. } = store
        .acquire(&name, "worker-b", Duration::from_secs(30), None)
        .await
        .unwrap()
    else {
        panic!("expected acquisition");
    };

    assert!(second > first);
}

#[tokio::test]
async fn renew_extends_lease_but_lost_after_expiry() {
    let pool = common::test_pool().await;
    let store = PgSemaphoreStore::new(pool);
    let name = unique_name();
    store.ensure(&name, 1).await.unwrap();

    let SemaphoreAcquireOutcome::Acquired { token, .. } = store
        .acquire(&name, "worker-a", Duration::from_millis(1), None)
        .await
        .unwrap()
    else {
        panic!("expected acquisition");
    };

    tokio::time::sleep(Duration::from_millis(20)).await;

    let lost = store.renew(&name, token, Duration::from_secs(30)).await.unwrap();
    assert_eq!(lost, SemaphoreRenewOutcome::Lost);
}
