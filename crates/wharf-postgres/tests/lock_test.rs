mod common;

use std::time::Duration;
use uuid::Uuid;
use wharf::ids::OwnerToken;
use wharf::lock::{AcquireOutcome, LockStore};
use wharf_postgres::PgLockStore;

fn unique_resource() -> String {
    format!("jobs:export:{}", Uuid::new_v4())
}

#[tokio::test]
async fn acquire_is_exclusive_until_released() {
    let pool = common::test_pool().await;
    let store = PgLockStore::new(pool);
    let resource = unique_resource();
    let owner_a = OwnerToken::new();
    let owner_b = OwnerToken::new();

    let first = store
        .acquire(&resource, owner_a, Duration::from_secs(30), None)
        .await
        .unwrap();
    assert!(matches!(first, AcquireOutcome::Acquired { .. }));

    let second = store
        .acquire(&resource, owner_b, Duration::from_secs(30), None)
        .await
        .unwrap();
    assert_eq!(second, AcquireOutcome::NotAcquired);

    let released = store.release(&resource, owner_a).await.unwrap();
    assert!(released);

    let third = store
        .acquire(&resource, owner_b, Duration::from_secs(30), None)
        .await
        .unwrap();
    assert!(matches!(third, AcquireOutcome::Acquired { .. }));
}

#[tokio::test]
async fn fencing_token_strictly_increases_across_reacquires() {
    let pool = common::test_pool().await;
    let store = PgLockStore::new(pool);
    let resource = unique_resource();
    let owner = OwnerToken::new();

    let AcquireOutcome::Acquired { fencing_token: first, .. } = store
        .acquire(&resource, owner, Duration::from_millis(1), None)
        .await
        .unwrap()
    else {
        panic!("expected acquisition");
    };

    tokio::time::sleep(Duration::from_millis(20)).await;

    let AcquireOutcome::Acquired { fencing_token: second, .. } = store
        .acquire(&resource, OwnerToken::new(), Duration::from_secs(30), None)
        .await
        .unwrap()
    else {
        panic!("expected acquisition after expiry");
    };

    assert!(second > first);
}
