mod common;

use uuid::Uuid;
use wharf::ids::OwnerToken;
use wharf::inbox::{InboxStore, RecordOutcome, RecordRequest};
use wharf_postgres::PgInboxStore;

fn unique_source() -> String {
    format!("webhooks.stripe.{}", Uuid::new_v4())
}

#[tokio::test]
async fn record_twice_reports_duplicate_with_attempts_one() {
    let pool = common::test_pool().await;
    let store = PgInboxStore::new(pool);
    let source = unique_source();
    let message_id = "evt_1";

    let first = store
        .record(&source, message_id, RecordRequest::default())
        .await
        .unwrap();
    assert!(first.is_new());
    assert_eq!(first.record().attempts, 0);

    let second = store
        .record(&source, message_id, RecordRequest::default())
        .await
        .unwrap();
    assert!(matches!(second, RecordOutcome::Duplicate(_)));
    assert_eq!(second.record().attempts, 1);
}

#[tokio::test]
async fn claim_then_ack_marks_done_and_already_processed() {
    let pool = common::test_pool().await;
    let store = PgInboxStore::new(pool);
    let source = unique_source();
    let message_id = "evt_2";

    store
        .record(&source, message_id, RecordRequest::default())
        .await
        .unwrap();

    let owner = OwnerToken::new();
    let claimed = store
        .claim(owner, std::time::Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert!(claimed.iter().any(|r| r.message_id == message_id));

    assert!(!store.already_processed(&source, message_id).await.unwrap());

    let acked = store
        .ack(owner, &[message_id.to_string()])
        .await
        .unwrap();
    assert_eq!(acked, 1);

    assert!(store.already_processed(&source, message_id).await.unwrap());
}

#[tokio::test]
async fn abandon_returns_record_to_seen_for_reclaim() {
    let pool = common::test_pool().await;
    let store = PgInboxStore::new(pool);
    let source = unique_source();
    let message_id = "evt_3";

    store
        .record(&source, message_id, RecordRequest::default())
        .await
        .unwrap();

    let owner = OwnerToken::new();
    store
        .claim(owner, std::time::Duration::from_secs(30), 10)
        .await
        .unwrap();

    let abandoned = store
        .abandon(owner, &[message_id.to_string()], None)
        .await
        .unwrap();
    assert_eq!(abandoned, 1);

    let reclaimed = store
        .claim(OwnerToken::new(), std::time::Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert!(reclaimed.iter().any(|r| r.message_id == message_id));
}

#[tokio::test]
async fn mark_dead_removes_record_from_claimable_set() {
    let pool = common::test_pool().await;
    let store = PgInboxStore::new(pool);
    let source = unique_source();
    let message_id = "evt_4";

    store
        .record(&source, message_id, RecordRequest::default())
        .await
        .unwrap();

    let owner = OwnerToken::new();
    store
        .claim(owner, std::time::Duration::from_secs(30), 10)
        .await
        .unwrap();

    let dead = store
        .mark_dead(owner, &[message_id.to_string()], "poison pill")
        .await
        .unwrap();
    assert_eq!(dead, 1);

    let reclaimed = store
        .claim(OwnerToken::new(), std::time::Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert!(!reclaimed.iter().any(|r| r.message_id == message_id));
}
