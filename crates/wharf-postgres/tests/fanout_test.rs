mod common;

use chrono::Utc;
use uuid::Uuid;
use wharf::fanout::{plan_due_slices, FanoutStore};
use wharf_postgres::PgFanoutStore;

fn unique_topic() -> String {
    format!("tenant-sync.{}", Uuid::new_v4())
}

async fn insert_policy(pool: &sqlx::PgPool, topic: &str, work_key: &str, every_seconds: i64) {
    sqlx::query(
        "INSERT INTO fanout_policies (fanout_topic, work_key, every_seconds, jitter_seconds) \
         VALUES ($1, $2, $3, 0)",
    )
    .bind(topic)
    .bind(work_key)
    .bind(every_seconds)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn get_policy_returns_none_when_unconfigured() {
    let pool = common::test_pool().await;
    let store = PgFanoutStore::new(pool);
    let policy = store.get_policy(&unique_topic(), "default").await.unwrap();
    assert!(policy.is_none());
}

#[tokio::test]
async fn cursors_default_to_none_until_marked_completed() {
    let pool = common::test_pool().await;
    let topic = unique_topic();
    insert_policy(&pool, &topic, "default", 3600).await;
    let store = PgFanoutStore::new(pool);

    let shard_keys = vec!["tenant-a".to_string(), "tenant-b".to_string()];
    let cursors = store.get_cursors(&topic, "default", &shard_keys).await.unwrap();
    assert_eq!(cursors.get("tenant-a").copied().flatten(), None);
    assert_eq!(cursors.get("tenant-b").copied().flatten(), None);

    let now = Utc::now();
    store.mark_completed(&topic, "default", "tenant-a", now).await.unwrap();

    let cursors = store.get_cursors(&topic, "default", &shard_keys).await.unwrap();
    assert_eq!(cursors.get("tenant-a").copied().flatten(), Some(now));
    assert_eq!(cursors.get("tenant-b").copied().flatten(), None);
}

#[tokio::test]
async fn mark_completed_makes_a_shard_not_due_until_every_seconds_elapses() {
    let pool = common::test_pool().await;
    let topic = unique_topic();
    insert_policy(&pool, &topic, "default", 3600).await;
    let store = PgFanoutStore::new(pool);

    let shard_keys = vec!["tenant-a".to_string()];
    let now = Utc::now();
    store.mark_completed(&topic, "default", "tenant-a", now).await.unwrap();

    let policy = store.get_policy(&topic, "default").await.unwrap().expect("policy exists");
    let cursors = store.get_cursors(&topic, "default", &shard_keys).await.unwrap();
    let slices = plan_due_slices(&topic, "default", policy, &shard_keys, &cursors, now);
    assert!(slices.is_empty());
}
