mod common;

use chrono::Utc;
use uuid::Uuid;
use wharf::scheduler::{NewJob, NewTimer, SchedulerStore};
use wharf_postgres::PgSchedulerStore;

fn unique_job_name() -> String {
    format!("nightly-digest-{}", Uuid::new_v4())
}

#[tokio::test]
async fn promote_due_timers_emits_an_outbox_message_once() {
    let pool = common::test_pool().await;
    let store = PgSchedulerStore::new(pool.clone());

    store
        .register_timer(NewTimer {
            due_time: Utc::now(),
            topic: "reminders.due".to_string(),
            payload: b"{}".to_vec(),
            correlation_id: None,
        })
        .await
        .unwrap();

    let promoted = store.promote_due_timers().await.unwrap();
    assert_eq!(promoted, 1);

    let again = store.promote_due_timers().await.unwrap();
    assert_eq!(again, 0);

    let outbox_count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM outbox_messages WHERE topic = 'reminders.due'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(outbox_count, 1);
}

#[tokio::test]
async fn promote_due_job_runs_advances_next_run_time() {
    let pool = common::test_pool().await;
    let store = PgSchedulerStore::new(pool.clone());
    let job_name = unique_job_name();

    store
        .register_job(NewJob {
            job_name: job_name.clone(),
            cron_schedule: "* * * * * *".to_string(),
            topic: "digests.nightly".to_string(),
            payload: Some(b"{}".to_vec()),
        })
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let promoted = store.promote_due_job_runs().await.unwrap();
    assert_eq!(promoted, 1);

    let next_run_utc: Option<chrono::DateTime<Utc>> =
        sqlx::query_scalar("SELECT next_run_utc FROM jobs WHERE name = $1")
            .bind(&job_name)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(next_run_utc.is_some());

    let run_count: i64 = sqlx::query_scalar("SELECT count(*) FROM job_runs WHERE job_name = $1")
        .bind(&job_name)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(run_count, 1);
}
