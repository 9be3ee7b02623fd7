//! PostgreSQL-backed scheduler: promotes due Timers and Job cron occurrences
//! into the outbox, all inside one transaction per promotion call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use wharf::error::{Result, WharfError};
use wharf::scheduler::{NewJob, NewTimer, SchedulerStore};

use crate::map_sqlx_err;

#[derive(Clone)]
pub struct PgSchedulerStore {
    pool: PgPool,
}

impl PgSchedulerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn next_occurrence(cron_expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = Schedule::from_str(cron_expression)
        .map_err(|e| WharfError::validation("cronSchedule", e.to_string()))?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| WharfError::validation("cronSchedule", "schedule has no future occurrence"))
}

#[async_trait]
impl SchedulerStore for PgSchedulerStore {
    async fn register_job(&self, job: NewJob) -> Result<Uuid> {
        let next_due_time = next_occurrence(&job.cron_schedule, Utc::now())?;

        let row = sqlx::query(
            r#"
            INSERT INTO jobs (name, cron_expression, topic, payload, next_run_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE SET
                cron_expression = $2, topic = $3, payload = $4
            RETURNING name
            "#,
        )
        .bind(&job.job_name)
        .bind(&job.cron_schedule)
        .bind(&job.topic)
        .bind(job.payload.unwrap_or_default())
        .bind(next_due_time)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        let _: String = row.get("name");

        Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, job.job_name.as_bytes()))
    }

    async fn register_timer(&self, timer: NewTimer) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO timers (topic, payload, correlation_id, fire_at_utc)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&timer.topic)
        .bind(&timer.payload)
        .bind(&timer.correlation_id)
        .bind(timer.due_time)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.get("id"))
    }

    async fn promote_due_timers(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let due = sqlx::query(
            "SELECT id, topic, payload, correlation_id FROM timers \
             WHERE status = 0 AND fire_at_utc <= now() \
             FOR UPDATE SKIP LOCKED",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for row in &due {
            let timer_id: Uuid = row.get("id");
            let topic: String = row.get("topic");
            let payload: Vec<u8> = row.get("payload");
            let correlation_id: Option<String> = row.get("correlation_id");

            let outbox_id: Uuid = sqlx::query(
                "INSERT INTO outbox_messages (topic, payload, correlation_id) VALUES ($1, $2, $3) \
                 RETURNING id",
            )
            .bind(&topic)
            .bind(&payload)
            .bind(&correlation_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .get("id");

            sqlx::query("UPDATE timers SET status = 2, outbox_id = $1 WHERE id = $2")
                .bind(outbox_id)
                .bind(timer_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(due.len() as u64)
    }

    async fn promote_due_job_runs(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let due_jobs = sqlx::query(
            "SELECT name, cron_expression, topic, payload FROM jobs \
             WHERE enabled AND next_run_utc <= now() FOR UPDATE SKIP LOCKED",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let mut promoted = 0u64;
        let now = Utc::now();

        for row in &due_jobs {
            let job_name: String = row.get("name");
            let cron_expression: String = row.get("cron_expression");
            let topic: String = row.get("topic");
            let payload: Vec<u8> = row.get("payload");

            let next_due_time = next_occurrence(&cron_expression, now)?;

            let job_run_id: Uuid = sqlx::query(
                "INSERT INTO job_runs (job_name, scheduled_utc, promoted_utc) \
                 VALUES ($1, $2, now()) RETURNING id",
            )
            .bind(&job_name)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .get("id");

            let outbox_id: Uuid = sqlx::query(
                "INSERT INTO outbox_messages (topic, payload, correlation_id) \
                 VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(&topic)
            .bind(&payload)
            .bind(job_run_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .get("id");

            sqlx::query(
                "UPDATE job_runs SET status = 1, outbox_id = $1 WHERE id = $2",
            )
            .bind(outbox_id)
            .bind(job_run_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            sqlx::query(
                "UPDATE jobs SET next_run_utc = $1, last_run_utc = $2 WHERE name = $3",
            )
            .bind(next_due_time)
            .bind(now)
            .bind(&job_name)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            promoted += 1;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_occurrence_advances_past_the_given_instant() {
        let now = DateTime::parse_from_rfc3339("2026-07-27T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_occurrence("0 0 * * * *", now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn invalid_cron_expression_is_a_validation_error() {
        let now = Utc::now();
        assert!(next_occurrence("not a cron expression", now).is_err());
    }
}
