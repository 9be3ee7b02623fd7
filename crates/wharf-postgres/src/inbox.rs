//! PostgreSQL-backed inbox deduplication and claim queue.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use wharf::error::Result;
use wharf::ids::OwnerToken;
use wharf::inbox::{InboxRecord, InboxStatus, InboxStore, RecordOutcome, RecordRequest};

use crate::map_sqlx_err;

#[derive(Clone)]
pub struct PgInboxStore {
    pool: PgPool,
}

impl PgInboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_from_db(status: &str) -> InboxStatus {
    match status {
        "processing" => InboxStatus::Processing,
        "done" => InboxStatus::Done,
        "dead" => InboxStatus::Dead,
        _ => InboxStatus::Seen,
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> InboxRecord {
    InboxRecord {
        message_id: row.get("message_id"),
        source: row.get("source"),
        hash: row.get("hash"),
        first_seen_utc: row.get("first_seen_utc"),
        last_seen_utc: row.get("last_seen_utc"),
        processed_utc: row.get("processed_utc"),
        due_time_utc: row.get("due_time_utc"),
        attempts: row.get("attempts"),
        status: status_from_db(row.get::<String, _>("status").as_str()),
        locked_until: row.get("locked_until"),
        owner_token: row
            .get::<Option<Uuid>, _>("owner_token")
            .map(OwnerToken::from),
        topic: row.get("topic"),
        payload: row.get("payload"),
    }
}

#[async_trait]
impl InboxStore for PgInboxStore {
    async fn record(
        &self,
        source: &str,
        message_id: &str,
        request: RecordRequest,
    ) -> Result<RecordOutcome> {
        let row = sqlx::query(
            "INSERT INTO inbox_records (source, message_id, hash, due_time_utc, topic, payload) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (source, message_id) DO UPDATE SET \
                 last_seen_utc = now(), attempts = inbox_records.attempts + 1 \
             RETURNING source, message_id, hash, first_seen_utc, last_seen_utc, processed_utc, \
             due_time_utc, attempts, status::text, locked_until, owner_token, topic, payload, \
             (xmax = 0) AS inserted",
        )
        .bind(source)
        .bind(message_id)
        .bind(&request.hash)
        .bind(request.due_time_utc)
        .bind(&request.topic)
        .bind(&request.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let record = row_to_record(&row);
        if row.get::<bool, _>("inserted") {
            Ok(RecordOutcome::New(record))
        } else {
            Ok(RecordOutcome::Duplicate(record))
        }
    }

    async fn claim(
        &self,
        owner: OwnerToken,
        lease: Duration,
        batch_size: i64,
    ) -> Result<Vec<InboxRecord>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let locked_until = Utc::now() + ChronoDuration::from_std(lease).unwrap_or_default();

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT source, message_id
                FROM inbox_records
                WHERE status IN ('seen', 'processing')
                  AND (locked_until IS NULL OR locked_until <= now())
                  AND (due_time_utc IS NULL OR due_time_utc <= now())
                ORDER BY last_seen_utc
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE inbox_records
            SET status = 'processing', owner_token = $2, locked_until = $3
            WHERE (source, message_id) IN (SELECT source, message_id FROM claimable)
            RETURNING source, message_id, hash, first_seen_utc, last_seen_utc, processed_utc,
                      due_time_utc, attempts, status::text, locked_until, owner_token, topic, payload
            "#,
        )
        .bind(batch_size)
        .bind(owner.as_uuid())
        .bind(locked_until)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn ack(&self, owner: OwnerToken, message_ids: &[String]) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE inbox_records SET status = 'done', processed_utc = now(), owner_token = NULL, \
             locked_until = NULL WHERE message_id = ANY($1) AND owner_token = $2",
        )
        .bind(message_ids)
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn abandon(
        &self,
        owner: OwnerToken,
        message_ids: &[String],
        delay: Option<Duration>,
    ) -> Result<u64> {
        let due_time_utc = delay.map(|d| Utc::now() + ChronoDuration::from_std(d).unwrap_or_default());

        let result = sqlx::query(
            "UPDATE inbox_records SET status = 'seen', owner_token = NULL, locked_until = NULL, \
             due_time_utc = COALESCE($1, due_time_utc) \
             WHERE message_id = ANY($2) AND owner_token = $3",
        )
        .bind(due_time_utc)
        .bind(message_ids)
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn mark_dead(
        &self,
        owner: OwnerToken,
        message_ids: &[String],
        reason: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE inbox_records SET status = 'dead', owner_token = NULL, locked_until = NULL, \
             hash = COALESCE(hash, $1) WHERE message_id = ANY($2) AND owner_token = $3",
        )
        .bind(reason)
        .bind(message_ids)
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn reap(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE inbox_records SET status = 'seen', owner_token = NULL, locked_until = NULL \
             WHERE status = 'processing' AND locked_until <= now()",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn cleanup(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::from_std(retention).unwrap_or_default();

        let result = sqlx::query("DELETE FROM inbox_records WHERE status = 'done' AND processed_utc < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn already_processed(&self, source: &str, message_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM inbox_records WHERE source = $1 AND message_id = $2 AND status = 'done'",
        )
        .bind(source)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.is_some())
    }
}
