//! PostgreSQL-backed transactional outbox.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

use wharf::error::Result;
use wharf::ids::OwnerToken;
use wharf::outbox::{NewOutboxMessage, OutboxMessage, OutboxStatus, OutboxStore, OutboxWriter};

use crate::map_sqlx_err;

#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &sqlx::postgres::PgRow) -> OutboxMessage {
    OutboxMessage {
        id: row.get("id"),
        topic: row.get("topic"),
        payload: row.get("payload"),
        created_at: row.get("created_at"),
        status: OutboxStatus::from_code(row.get("status")).unwrap_or(OutboxStatus::Ready),
        locked_until: row.get("locked_until"),
        owner_token: row
            .get::<Option<Uuid>, _>("owner_token")
            .map(OwnerToken::from),
        due_time_utc: row.get("due_time_utc"),
        retry_count: row.get("retry_count"),
        last_error: row.get("last_error"),
        correlation_id: row.get("correlation_id"),
        message_id: row.get("message_id"),
    }
}

#[async_trait]
impl OutboxWriter for PgOutboxStore {
    type Transaction<'c> = Transaction<'c, Postgres>;

    async fn enqueue<'c>(
        &self,
        tx: &mut Self::Transaction<'c>,
        message: NewOutboxMessage,
    ) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO outbox_messages (topic, payload, correlation_id, due_time_utc, message_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&message.topic)
        .bind(&message.payload)
        .bind(&message.correlation_id)
        .bind(message.due_time_utc)
        .bind(&message.message_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.get("id"))
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn claim_due(
        &self,
        owner: OwnerToken,
        lease: Duration,
        batch_size: i64,
    ) -> Result<Vec<OutboxMessage>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let locked_until = Utc::now() + ChronoDuration::from_std(lease).unwrap_or_default();

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM outbox_messages
                WHERE status = 0
                  AND (locked_until IS NULL OR locked_until <= now())
                  AND (due_time_utc IS NULL OR due_time_utc <= now())
                ORDER BY created_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_messages
            SET status = 1,
                owner_token = $2,
                locked_until = $3
            WHERE id IN (SELECT id FROM claimable)
            RETURNING id, topic, payload, created_at, status, locked_until, owner_token,
                      due_time_utc, retry_count, last_error, correlation_id, message_id
            "#,
        )
        .bind(batch_size)
        .bind(owner.as_uuid())
        .bind(locked_until)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().map(row_to_message).collect())
    }

    async fn mark_dispatched(&self, id: Uuid, owner: OwnerToken) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 2, owner_token = NULL, locked_until = NULL, processed_at = now()
            WHERE id = $1 AND status = 1 AND owner_token = $2
            "#,
        )
        .bind(id)
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn reschedule(
        &self,
        id: Uuid,
        owner: OwnerToken,
        delay: Duration,
        last_error: &str,
    ) -> Result<bool> {
        let due_time_utc = Utc::now() + ChronoDuration::from_std(delay).unwrap_or_default();

        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 0,
                owner_token = NULL,
                locked_until = NULL,
                due_time_utc = $1,
                retry_count = retry_count + 1,
                last_error = $2
            WHERE id = $3 AND status = 1 AND owner_token = $4
            "#,
        )
        .bind(due_time_utc)
        .bind(last_error)
        .bind(id)
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail(&self, id: Uuid, owner: OwnerToken, last_error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 3, owner_token = NULL, locked_until = NULL, last_error = $1
            WHERE id = $2 AND status = 1 AND owner_token = $3
            "#,
        )
        .bind(last_error)
        .bind(id)
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn reap(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 0, owner_token = NULL, locked_until = NULL
            WHERE status = 1 AND locked_until <= now()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn cleanup(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::from_std(retention).unwrap_or_default();

        let result = sqlx::query("DELETE FROM outbox_messages WHERE status = 2 AND created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }
}

