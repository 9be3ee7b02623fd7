//! PostgreSQL-backed idempotency store.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use wharf::error::Result;
use wharf::idempotency::{IdempotencyRecord, IdempotencyStatus, IdempotencyStore};
use wharf::ids::OwnerToken;

use crate::map_sqlx_err;

#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> IdempotencyRecord {
    IdempotencyRecord {
        key: row.get("key"),
        status: IdempotencyStatus::from_code(row.get("status")).unwrap_or(IdempotencyStatus::Failed),
        locked_until: row.get("locked_until"),
        locked_by: row
            .get::<Option<Uuid>, _>("locked_by")
            .map(OwnerToken::from),
        failure_count: row.get("failure_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn try_begin(&self, key: &str, owner: OwnerToken, lock_duration: Duration) -> Result<bool> {
        let locked_until: DateTime<Utc> =
            Utc::now() + ChronoDuration::from_std(lock_duration).unwrap_or_default();

        // A single guarded upsert, not a SELECT-then-INSERT: the row lock a
        // SELECT ... FOR UPDATE takes on an existing row does nothing for a
        // brand-new key (no row exists yet to lock), so two concurrent
        // callers racing to create the same key could both observe
        // "absent" and both return true. The WHERE clause makes the
        // create-or-steal decision part of the same statement the
        // uniqueness constraint enforces, so only one of two concurrent
        // inserts for a new key affects a row.
        let row = sqlx::query(
            r#"
            INSERT INTO idempotency_records (key, status, locked_until, locked_by)
            VALUES ($1, 1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET
                status = 1,
                locked_until = EXCLUDED.locked_until,
                locked_by = EXCLUDED.locked_by,
                updated_at = now()
            WHERE idempotency_records.status = 0
               OR (idempotency_records.status = 1
                   AND (idempotency_records.locked_until <= now()
                        OR idempotency_records.locked_by = EXCLUDED.locked_by))
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(locked_until)
        .bind(owner.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.is_some())
    }

    async fn complete(&self, key: &str, owner: OwnerToken) -> Result<()> {
        sqlx::query(
            "UPDATE idempotency_records SET status = 2, locked_until = NULL, locked_by = NULL, \
             completed_at = now(), updated_at = now() WHERE key = $1 AND locked_by = $2",
        )
        .bind(key)
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn fail(&self, key: &str, owner: OwnerToken) -> Result<()> {
        sqlx::query(
            "UPDATE idempotency_records SET status = 0, locked_until = NULL, locked_by = NULL, \
             failure_count = failure_count + 1, updated_at = now() WHERE key = $1 AND locked_by = $2",
        )
        .bind(key)
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT key, status, locked_until, locked_by, failure_count, created_at, updated_at, \
             completed_at FROM idempotency_records WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.as_ref().map(row_to_record))
    }
}
