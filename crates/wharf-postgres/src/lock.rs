//! PostgreSQL-backed fenced distributed lock.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;

use wharf::error::Result;
use wharf::ids::{FencingToken, OwnerToken};
use wharf::lock::{validate_lock_name, AcquireOutcome, DistributedLock, LockStore};

use crate::map_sqlx_err;

#[derive(Clone)]
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn acquire(
        &self,
        resource_name: &str,
        owner_token: OwnerToken,
        lease: Duration,
        context_json: Option<&str>,
    ) -> Result<AcquireOutcome> {
        validate_lock_name(resource_name)?;
        let lease_until: DateTime<Utc> = Utc::now() + ChronoDuration::from_std(lease).unwrap_or_default();

        let row = sqlx::query(
            r#"
            INSERT INTO distributed_locks (resource_name, owner_token, lease_until, fencing_token, context_json)
            VALUES ($1, $2, $3, 0, $4::jsonb)
            ON CONFLICT (resource_name) DO UPDATE SET
                owner_token = $2,
                lease_until = $3,
                fencing_token = distributed_locks.fencing_token + 1,
                context_json = COALESCE($4::jsonb, distributed_locks.context_json)
            WHERE distributed_locks.owner_token IS NULL
               OR distributed_locks.lease_until <= now()
            RETURNING fencing_token
            "#,
        )
        .bind(resource_name)
        .bind(owner_token.as_uuid())
        .bind(lease_until)
        .bind(context_json)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match row {
            Some(row) => Ok(AcquireOutcome::Acquired {
                owner_token,
                fencing_token: FencingToken(row.get("fencing_token")),
            }),
            None => Ok(AcquireOutcome::NotAcquired),
        }
    }

    async fn renew(
        &self,
        resource_name: &str,
        owner_token: OwnerToken,
        lease: Duration,
    ) -> Result<AcquireOutcome> {
        let lease_until: DateTime<Utc> = Utc::now() + ChronoDuration::from_std(lease).unwrap_or_default();

        let row = sqlx::query(
            r#"
            UPDATE distributed_locks
            SET lease_until = $1, fencing_token = fencing_token + 1
            WHERE resource_name = $2 AND owner_token = $3 AND lease_until > now()
            RETURNING fencing_token
            "#,
        )
        .bind(lease_until)
        .bind(resource_name)
        .bind(owner_token.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match row {
            Some(row) => Ok(AcquireOutcome::Acquired {
                owner_token,
                fencing_token: FencingToken(row.get("fencing_token")),
            }),
            None => Ok(AcquireOutcome::NotAcquired),
        }
    }

    async fn release(&self, resource_name: &str, owner_token: OwnerToken) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE distributed_locks SET owner_token = NULL, lease_until = NULL \
             WHERE resource_name = $1 AND owner_token = $2",
        )
        .bind(resource_name)
        .bind(owner_token.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE distributed_locks SET owner_token = NULL, lease_until = NULL \
             WHERE owner_token IS NOT NULL AND lease_until <= now()",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn get(&self, resource_name: &str) -> Result<Option<DistributedLock>> {
        let row = sqlx::query(
            "SELECT resource_name, owner_token, lease_until, fencing_token, context_json::text \
             FROM distributed_locks WHERE resource_name = $1",
        )
        .bind(resource_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(|row| DistributedLock {
            resource_name: row.get("resource_name"),
            owner_token: row
                .get::<Option<uuid::Uuid>, _>("owner_token")
                .map(OwnerToken::from),
            lease_until: row.get("lease_until"),
            fencing_token: FencingToken(row.get("fencing_token")),
            context_json: row.get("context_json"),
        }))
    }
}
