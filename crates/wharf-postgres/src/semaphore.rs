//! PostgreSQL-backed counted semaphore.
//!
//! `acquire` takes an explicit `SELECT ... FOR UPDATE` on the `semaphores`
//! row before touching `semaphore_leases`, the same defensive row lock
//! `PgJobStore::mark_failed` takes on `jobs` before branching on
//! `attempt`/`max_retries` — here it additionally serializes the
//! fencing-counter bump against concurrent acquirers.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use wharf::error::{validate_resource_name, Result, WharfError};
use wharf::ids::FencingToken;
use wharf::semaphore::{
    validate_acquire_params, validate_limit, Semaphore, SemaphoreAcquireOutcome,
    SemaphoreRenewOutcome, SemaphoreStore,
};

use crate::map_sqlx_err;

/// Bounds enforced on every `acquire`/`ensure` call (spec §4.6: "ttl within
/// configured bounds; limit within configured max"). Not yet exposed
/// through `PgBackendConfig`.
const TTL_BOUNDS: (Duration, Duration) = (Duration::from_secs(1), Duration::from_secs(24 * 3600));
const MAX_LIMIT: i64 = 10_000;

#[derive(Clone)]
pub struct PgSemaphoreStore {
    pool: PgPool,
}

impl PgSemaphoreStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SemaphoreStore for PgSemaphoreStore {
    async fn ensure(&self, name: &str, limit: i64) -> Result<()> {
        validate_resource_name("name", name)?;
        validate_limit(limit, MAX_LIMIT)?;
        sqlx::query(
            r#"
            INSERT INTO semaphores (name, "limit")
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn acquire(
        &self,
        name: &str,
        owner_id: &str,
        ttl: Duration,
        client_request_id: Option<&str>,
    ) -> Result<SemaphoreAcquireOutcome> {
        validate_acquire_params(name, owner_id, ttl, TTL_BOUNDS)?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let semaphore_row = sqlx::query(
            r#"SELECT "limit", next_fencing_counter FROM semaphores WHERE name = $1 FOR UPDATE"#,
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let Some(semaphore_row) = semaphore_row else {
            return Err(WharfError::unavailable(format!("semaphore {name} is not provisioned")));
        };
        let limit: i64 = semaphore_row.get("limit");
        let next_fencing_counter: i64 = semaphore_row.get("next_fencing_counter");

        if let Some(client_request_id) = client_request_id {
            let existing = sqlx::query(
                "SELECT token, fencing, lease_until_utc FROM semaphore_leases \
                 WHERE name = $1 AND client_request_id = $2 AND lease_until_utc > $3",
            )
            .bind(name)
            .bind(client_request_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            if let Some(existing) = existing {
                tx.commit().await.map_err(map_sqlx_err)?;
                return Ok(SemaphoreAcquireOutcome::Acquired {
                    token: existing.get("token"),
                    fencing: FencingToken(existing.get("fencing")),
                    lease_until_utc: existing.get("lease_until_utc"),
                });
            }
        }

        sqlx::query(
            "DELETE FROM semaphore_leases WHERE ctid IN ( \
               SELECT ctid FROM semaphore_leases \
               WHERE name = $1 AND lease_until_utc <= $2 LIMIT 10)",
        )
        .bind(name)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let held_count: i64 = sqlx::query(
            "SELECT count(*) AS held FROM semaphore_leases WHERE name = $1 AND lease_until_utc > $2",
        )
        .bind(name)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .get("held");

        if held_count >= limit {
            tx.commit().await.map_err(map_sqlx_err)?;
            return Ok(SemaphoreAcquireOutcome::NotAcquired);
        }

        let token = Uuid::new_v4();
        let fencing = FencingToken(next_fencing_counter);
        let lease_until_utc: DateTime<Utc> = now + ChronoDuration::from_std(ttl).unwrap_or_default();

        sqlx::query(r#"UPDATE semaphores SET next_fencing_counter = $1 WHERE name = $2"#)
            .bind(next_fencing_counter + 1)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        sqlx::query(
            "INSERT INTO semaphore_leases \
             (name, token, fencing, owner_id, lease_until_utc, client_request_id) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(name)
        .bind(token)
        .bind(fencing.0)
        .bind(owner_id)
        .bind(lease_until_utc)
        .bind(client_request_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(SemaphoreAcquireOutcome::Acquired {
            token,
            fencing,
            lease_until_utc,
        })
    }

    async fn renew(&self, name: &str, token: Uuid, ttl: Duration) -> Result<SemaphoreRenewOutcome> {
        let now = Utc::now();
        let candidate: DateTime<Utc> = now + ChronoDuration::from_std(ttl).unwrap_or_default();

        let row = sqlx::query(
            r#"
            UPDATE semaphore_leases
            SET lease_until_utc = GREATEST(lease_until_utc, $1), renewed_utc = $2
            WHERE name = $3 AND token = $4 AND lease_until_utc > $2
            RETURNING lease_until_utc
            "#,
        )
        .bind(candidate)
        .bind(now)
        .bind(name)
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match row {
            Some(row) => Ok(SemaphoreRenewOutcome::Renewed {
                lease_until_utc: row.get("lease_until_utc"),
            }),
            None => Ok(SemaphoreRenewOutcome::Lost),
        }
    }

    async fn release(&self, name: &str, token: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM semaphore_leases WHERE name = $1 AND token = $2")
            .bind(name)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn reap(&self, name: Option<&str>, max_rows: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM semaphore_leases WHERE ctid IN ( \
               SELECT ctid FROM semaphore_leases \
               WHERE ($1::text IS NULL OR name = $1) AND lease_until_utc <= now() \
               LIMIT $2)",
        )
        .bind(name)
        .bind(max_rows)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn get(&self, name: &str) -> Result<Option<Semaphore>> {
        let row = sqlx::query(r#"SELECT "limit", next_fencing_counter FROM semaphores WHERE name = $1"#)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(row.map(|row| Semaphore {
            limit: row.get("limit"),
            next_fencing_counter: FencingToken(row.get("next_fencing_counter")),
        }))
    }
}
