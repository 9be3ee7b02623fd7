//! PostgreSQL-backed named lease, used by the scheduler and fanout
//! coordinator to elect a singleton owner.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;

use wharf::error::Result;
use wharf::lease::{LeaseGrant, LeaseStore, NamedLease};

use crate::map_sqlx_err;

#[derive(Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn acquire(&self, name: &str, owner: &str, lease: Duration) -> Result<LeaseGrant> {
        let now = Utc::now();
        let lease_until: DateTime<Utc> = now + ChronoDuration::from_std(lease).unwrap_or_default();

        let row = sqlx::query(
            r#"
            INSERT INTO leases (name, owner, lease_until_utc, last_granted_utc, version)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (name) DO UPDATE SET
                owner = $2,
                lease_until_utc = $3,
                last_granted_utc = $4,
                version = leases.version + 1
            WHERE leases.owner IS NULL OR leases.lease_until_utc <= $4
            RETURNING lease_until_utc
            "#,
        )
        .bind(name)
        .bind(owner)
        .bind(lease_until)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(LeaseGrant {
            acquired: row.is_some(),
            server_now: now,
            lease_until: row.map(|r| r.get("lease_until_utc")),
        })
    }

    async fn renew(&self, name: &str, owner: &str, lease: Duration) -> Result<LeaseGrant> {
        let now = Utc::now();
        let lease_until: DateTime<Utc> = now + ChronoDuration::from_std(lease).unwrap_or_default();

        let row = sqlx::query(
            r#"
            UPDATE leases
            SET lease_until_utc = $1, last_granted_utc = $2, version = version + 1
            WHERE name = $3 AND owner = $4 AND lease_until_utc > $2
            RETURNING lease_until_utc
            "#,
        )
        .bind(lease_until)
        .bind(now)
        .bind(name)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(LeaseGrant {
            acquired: row.is_some(),
            server_now: now,
            lease_until: row.map(|r| r.get("lease_until_utc")),
        })
    }

    async fn get(&self, name: &str) -> Result<Option<NamedLease>> {
        let row = sqlx::query(
            "SELECT name, owner, lease_until_utc, last_granted_utc, version FROM leases WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(|row| NamedLease {
            name: row.get("name"),
            owner: row.get("owner"),
            lease_until_utc: row.get("lease_until_utc"),
            last_granted_utc: row.get("last_granted_utc"),
            version: row.get("version"),
        }))
    }
}
