//! PostgreSQL-backed fanout policy and cursor storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use wharf::error::Result;
use wharf::fanout::{FanoutPolicy, FanoutStore};

use crate::map_sqlx_err;

#[derive(Clone)]
pub struct PgFanoutStore {
    pool: PgPool,
}

impl PgFanoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FanoutStore for PgFanoutStore {
    async fn get_policy(&self, fanout_topic: &str, work_key: &str) -> Result<Option<FanoutPolicy>> {
        let row = sqlx::query(
            "SELECT every_seconds, jitter_seconds FROM fanout_policies \
             WHERE fanout_topic = $1 AND work_key = $2",
        )
        .bind(fanout_topic)
        .bind(work_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(|row| FanoutPolicy {
            every_seconds: row.get("every_seconds"),
            jitter_seconds: row.get("jitter_seconds"),
        }))
    }

    async fn get_cursors(
        &self,
        fanout_topic: &str,
        work_key: &str,
        shard_keys: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>> {
        let rows = sqlx::query(
            "SELECT shard_key, last_run_utc FROM fanout_cursors \
             WHERE fanout_topic = $1 AND work_key = $2 AND shard_key = ANY($3)",
        )
        .bind(fanout_topic)
        .bind(work_key)
        .bind(shard_keys)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut cursors: HashMap<String, Option<DateTime<Utc>>> = shard_keys
            .iter()
            .map(|shard_key| (shard_key.clone(), None))
            .collect();
        for row in rows {
            let shard_key: String = row.get("shard_key");
            cursors.insert(shard_key, row.get("last_run_utc"));
        }
        Ok(cursors)
    }

    async fn mark_completed(
        &self,
        fanout_topic: &str,
        work_key: &str,
        shard_key: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fanout_cursors (fanout_topic, work_key, shard_key, last_run_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (fanout_topic, shard_key, work_key) DO UPDATE SET last_run_utc = $4
            "#,
        )
        .bind(fanout_topic)
        .bind(work_key)
        .bind(shard_key)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }
}
