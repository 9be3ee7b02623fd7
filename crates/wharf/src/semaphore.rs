//! Counted semaphore (spec §4.6): admits up to `limit` concurrent holders
//! per `name`, each admission carrying its own monotonic fencing token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{validate_resource_name, Result, WharfError};
use crate::ids::FencingToken;

#[derive(Debug, Clone, Copy)]
pub struct Semaphore {
    pub limit: i64,
    pub next_fencing_counter: FencingToken,
}

#[derive(Debug, Clone)]
pub struct SemaphoreLease {
    pub name: String,
    pub token: Uuid,
    pub fencing: FencingToken,
    pub owner_id: String,
    pub lease_until_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub renewed_utc: Option<DateTime<Utc>>,
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreAcquireOutcome {
    Acquired {
        token: Uuid,
        fencing: FencingToken,
        lease_until_utc: DateTime<Utc>,
    },
    /// Resource is at capacity or held. Per spec §7 this is a result, not an
    /// error.
    NotAcquired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreRenewOutcome {
    Renewed { lease_until_utc: DateTime<Utc> },
    /// The lease was missing or had already expired.
    Lost,
}

#[async_trait]
pub trait SemaphoreStore: Send + Sync {
    /// Creates the semaphore row if it does not already exist.
    async fn ensure(&self, name: &str, limit: i64) -> Result<()>;

    /// Acquire algorithm (spec §4.6), run atomically under a row lock on the
    /// `Semaphore` row:
    /// 1. lock the row; missing -> `Unavailable`.
    /// 2. if `client_request_id` matches an unexpired lease, return it
    ///    unchanged (request-idempotent acquire).
    /// 3. opportunistically delete up to 10 expired leases for `name`.
    /// 4. count unexpired leases; `>= limit` -> `NotAcquired`.
    /// 5. mint a token, assign the next fencing counter, insert the lease.
    async fn acquire(
        &self,
        name: &str,
        owner_id: &str,
        ttl: Duration,
        client_request_id: Option<&str>,
    ) -> Result<SemaphoreAcquireOutcome>;

    /// Extends `leaseUntilUtc` to `max(current, now + ttl)` — renewal never
    /// shortens the lease.
    async fn renew(&self, name: &str, token: Uuid, ttl: Duration) -> Result<SemaphoreRenewOutcome>;

    /// Deletes the lease row. Returns whether one was removed.
    async fn release(&self, name: &str, token: Uuid) -> Result<bool>;

    /// Deletes up to `max_rows` expired leases, scoped to `name` if given.
    async fn reap(&self, name: Option<&str>, max_rows: i64) -> Result<u64>;

    async fn get(&self, name: &str) -> Result<Option<Semaphore>>;
}

/// Validation shared by every `acquire` implementation (spec §4.6):
/// `name` matches `[A-Za-z0-9\-_:/.]{1,200}`, `owner_id` is at most 200
/// characters, `ttl`/`limit` fall within caller-configured bounds.
pub fn validate_acquire_params(
    name: &str,
    owner_id: &str,
    ttl: Duration,
    ttl_bounds: (Duration, Duration),
) -> Result<()> {
    validate_resource_name("name", name)?;
    if owner_id.is_empty() || owner_id.len() > 200 {
        return Err(WharfError::validation(
            "ownerId",
            "must be 1-200 characters long",
        ));
    }
    let (min_ttl, max_ttl) = ttl_bounds;
    if ttl < min_ttl || ttl > max_ttl {
        return Err(WharfError::validation(
            "ttl",
            format!("must be between {:?} and {:?}", min_ttl, max_ttl),
        ));
    }
    Ok(())
}

pub fn validate_limit(limit: i64, max_limit: i64) -> Result<()> {
    if limit < 1 || limit > max_limit {
        return Err(WharfError::validation(
            "limit",
            format!("must be between 1 and {}", max_limit),
        ));
    }
    Ok(())
}
