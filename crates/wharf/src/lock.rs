//! Distributed lock with fencing tokens (spec §4.4). One row per
//! `resourceName`. Fencing token monotonicity is the single most important
//! invariant in this core: any write carrying a fencing token is rejected by
//! the receiver if it is lower than the highest one it has already seen.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{validate_resource_name, Result};
use crate::ids::{FencingToken, OwnerToken};

#[derive(Debug, Clone)]
pub struct DistributedLock {
    pub resource_name: String,
    pub owner_token: Option<OwnerToken>,
    pub lease_until: Option<DateTime<Utc>>,
    pub fencing_token: FencingToken,
    pub context_json: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired {
        owner_token: OwnerToken,
        fencing_token: FencingToken,
    },
    NotAcquired,
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Inserts the row if absent (fencing starts at 0) or atomically updates
    /// it when unowned or expired, bumping the fencing token.
    async fn acquire(
        &self,
        resource_name: &str,
        owner_token: OwnerToken,
        lease: Duration,
        context_json: Option<&str>,
    ) -> Result<AcquireOutcome>;

    /// Atomic update guarded by `ownerToken = current AND leaseUntil > now`.
    /// Bumps the fencing token and extends the lease on success.
    async fn renew(
        &self,
        resource_name: &str,
        owner_token: OwnerToken,
        lease: Duration,
    ) -> Result<AcquireOutcome>;

    /// Nulls the owner only if `owner_token` matches the current holder.
    async fn release(&self, resource_name: &str, owner_token: OwnerToken) -> Result<bool>;

    /// Nulls the owner wherever `leaseUntil <= now`. Returns rows affected.
    async fn cleanup_expired(&self) -> Result<u64>;

    async fn get(&self, resource_name: &str) -> Result<Option<DistributedLock>>;
}

/// Validates a resource name against the shared constraint (spec §4.6,
/// applied here too since Lock shares the same name space convention).
pub fn validate_lock_name(name: &str) -> Result<()> {
    validate_resource_name("resourceName", name)
}
