//! Named lease (spec §4.5): coarser than `Lock`, used for singleton
//! background loops such as the scheduler and the fanout coordinator.
//!
//! Differs from `Lock` in two respects: the owner is a caller-chosen string
//! (usually an instance id) rather than a minted token, so the same owner
//! can re-acquire its own expired lease without rotating identity; and there
//! is no fencing token — callers that need fencing use `Lock` instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct NamedLease {
    pub name: String,
    pub owner: Option<String>,
    pub lease_until_utc: Option<DateTime<Utc>>,
    pub last_granted_utc: Option<DateTime<Utc>>,
    pub version: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct LeaseGrant {
    pub acquired: bool,
    pub server_now: DateTime<Utc>,
    pub lease_until: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Creates the row if missing, then updates only when
    /// `owner IS NULL OR leaseUntilUtc <= now`.
    async fn acquire(&self, name: &str, owner: &str, lease: Duration) -> Result<LeaseGrant>;

    /// Updates only when `owner = current AND leaseUntilUtc > now`.
    async fn renew(&self, name: &str, owner: &str, lease: Duration) -> Result<LeaseGrant>;

    async fn get(&self, name: &str) -> Result<Option<NamedLease>>;
}
