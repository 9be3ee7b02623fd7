//! Idempotency store (spec §4.3): gates side-effecting operations by an
//! application-chosen business key.
//!
//! State machine: `∅ → InProgress → {Completed | Failed}`; a `Failed` key
//! may be retried (`try_begin` succeeds again).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::Result;
use crate::ids::OwnerToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(i16)]
pub enum IdempotencyStatus {
    Failed = 0,
    InProgress = 1,
    Completed = 2,
}

impl IdempotencyStatus {
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Failed),
            1 => Some(Self::InProgress),
            2 => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub status: IdempotencyStatus,
    pub locked_until: Option<DateTime<Utc>>,
    pub locked_by: Option<OwnerToken>,
    pub failure_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Under a serializable read-modify-write (spec §4.3):
    /// - no row exists -> insert InProgress, return true.
    /// - row is Completed -> return false.
    /// - row is InProgress, unexpired, and held by a different owner ->
    ///   return false.
    /// - otherwise (stale lock, Failed, or the same owner) -> transition to
    ///   InProgress with a refreshed lease, return true.
    async fn try_begin(
        &self,
        key: &str,
        owner: OwnerToken,
        lock_duration: Duration,
    ) -> Result<bool>;

    /// Sets status Completed and clears the lease. Idempotent.
    async fn complete(&self, key: &str, owner: OwnerToken) -> Result<()>;

    /// Sets status Failed, clears the lease, increments `failureCount`.
    /// Idempotent.
    async fn fail(&self, key: &str, owner: OwnerToken) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;
}
