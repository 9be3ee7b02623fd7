//! Inbox deduplication + work queue (spec §4.2): exactly-once *effect* for
//! inbound messages identified by `(source, messageId)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::Result;
use crate::ids::OwnerToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InboxStatus {
    Seen,
    Processing,
    Done,
    Dead,
}

#[derive(Debug, Clone)]
pub struct InboxRecord {
    pub message_id: String,
    pub source: String,
    pub hash: Option<String>,
    pub first_seen_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
    pub processed_utc: Option<DateTime<Utc>>,
    pub due_time_utc: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub status: InboxStatus,
    pub locked_until: Option<DateTime<Utc>>,
    pub owner_token: Option<OwnerToken>,
    pub topic: Option<String>,
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordRequest {
    pub topic: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub hash: Option<String>,
    pub due_time_utc: Option<DateTime<Utc>>,
}

/// The decision of "new or duplicate" is part of the return, per spec
/// §4.2 — callers must not need a second query to find out.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    New(InboxRecord),
    Duplicate(InboxRecord),
}

impl RecordOutcome {
    pub fn record(&self) -> &InboxRecord {
        match self {
            RecordOutcome::New(r) | RecordOutcome::Duplicate(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, RecordOutcome::New(_))
    }
}

#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Inserts a first-seen record, or updates `lastSeenUtc`/`attempts` on
    /// an existing one. Source of truth for dedup decisions.
    async fn record(
        &self,
        source: &str,
        message_id: &str,
        request: RecordRequest,
    ) -> Result<RecordOutcome>;

    /// Claims rows with status Seen or Processing whose lease has expired,
    /// ordered by `lastSeenUtc`.
    async fn claim(
        &self,
        owner: OwnerToken,
        lease: Duration,
        batch_size: i64,
    ) -> Result<Vec<InboxRecord>>;

    async fn ack(&self, owner: OwnerToken, message_ids: &[String]) -> Result<u64>;

    async fn abandon(
        &self,
        owner: OwnerToken,
        message_ids: &[String],
        delay: Option<Duration>,
    ) -> Result<u64>;

    async fn mark_dead(
        &self,
        owner: OwnerToken,
        message_ids: &[String],
        reason: &str,
    ) -> Result<u64>;

    async fn reap(&self) -> Result<u64>;

    async fn cleanup(&self, retention: Duration) -> Result<u64>;

    /// True iff `(source, messageId)` has status Done.
    async fn already_processed(&self, source: &str, message_id: &str) -> Result<bool>;
}
