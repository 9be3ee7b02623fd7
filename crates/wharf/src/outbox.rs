//! Transactional outbox work queue (spec §4.1).
//!
//! `enqueue` participates in the caller's transaction so that message
//! emission is atomic with the business write that produced it; every other
//! operation acts against the store's own connection, the way
//! `seesaw-rs::outbox::OutboxReader` claims/marks-published independently of
//! the writer side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::ids::OwnerToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(i16)]
pub enum OutboxStatus {
    Ready = 0,
    InProgress = 1,
    Done = 2,
    Failed = 3,
}

impl OutboxStatus {
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Ready),
            1 => Some(Self::InProgress),
            2 => Some(Self::Done),
            3 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A row as returned by `claim_due`: carries everything a handler needs.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub topic: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub locked_until: Option<DateTime<Utc>>,
    pub owner_token: Option<OwnerToken>,
    pub due_time_utc: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
}

/// Parameters for a new outbox row. `message_id` is the opaque idempotency
/// hint a consumer-side Inbox can dedup against; it is not interpreted here.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub correlation_id: Option<String>,
    pub due_time_utc: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
}

impl NewOutboxMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            correlation_id: None,
            due_time_utc: None,
            message_id: None,
        }
    }

    pub fn with_due_time(mut self, due_time_utc: DateTime<Utc>) -> Self {
        self.due_time_utc = Some(due_time_utc);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Writes a new outbox row inside the caller's transaction. The associated
/// `Transaction` type is bound to the concrete driver's transaction handle
/// by the backend crate (e.g. `sqlx::Transaction<'_, Postgres>` in
/// `wharf-postgres`), so the core stays free of any driver dependency.
#[async_trait]
pub trait OutboxWriter: Send + Sync {
    type Transaction<'c>: Send
    where
        Self: 'c;

    async fn enqueue<'c>(
        &self,
        tx: &mut Self::Transaction<'c>,
        message: NewOutboxMessage,
    ) -> Result<Uuid>;
}

/// The claim-lease-ack side of the outbox, used by the dispatcher and
/// reaper. Does not need the caller's transaction: each call commits its own
/// unit of work against the store.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Atomically claims up to `batch_size` due rows, ordered by
    /// `created_at` then `id`, skipping locked rows (spec §4.1 claim
    /// correctness). `batch_size == 0` returns empty without touching the
    /// store (spec §8 boundary behavior).
    async fn claim_due(
        &self,
        owner: OwnerToken,
        lease: Duration,
        batch_size: i64,
    ) -> Result<Vec<OutboxMessage>>;

    /// Marks a claimed row Done. Only succeeds for rows still owned by
    /// `owner`; returns whether the row was affected.
    async fn mark_dispatched(&self, id: Uuid, owner: OwnerToken) -> Result<bool>;

    /// Returns the row to Ready with a future due time and an incremented
    /// retry count, recording the handler's error.
    async fn reschedule(
        &self,
        id: Uuid,
        owner: OwnerToken,
        delay: Duration,
        last_error: &str,
    ) -> Result<bool>;

    /// Marks the row terminally Failed.
    async fn fail(&self, id: Uuid, owner: OwnerToken, last_error: &str) -> Result<bool>;

    /// Returns expired InProgress rows (lockedUntil<=now) to Ready, nulling
    /// the owner. Returns the number of rows reaped.
    async fn reap(&self) -> Result<u64>;

    /// Deletes Done rows older than `retention`. Returns the number deleted.
    async fn cleanup(&self, retention: Duration) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_code() {
        for status in [
            OutboxStatus::Ready,
            OutboxStatus::InProgress,
            OutboxStatus::Done,
            OutboxStatus::Failed,
        ] {
            assert_eq!(OutboxStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(OutboxStatus::from_code(99), None);
    }

    #[test]
    fn new_message_builder_defaults_to_no_schedule() {
        let msg = NewOutboxMessage::new("orders.created", b"{}".to_vec());
        assert_eq!(msg.topic, "orders.created");
        assert!(msg.due_time_utc.is_none());
        assert!(msg.correlation_id.is_none());
    }
}
