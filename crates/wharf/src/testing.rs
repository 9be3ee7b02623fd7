//! In-memory fakes of every store trait, for testing handler wiring and the
//! dispatcher/reaper loops without a database. Same shape as
//! `seesaw-rs::persistence::testing::InMemoryStore`: a `Mutex<HashMap<..>>`
//! guarding synchronous mutation, wrapped in an async trait impl.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Result, WharfError};
use crate::idempotency::{IdempotencyRecord, IdempotencyStatus, IdempotencyStore};
use crate::ids::{FencingToken, OwnerToken};
use crate::inbox::{InboxRecord, InboxStatus, InboxStore, RecordOutcome, RecordRequest};
use crate::lease::{LeaseGrant, LeaseStore, NamedLease};
use crate::lock::{AcquireOutcome, DistributedLock, LockStore};
use crate::outbox::{NewOutboxMessage, OutboxMessage, OutboxStatus, OutboxStore};
use crate::semaphore::{
    Semaphore, SemaphoreAcquireOutcome, SemaphoreLease, SemaphoreRenewOutcome, SemaphoreStore,
};
use std::sync::Arc;

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

/// In-memory [`OutboxStore`]. Enqueue is a plain inherent method here
/// (rather than the `OutboxWriter` trait) since there is no real
/// transaction to participate in outside a database.
pub struct InMemoryOutbox {
    clock: Arc<dyn Clock>,
    rows: Mutex<HashMap<Uuid, OutboxMessage>>,
}

impl InMemoryOutbox {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(HashMap::new()),
        }
    }

    pub fn enqueue(&self, message: NewOutboxMessage) -> Uuid {
        let id = Uuid::new_v4();
        let now = self.clock.now();
        let row = OutboxMessage {
            id,
            topic: message.topic,
            payload: message.payload,
            created_at: now,
            status: OutboxStatus::Ready,
            locked_until: None,
            owner_token: None,
            due_time_utc: message.due_time_utc,
            retry_count: 0,
            last_error: None,
            correlation_id: message.correlation_id,
            message_id: message.message_id,
        };
        self.rows.lock().unwrap().insert(id, row);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<OutboxMessage> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutbox {
    async fn claim_due(
        &self,
        owner: OwnerToken,
        lease: Duration,
        batch_size: i64,
    ) -> Result<Vec<OutboxMessage>> {
        if batch_size <= 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let mut eligible: Vec<Uuid> = rows
            .values()
            .filter(|r| {
                r.status == OutboxStatus::Ready
                    && r.locked_until.map_or(true, |lu| lu <= now)
                    && r.due_time_utc.map_or(true, |d| d <= now)
            })
            .map(|r| r.id)
            .collect();
        eligible.sort_by_key(|id| (rows[id].created_at, *id));
        eligible.truncate(batch_size as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            let row = rows.get_mut(&id).unwrap();
            row.status = OutboxStatus::InProgress;
            row.owner_token = Some(owner);
            row.locked_until = Some(now + chrono_duration(lease));
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn mark_dispatched(&self, id: Uuid, owner: OwnerToken) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            if row.owner_token == Some(owner) {
                row.status = OutboxStatus::Done;
                row.owner_token = None;
                row.locked_until = None;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn reschedule(
        &self,
        id: Uuid,
        owner: OwnerToken,
        delay: Duration,
        last_error: &str,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            if row.owner_token == Some(owner) {
                row.status = OutboxStatus::Ready;
                row.retry_count += 1;
                row.last_error = Some(last_error.to_string());
                row.due_time_utc = Some(now + chrono_duration(delay));
                row.owner_token = None;
                row.locked_until = None;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn fail(&self, id: Uuid, owner: OwnerToken, last_error: &str) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            if row.owner_token == Some(owner) {
                row.status = OutboxStatus::Failed;
                row.last_error = Some(last_error.to_string());
                row.owner_token = None;
                row.locked_until = None;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn reap(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let mut count = 0;
        for row in rows.values_mut() {
            if row.status == OutboxStatus::InProgress && row.locked_until.map_or(false, |lu| lu <= now) {
                row.status = OutboxStatus::Ready;
                row.owner_token = None;
                row.locked_until = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn cleanup(&self, retention: Duration) -> Result<u64> {
        let cutoff = self.clock.now() - chrono_duration(retention);
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, r| !(r.status == OutboxStatus::Done && r.created_at < cutoff));
        Ok((before - rows.len()) as u64)
    }
}

/// In-memory [`InboxStore`], keyed by `(source, messageId)`.
pub struct InMemoryInbox {
    clock: Arc<dyn Clock>,
    rows: Mutex<HashMap<(String, String), InboxRecord>>,
}

impl InMemoryInbox {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl InboxStore for InMemoryInbox {
    async fn record(
        &self,
        source: &str,
        message_id: &str,
        request: RecordRequest,
    ) -> Result<RecordOutcome> {
        let now = self.clock.now();
        let key = (source.to_string(), message_id.to_string());
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&key) {
            Some(existing) => {
                existing.last_seen_utc = now;
                existing.attempts += 1;
                Ok(RecordOutcome::Duplicate(existing.clone()))
            }
            None => {
                let row = InboxRecord {
                    message_id: message_id.to_string(),
                    source: source.to_string(),
                    hash: request.hash,
                    first_seen_utc: now,
                    last_seen_utc: now,
                    processed_utc: None,
                    due_time_utc: request.due_time_utc,
                    attempts: 0,
                    status: InboxStatus::Seen,
                    locked_until: None,
                    owner_token: None,
                    topic: request.topic,
                    payload: request.payload,
                };
                rows.insert(key, row.clone());
                Ok(RecordOutcome::New(row))
            }
        }
    }

    async fn claim(
        &self,
        owner: OwnerToken,
        lease: Duration,
        batch_size: i64,
    ) -> Result<Vec<InboxRecord>> {
        if batch_size <= 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let mut eligible: Vec<(String, String)> = rows
            .iter()
            .filter(|(_, r)| {
                matches!(r.status, InboxStatus::Seen | InboxStatus::Processing)
                    && r.locked_until.map_or(true, |lu| lu <= now)
            })
            .map(|(k, _)| k.clone())
            .collect();
        eligible.sort_by_key(|k| rows[k].last_seen_utc);
        eligible.truncate(batch_size as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for key in eligible {
            let row = rows.get_mut(&key).unwrap();
            row.status = InboxStatus::Processing;
            row.owner_token = Some(owner);
            row.locked_until = Some(now + chrono_duration(lease));
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn ack(&self, owner: OwnerToken, message_ids: &[String]) -> Result<u64> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let mut count = 0;
        for row in rows.values_mut() {
            if message_ids.contains(&row.message_id) && row.owner_token == Some(owner) {
                row.status = InboxStatus::Done;
                row.processed_utc = Some(now);
                row.owner_token = None;
                row.locked_until = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn abandon(
        &self,
        owner: OwnerToken,
        message_ids: &[String],
        delay: Option<Duration>,
    ) -> Result<u64> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let mut count = 0;
        for row in rows.values_mut() {
            if message_ids.contains(&row.message_id) && row.owner_token == Some(owner) {
                row.status = InboxStatus::Seen;
                row.owner_token = None;
                row.locked_until = None;
                row.due_time_utc = delay.map(|d| now + chrono_duration(d));
                count += 1;
            }
        }
        Ok(count)
    }

    async fn mark_dead(
        &self,
        owner: OwnerToken,
        message_ids: &[String],
        _reason: &str,
    ) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut count = 0;
        for row in rows.values_mut() {
            if message_ids.contains(&row.message_id) && row.owner_token == Some(owner) {
                row.status = InboxStatus::Dead;
                row.owner_token = None;
                row.locked_until = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn reap(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let mut count = 0;
        for row in rows.values_mut() {
            if row.status == InboxStatus::Processing && row.locked_until.map_or(false, |lu| lu <= now) {
                row.status = InboxStatus::Seen;
                row.owner_token = None;
                row.locked_until = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn cleanup(&self, retention: Duration) -> Result<u64> {
        let cutoff = self.clock.now() - chrono_duration(retention);
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, r| !(r.status == InboxStatus::Done && r.last_seen_utc < cutoff));
        Ok((before - rows.len()) as u64)
    }

    async fn already_processed(&self, source: &str, message_id: &str) -> Result<bool> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(&(source.to_string(), message_id.to_string()))
            .map_or(false, |r| r.status == InboxStatus::Done))
    }
}

/// In-memory [`LockStore`].
pub struct InMemoryLock {
    clock: Arc<dyn Clock>,
    rows: Mutex<HashMap<String, DistributedLock>>,
}

impl InMemoryLock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LockStore for InMemoryLock {
    async fn acquire(
        &self,
        resource_name: &str,
        owner_token: OwnerToken,
        lease: Duration,
        context_json: Option<&str>,
    ) -> Result<AcquireOutcome> {
        crate::lock::validate_lock_name(resource_name)?;
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let is_new = !rows.contains_key(resource_name);
        let row = rows.entry(resource_name.to_string()).or_insert(DistributedLock {
            resource_name: resource_name.to_string(),
            owner_token: None,
            lease_until: None,
            fencing_token: FencingToken::INITIAL,
            context_json: None,
        });

        let free = row.owner_token.is_none() || row.lease_until.map_or(true, |lu| lu <= now);
        if !free {
            return Ok(AcquireOutcome::NotAcquired);
        }
        row.owner_token = Some(owner_token);
        row.lease_until = Some(now + chrono_duration(lease));
        // First-time creation starts the fencing sequence at 0 (spec §4.4);
        // every later successful acquire on the same row bumps it.
        if !is_new {
            row.fencing_token = row.fencing_token.next();
        }
        row.context_json = context_json.map(|s| s.to_string());
        Ok(AcquireOutcome::Acquired {
            owner_token,
            fencing_token: row.fencing_token,
        })
    }

    async fn renew(
        &self,
        resource_name: &str,
        owner_token: OwnerToken,
        lease: Duration,
    ) -> Result<AcquireOutcome> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(resource_name) else {
            return Ok(AcquireOutcome::NotAcquired);
        };
        let held = row.owner_token == Some(owner_token) && row.lease_until.map_or(false, |lu| lu > now);
        if !held {
            return Ok(AcquireOutcome::NotAcquired);
        }
        row.lease_until = Some(now + chrono_duration(lease));
        row.fencing_token = row.fencing_token.next();
        Ok(AcquireOutcome::Acquired {
            owner_token,
            fencing_token: row.fencing_token,
        })
    }

    async fn release(&self, resource_name: &str, owner_token: OwnerToken) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(resource_name) {
            if row.owner_token == Some(owner_token) {
                row.owner_token = None;
                row.lease_until = None;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let mut count = 0;
        for row in rows.values_mut() {
            if row.owner_token.is_some() && row.lease_until.map_or(false, |lu| lu <= now) {
                row.owner_token = None;
                row.lease_until = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get(&self, resource_name: &str) -> Result<Option<DistributedLock>> {
        Ok(self.rows.lock().unwrap().get(resource_name).cloned())
    }
}

/// In-memory [`LeaseStore`].
pub struct InMemoryLease {
    clock: Arc<dyn Clock>,
    rows: Mutex<HashMap<String, NamedLease>>,
}

impl InMemoryLease {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LeaseStore for InMemoryLease {
    async fn acquire(&self, name: &str, owner: &str, lease: Duration) -> Result<LeaseGrant> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let row = rows.entry(name.to_string()).or_insert(NamedLease {
            name: name.to_string(),
            owner: None,
            lease_until_utc: None,
            last_granted_utc: None,
            version: 0,
        });
        let free = row.owner.is_none() || row.lease_until_utc.map_or(true, |lu| lu <= now);
        if !free {
            return Ok(LeaseGrant {
                acquired: false,
                server_now: now,
                lease_until: row.lease_until_utc,
            });
        }
        row.owner = Some(owner.to_string());
        row.lease_until_utc = Some(now + chrono_duration(lease));
        row.last_granted_utc = Some(now);
        row.version += 1;
        Ok(LeaseGrant {
            acquired: true,
            server_now: now,
            lease_until: row.lease_until_utc,
        })
    }

    async fn renew(&self, name: &str, owner: &str, lease: Duration) -> Result<LeaseGrant> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(name) else {
            return Ok(LeaseGrant {
                acquired: false,
                server_now: now,
                lease_until: None,
            });
        };
        let held = row.owner.as_deref() == Some(owner) && row.lease_until_utc.map_or(false, |lu| lu > now);
        if !held {
            return Ok(LeaseGrant {
                acquired: false,
                server_now: now,
                lease_until: row.lease_until_utc,
            });
        }
        row.lease_until_utc = Some(now + chrono_duration(lease));
        row.version += 1;
        Ok(LeaseGrant {
            acquired: true,
            server_now: now,
            lease_until: row.lease_until_utc,
        })
    }

    async fn get(&self, name: &str) -> Result<Option<NamedLease>> {
        Ok(self.rows.lock().unwrap().get(name).cloned())
    }
}

/// In-memory [`SemaphoreStore`].
pub struct InMemorySemaphore {
    clock: Arc<dyn Clock>,
    semaphores: Mutex<HashMap<String, Semaphore>>,
    leases: Mutex<HashMap<String, Vec<SemaphoreLease>>>,
}

impl InMemorySemaphore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            semaphores: Mutex::new(HashMap::new()),
            leases: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SemaphoreStore for InMemorySemaphore {
    async fn ensure(&self, name: &str, limit: i64) -> Result<()> {
        crate::semaphore::validate_limit(limit, i64::MAX)?;
        self.semaphores.lock().unwrap().entry(name.to_string()).or_insert(Semaphore {
            limit,
            next_fencing_counter: FencingToken(1),
        });
        Ok(())
    }

    async fn acquire(
        &self,
        name: &str,
        owner_id: &str,
        ttl: Duration,
        client_request_id: Option<&str>,
    ) -> Result<SemaphoreAcquireOutcome> {
        let now = self.clock.now();
        let mut semaphores = self.semaphores.lock().unwrap();
        let Some(semaphore) = semaphores.get_mut(name) else {
            return Err(WharfError::unavailable(format!("semaphore {name} does not exist")));
        };

        let mut leases = self.leases.lock().unwrap();
        let name_leases = leases.entry(name.to_string()).or_default();

        if let Some(client_request_id) = client_request_id {
            if let Some(existing) = name_leases
                .iter()
                .find(|l| l.client_request_id.as_deref() == Some(client_request_id) && l.lease_until_utc > now)
            {
                return Ok(SemaphoreAcquireOutcome::Acquired {
                    token: existing.token,
                    fencing: existing.fencing,
                    lease_until_utc: existing.lease_until_utc,
                });
            }
        }

        let mut removed = 0;
        let mut i = 0;
        while i < name_leases.len() && removed < 10 {
            if name_leases[i].lease_until_utc <= now {
                name_leases.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }

        let active = name_leases.iter().filter(|l| l.lease_until_utc > now).count() as i64;
        if active >= semaphore.limit {
            return Ok(SemaphoreAcquireOutcome::NotAcquired);
        }

        let token = Uuid::new_v4();
        let fencing = semaphore.next_fencing_counter;
        semaphore.next_fencing_counter = fencing.next();
        let lease_until_utc = now + chrono_duration(ttl);
        name_leases.push(SemaphoreLease {
            name: name.to_string(),
            token,
            fencing,
            owner_id: owner_id.to_string(),
            lease_until_utc,
            created_utc: now,
            renewed_utc: None,
            client_request_id: client_request_id.map(|s| s.to_string()),
        });

        Ok(SemaphoreAcquireOutcome::Acquired {
            token,
            fencing,
            lease_until_utc,
        })
    }

    async fn renew(&self, name: &str, token: Uuid, ttl: Duration) -> Result<SemaphoreRenewOutcome> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().unwrap();
        let Some(name_leases) = leases.get_mut(name) else {
            return Ok(SemaphoreRenewOutcome::Lost);
        };
        let Some(lease) = name_leases.iter_mut().find(|l| l.token == token) else {
            return Ok(SemaphoreRenewOutcome::Lost);
        };
        if lease.lease_until_utc <= now {
            return Ok(SemaphoreRenewOutcome::Lost);
        }
        let candidate = now + chrono_duration(ttl);
        lease.lease_until_utc = lease.lease_until_utc.max(candidate);
        lease.renewed_utc = Some(now);
        Ok(SemaphoreRenewOutcome::Renewed {
            lease_until_utc: lease.lease_until_utc,
        })
    }

    async fn release(&self, name: &str, token: Uuid) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap();
        let Some(name_leases) = leases.get_mut(name) else {
            return Ok(false);
        };
        let before = name_leases.len();
        name_leases.retain(|l| l.token != token);
        Ok(name_leases.len() != before)
    }

    async fn reap(&self, name: Option<&str>, max_rows: i64) -> Result<u64> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().unwrap();
        let mut removed = 0u64;
        for (lease_name, name_leases) in leases.iter_mut() {
            if let Some(filter) = name {
                if lease_name != filter {
                    continue;
                }
            }
            let mut i = 0;
            while i < name_leases.len() && removed < max_rows as u64 {
                if name_leases[i].lease_until_utc <= now {
                    name_leases.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn get(&self, name: &str) -> Result<Option<Semaphore>> {
        Ok(self.semaphores.lock().unwrap().get(name).copied())
    }
}

/// In-memory [`IdempotencyStore`]. The serializable read-modify-write spec
/// §4.3 describes is a single `Mutex` critical section here; a real backend
/// needs an actual transaction isolation level to get the same guarantee
/// under concurrent connections.
pub struct InMemoryIdempotency {
    clock: Arc<dyn Clock>,
    rows: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryIdempotency {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotency {
    async fn try_begin(&self, key: &str, owner: OwnerToken, lock_duration: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(key) {
            None => {
                rows.insert(
                    key.to_string(),
                    IdempotencyRecord {
                        key: key.to_string(),
                        status: IdempotencyStatus::InProgress,
                        locked_until: Some(now + chrono_duration(lock_duration)),
                        locked_by: Some(owner),
                        failure_count: 0,
                        created_at: now,
                        updated_at: now,
                        completed_at: None,
                    },
                );
                Ok(true)
            }
            Some(row) if row.status == IdempotencyStatus::Completed => Ok(false),
            Some(row)
                if row.status == IdempotencyStatus::InProgress
                    && row.locked_until.map_or(false, |lu| lu > now)
                    && row.locked_by != Some(owner) =>
            {
                Ok(false)
            }
            Some(row) => {
                row.status = IdempotencyStatus::InProgress;
                row.locked_until = Some(now + chrono_duration(lock_duration));
                row.locked_by = Some(owner);
                row.updated_at = now;
                Ok(true)
            }
        }
    }

    async fn complete(&self, key: &str, _owner: OwnerToken) -> Result<()> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(key) {
            row.status = IdempotencyStatus::Completed;
            row.locked_until = None;
            row.locked_by = None;
            row.updated_at = now;
            row.completed_at = Some(now);
        }
        Ok(())
    }

    async fn fail(&self, key: &str, _owner: OwnerToken) -> Result<()> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(key) {
            row.status = IdempotencyStatus::Failed;
            row.locked_until = None;
            row.locked_by = None;
            row.failure_count += 1;
            row.updated_at = now;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.rows.lock().unwrap().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use chrono::Utc;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(Utc::now()))
    }

    // Scenario 1: enqueue-claim-ack (spec §8).
    #[tokio::test]
    async fn enqueue_claim_ack() {
        let outbox = InMemoryOutbox::new(clock());
        let id = outbox.enqueue(NewOutboxMessage::new("orders.created", b"{\"id\":1}".to_vec()));

        let owner = OwnerToken::new();
        let claimed = outbox
            .claim_due(owner, Duration::from_secs(30), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
        assert_eq!(claimed[0].topic, "orders.created");

        assert!(outbox.mark_dispatched(id, owner).await.unwrap());

        let second = outbox
            .claim_due(owner, Duration::from_secs(30), 10)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    // Scenario 2: retry with backoff (spec §8).
    #[tokio::test]
    async fn retry_with_backoff() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let outbox = InMemoryOutbox::new(clock.clone());
        outbox.enqueue(NewOutboxMessage::new("jobs.run", b"{}".to_vec()));

        let owner = OwnerToken::new();
        let claimed = outbox.claim_due(owner, Duration::from_secs(30), 10).await.unwrap();
        let id = claimed[0].id;

        assert!(outbox
            .reschedule(id, owner, Duration::from_secs(2), "x")
            .await
            .unwrap());

        let immediate = outbox.claim_due(OwnerToken::new(), Duration::from_secs(30), 10).await.unwrap();
        assert!(immediate.is_empty(), "must not be claimable before its due time");

        clock.advance(chrono::Duration::seconds(2));
        let after = outbox.claim_due(OwnerToken::new(), Duration::from_secs(30), 10).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].retry_count, 1);
        assert_eq!(after[0].last_error.as_deref(), Some("x"));
    }

    // Scenario 3: reap after crash (spec §8).
    #[tokio::test]
    async fn reap_after_crash() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let outbox = InMemoryOutbox::new(clock.clone());
        outbox.enqueue(NewOutboxMessage::new("t", b"{}".to_vec()));

        let owner_a = OwnerToken::new();
        outbox.claim_due(owner_a, Duration::from_secs(5), 10).await.unwrap();

        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(outbox.reap().await.unwrap(), 1);

        let owner_b = OwnerToken::new();
        let claimed = outbox.claim_due(owner_b, Duration::from_secs(5), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }

    // Scenario 4: semaphore capacity (spec §8).
    #[tokio::test]
    async fn semaphore_capacity() {
        let semaphore = InMemorySemaphore::new(clock());
        semaphore.ensure("db-writers", 2).await.unwrap();

        let a = semaphore.acquire("db-writers", "w1", Duration::from_secs(60), None).await.unwrap();
        let b = semaphore.acquire("db-writers", "w2", Duration::from_secs(60), None).await.unwrap();
        let c = semaphore.acquire("db-writers", "w3", Duration::from_secs(60), None).await.unwrap();

        let (token_a, fencing_a) = match a {
            SemaphoreAcquireOutcome::Acquired { token, fencing, .. } => (token, fencing),
            _ => panic!("expected acquired"),
        };
        match b {
            SemaphoreAcquireOutcome::Acquired { fencing, .. } => assert_eq!(fencing, FencingToken(2)),
            _ => panic!("expected acquired"),
        }
        assert!(matches!(c, SemaphoreAcquireOutcome::NotAcquired));
        assert_eq!(fencing_a, FencingToken(1));

        assert!(semaphore.release("db-writers", token_a).await.unwrap());
        let d = semaphore.acquire("db-writers", "w4", Duration::from_secs(60), None).await.unwrap();
        match d {
            SemaphoreAcquireOutcome::Acquired { fencing, .. } => assert_eq!(fencing, FencingToken(3)),
            _ => panic!("expected acquired"),
        }
    }

    // Scenario 5: request-idempotent semaphore acquire (spec §8).
    #[tokio::test]
    async fn request_idempotent_semaphore_acquire() {
        let semaphore = InMemorySemaphore::new(clock());
        semaphore.ensure("ingest", 5).await.unwrap();

        let first = semaphore
            .acquire("ingest", "w1", Duration::from_secs(60), Some("r1"))
            .await
            .unwrap();
        let second = semaphore
            .acquire("ingest", "w1", Duration::from_secs(60), Some("r1"))
            .await
            .unwrap();

        match (first, second) {
            (
                SemaphoreAcquireOutcome::Acquired { token: t1, fencing: f1, .. },
                SemaphoreAcquireOutcome::Acquired { token: t2, fencing: f2, .. },
            ) => {
                assert_eq!(t1, t2);
                assert_eq!(f1, f2);
            }
            _ => panic!("expected both acquires to succeed"),
        }
    }

    // Scenario 6: inbox dedup (spec §8).
    #[tokio::test]
    async fn inbox_dedup() {
        let inbox = InMemoryInbox::new(clock());

        let first = inbox.record("s", "m1", RecordRequest::default()).await.unwrap();
        assert!(first.is_new());

        let second = inbox.record("s", "m1", RecordRequest::default()).await.unwrap();
        assert!(!second.is_new());
        assert_eq!(second.record().attempts, 1);

        let owner = OwnerToken::new();
        let claimed = inbox.claim(owner, Duration::from_secs(30), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(inbox.ack(owner, &["m1".to_string()]).await.unwrap(), 1);

        assert!(inbox.already_processed("s", "m1").await.unwrap());
    }

    // Fencing monotonicity (spec §8 invariant) across lock acquire/release/acquire.
    #[tokio::test]
    async fn lock_acquire_release_acquire_increases_fencing() {
        let lock = InMemoryLock::new(clock());
        let owner1 = OwnerToken::new();
        let first = lock.acquire("res", owner1, Duration::from_secs(30), None).await.unwrap();
        let f1 = match first {
            AcquireOutcome::Acquired { fencing_token, .. } => fencing_token,
            _ => panic!("expected acquired"),
        };
        assert!(lock.release("res", owner1).await.unwrap());

        let owner2 = OwnerToken::new();
        let second = lock.acquire("res", owner2, Duration::from_secs(30), None).await.unwrap();
        let f2 = match second {
            AcquireOutcome::Acquired { fencing_token, .. } => fencing_token,
            _ => panic!("expected acquired"),
        };
        assert!(f1 < f2);
    }

    // Idempotency correctness (spec §8 invariant).
    #[tokio::test]
    async fn idempotency_try_begin_then_complete_blocks_future_attempts() {
        let store = InMemoryIdempotency::new(clock());
        let owner = OwnerToken::new();

        assert!(store.try_begin("k1", owner, Duration::from_secs(30)).await.unwrap());

        let other = OwnerToken::new();
        assert!(!store.try_begin("k1", other, Duration::from_secs(30)).await.unwrap());

        store.complete("k1", owner).await.unwrap();

        assert!(!store.try_begin("k1", owner, Duration::from_secs(30)).await.unwrap());
        assert!(!store.try_begin("k1", other, Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn idempotency_failed_key_can_be_retried() {
        let store = InMemoryIdempotency::new(clock());
        let owner = OwnerToken::new();

        assert!(store.try_begin("k2", owner, Duration::from_secs(30)).await.unwrap());
        store.fail("k2", owner).await.unwrap();

        assert!(store.try_begin("k2", owner, Duration::from_secs(30)).await.unwrap());
    }

    // Boundary behavior: claim batch size of 0 touches nothing (spec §8).
    #[tokio::test]
    async fn claim_batch_size_zero_is_a_no_op() {
        let outbox = InMemoryOutbox::new(clock());
        outbox.enqueue(NewOutboxMessage::new("t", b"{}".to_vec()));
        let claimed = outbox.claim_due(OwnerToken::new(), Duration::from_secs(5), 0).await.unwrap();
        assert!(claimed.is_empty());
    }
}
