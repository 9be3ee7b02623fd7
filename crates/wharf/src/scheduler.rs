//! Scheduler of due jobs and timers (spec §4.7), built on the same
//! claim-lease discipline as the rest of the core. A periodic tick, run
//! under the singleton lease named [`SCHEDULER_LEASE_NAME`], promotes due
//! timers and due job runs into outbox messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::ids::OwnerToken;
use crate::lease::LeaseStore;

/// The lease name every scheduler instance contends for (spec §4.7: "under
/// a singleton lease `scheduler`").
pub const SCHEDULER_LEASE_NAME: &str = "scheduler";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum JobRunStatus {
    Pending,
    Claimed,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TimerStatus {
    Pending,
    Claimed,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub job_name: String,
    pub cron_schedule: String,
    pub topic: String,
    pub payload: Option<Vec<u8>>,
    pub is_enabled: bool,
    pub next_due_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_name: String,
    pub cron_schedule: String,
    pub topic: String,
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub status: JobRunStatus,
    pub owner_token: Option<OwnerToken>,
    pub locked_until: Option<DateTime<Utc>>,
    pub retry_count: i32,
}

#[derive(Debug, Clone)]
pub struct Timer {
    pub id: Uuid,
    pub due_time: DateTime<Utc>,
    pub topic: String,
    pub payload: Vec<u8>,
    pub correlation_id: Option<String>,
    pub status: TimerStatus,
}

#[derive(Debug, Clone)]
pub struct NewTimer {
    pub due_time: DateTime<Utc>,
    pub topic: String,
    pub payload: Vec<u8>,
    pub correlation_id: Option<String>,
}

/// Result of a single scheduler tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickOutcome {
    pub timers_promoted: u64,
    pub job_runs_promoted: u64,
}

#[async_trait]
pub trait SchedulerStore: Send + Sync {
    async fn register_job(&self, job: NewJob) -> Result<Uuid>;

    async fn register_timer(&self, timer: NewTimer) -> Result<Uuid>;

    /// Promotes due Timers (`status=Pending AND dueTime<=now`) into Outbox
    /// rows, then marks the Timer Done, all inside one transaction (spec
    /// §4.7 step 1 and step 3).
    async fn promote_due_timers(&self) -> Result<u64>;

    /// For each enabled Job whose `nextDueTime <= now`, computes the next
    /// cron occurrence, inserts a JobRun, advances `Jobs.nextDueTime`, and
    /// turns the JobRun into an Outbox message, all inside one transaction
    /// (spec §4.7 step 2 and step 3).
    async fn promote_due_job_runs(&self) -> Result<u64>;
}

/// Runs one scheduler tick under the singleton `scheduler` lease. Returns
/// `None` if the lease could not be acquired (another instance holds it) —
/// that is the expected steady state across all but one scheduler process.
pub async fn run_tick(
    lease_store: &dyn LeaseStore,
    scheduler_store: &dyn SchedulerStore,
    owner: &str,
    lease: Duration,
) -> Result<Option<TickOutcome>> {
    let grant = lease_store
        .acquire(SCHEDULER_LEASE_NAME, owner, lease)
        .await?;
    if !grant.acquired {
        debug!(owner, "scheduler lease not acquired this tick");
        return Ok(None);
    }

    let timers_promoted = scheduler_store.promote_due_timers().await.unwrap_or_else(|e| {
        warn!(error = %e, "promote_due_timers failed");
        0
    });
    let job_runs_promoted = scheduler_store
        .promote_due_job_runs()
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "promote_due_job_runs failed");
            0
        });

    Ok(Some(TickOutcome {
        timers_promoted,
        job_runs_promoted,
    }))
}
