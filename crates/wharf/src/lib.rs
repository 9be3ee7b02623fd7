//! # wharf
//!
//! A reliable asynchronous work platform embedded in a relational database:
//! transactional outbound messaging, deduplicated inbound processing,
//! distributed mutual exclusion, counted-resource admission control,
//! time-based scheduling, and multi-shard fanout, all using the same
//! backing store as the application's own data so that message emission is
//! atomic with business writes.
//!
//! This crate is the policy-light core: domain types, the error taxonomy,
//! and the storage traits every backend implements, plus the orchestration
//! (dispatcher, reaper, scheduler tick, fanout planning) that only needs
//! those traits. It has no opinion about which database backs it — see
//! `wharf-postgres` for the concrete PostgreSQL implementation.
//!
//! ## Core concepts
//!
//! - [`Clock`]: the single source of "now" permitted anywhere in this core.
//! - [`OwnerToken`]/[`FencingToken`]: claim authorization and stale-write
//!   rejection.
//! - **Claim-lease-acknowledge**: the pattern every store below shares —
//!   a row moves Ready -> InProgress (claim, with an owner and a lease
//!   deadline) -> Done (ack) or back to Ready (abandon, or reap after the
//!   lease expires).

pub mod backoff;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod idempotency;
pub mod ids;
pub mod inbox;
pub mod lease;
pub mod lock;
pub mod outbox;
pub mod reaper;
pub mod scheduler;
pub mod semaphore;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use error::{Result, WharfError};
pub use ids::{FencingToken, OwnerToken};

pub use dispatcher::{Dispatcher, DispatcherConfig, HandlerOutcome, HandlerRegistry, TopicHandler};
pub use reaper::{Reapable, ReaperLoop};

pub use outbox::{NewOutboxMessage, OutboxMessage, OutboxStatus, OutboxStore, OutboxWriter};

pub use inbox::{InboxRecord, InboxStatus, InboxStore, RecordOutcome, RecordRequest};

pub use idempotency::{IdempotencyRecord, IdempotencyStatus, IdempotencyStore};

pub use lock::{AcquireOutcome as LockAcquireOutcome, DistributedLock, LockStore};

pub use lease::{LeaseGrant, LeaseStore, NamedLease};

pub use semaphore::{
    Semaphore, SemaphoreAcquireOutcome, SemaphoreLease, SemaphoreRenewOutcome, SemaphoreStore,
};

pub use scheduler::{
    Job, JobRun, JobRunStatus, NewJob, NewTimer, SchedulerStore, Timer, TimerStatus, TickOutcome,
    SCHEDULER_LEASE_NAME,
};

pub use fanout::{jitter_offset, plan_due_slices, FanoutPolicy, FanoutSlice, FanoutStore};

pub use async_trait::async_trait;
