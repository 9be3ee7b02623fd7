//! PostgreSQL implementation of the wharf coordination primitives.
//!
//! Each store struct wraps a [`sqlx::PgPool`] and implements the
//! corresponding trait from `wharf` using `FOR UPDATE SKIP LOCKED` claims and
//! guarded `UPDATE ... WHERE` statements, the way `PgJobStore` implements
//! `seesaw::job::JobStore`.

pub mod config;
pub mod fanout;
pub mod idempotency;
pub mod inbox;
pub mod lease;
pub mod lock;
pub mod outbox;
pub mod scheduler;
pub mod semaphore;

pub use config::PgBackendConfig;
pub use fanout::PgFanoutStore;
pub use idempotency::PgIdempotencyStore;
pub use inbox::PgInboxStore;
pub use lease::PgLeaseStore;
pub use lock::PgLockStore;
pub use outbox::PgOutboxStore;
pub use scheduler::PgSchedulerStore;
pub use semaphore::PgSemaphoreStore;

use wharf::error::WharfError;

/// Classifies a driver error into the taxonomy every store returns (spec
/// §7): a unique-violation or serialization failure is a [`Conflict`], every
/// other sqlx error is treated as the backing store being [`Unavailable`].
///
/// [`Conflict`]: WharfError::Conflict
/// [`Unavailable`]: WharfError::Unavailable
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> WharfError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.code().as_deref() {
            // unique_violation, serialization_failure
            Some("23505") | Some("40001") => {
                return WharfError::conflict("unknown", db_err.message().to_string());
            }
            _ => {}
        }
    }
    WharfError::unavailable(err.to_string())
}
