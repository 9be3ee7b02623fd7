//! Reapers (spec §2.13, §4 "reap" operations): background loops that
//! release expired claims for each store on a cadence, the self-healing
//! mechanism for a claim that committed but whose worker then died (spec
//! §4.1 failure semantics).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::inbox::InboxStore;
use crate::lock::LockStore;
use crate::outbox::OutboxStore;
use crate::semaphore::SemaphoreStore;

/// A single store's expired-claim reclamation, abstracted so one generic
/// loop can drive any of them.
#[async_trait]
pub trait Reapable: Send + Sync {
    async fn reap_once(&self) -> Result<u64>;
}

pub struct OutboxReaper(pub Arc<dyn OutboxStore>);

#[async_trait]
impl Reapable for OutboxReaper {
    async fn reap_once(&self) -> Result<u64> {
        self.0.reap().await
    }
}

pub struct InboxReaper(pub Arc<dyn InboxStore>);

#[async_trait]
impl Reapable for InboxReaper {
    async fn reap_once(&self) -> Result<u64> {
        self.0.reap().await
    }
}

pub struct LockReaper(pub Arc<dyn LockStore>);

#[async_trait]
impl Reapable for LockReaper {
    async fn reap_once(&self) -> Result<u64> {
        self.0.cleanup_expired().await
    }
}

pub struct SemaphoreReaper {
    pub store: Arc<dyn SemaphoreStore>,
    pub max_rows: i64,
}

#[async_trait]
impl Reapable for SemaphoreReaper {
    async fn reap_once(&self) -> Result<u64> {
        self.store.reap(None, self.max_rows).await
    }
}

/// Drives a single [`Reapable`] on a fixed cadence until cancelled. Catches
/// every error from a single iteration, logs, and keeps going — per spec §7
/// propagation policy, background loops never terminate on a store error.
pub struct ReaperLoop {
    reapable: Arc<dyn Reapable>,
    cadence: Duration,
    label: &'static str,
}

impl ReaperLoop {
    pub fn new(reapable: Arc<dyn Reapable>, cadence: Duration, label: &'static str) -> Self {
        Self {
            reapable,
            cadence,
            label,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.cadence) => {}
            }

            match self.reapable.reap_once().await {
                Ok(0) => {}
                Ok(n) => debug!(reaper = self.label, reaped = n, "reclaimed expired rows"),
                Err(e) => warn!(reaper = self.label, error = %e, "reap iteration failed"),
            }
        }
    }
}
