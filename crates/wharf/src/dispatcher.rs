//! Outbox dispatcher (spec §4.9): a worker loop that claims batches,
//! invokes topic handlers, and acks or reschedules.
//!
//! The handler map is built the way `seesaw-rs::job::CommandRegistry` builds
//! its `job_type -> deserializer` map: a panicking `register` for the
//! common case of wiring handlers once at startup, and a non-panicking
//! `try_register` for callers that want to handle collisions themselves.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::backoff::BackoffPolicy;
use crate::ids::OwnerToken;
use crate::outbox::{OutboxMessage, OutboxStore};

/// What a handler reports back to the dispatcher. Unlike `WharfError`, a
/// handler never has to distinguish `Unavailable` or `Conflict` — those are
/// store-level concerns. A handler only needs to say whether its own
/// business logic succeeded, failed but may be retried, or failed for good.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Success,
    Transient(String),
    Permanent(String),
}

#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, message: &OutboxMessage, cancel: &CancellationToken) -> HandlerOutcome;
}

/// Maps topic strings to handlers (spec §9: "specified as a map from topic
/// string to a callable... handlers are instance-scoped and thread-safe").
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TopicHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `topic`.
    ///
    /// # Panics
    ///
    /// Panics if a handler is already registered for this topic. Use
    /// `try_register` for a non-panicking version.
    pub fn register(mut self, topic: impl Into<String>, handler: Arc<dyn TopicHandler>) -> Self {
        let topic = topic.into();
        if self.handlers.contains_key(&topic) {
            panic!("handler already registered for topic {topic}");
        }
        self.handlers.insert(topic, handler);
        self
    }

    pub fn try_register(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), String> {
        let topic = topic.into();
        if self.handlers.contains_key(&topic) {
            return Err(format!("handler already registered for topic {topic}"));
        }
        self.handlers.insert(topic, handler);
        Ok(())
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn TopicHandler>> {
        self.handlers.get(topic).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub lease: Duration,
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(30),
            batch_size: 50,
            poll_interval: Duration::from_millis(250),
            backoff: BackoffPolicy::default(),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn OutboxStore>,
    registry: HandlerRegistry,
    owner: OwnerToken,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        registry: HandlerRegistry,
        owner: OwnerToken,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            registry,
            owner,
            config,
        }
    }

    /// Claims one batch and drives every claimed message through its
    /// handler (spec §4.9 steps 1-4). Returns the number of rows claimed,
    /// which the caller uses for backpressure (step 5).
    pub async fn run_once(&self, cancel: &CancellationToken) -> usize {
        let claimed = match self
            .store
            .claim_due(self.owner, self.config.lease, self.config.batch_size)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "claim_due failed");
                return 0;
            }
        };

        for message in &claimed {
            if cancel.is_cancelled() {
                break;
            }
            self.dispatch_one(message, cancel).await;
        }

        claimed.len()
    }

    async fn dispatch_one(&self, message: &OutboxMessage, cancel: &CancellationToken) {
        let Some(handler) = self.registry.get(&message.topic) else {
            warn!(topic = %message.topic, id = %message.id, "no handler registered, failing message");
            if let Err(e) = self
                .store
                .fail(message.id, self.owner, "unroutable: no handler for topic")
                .await
            {
                error!(error = %e, id = %message.id, "fail() after unroutable message also failed");
            }
            return;
        };

        let outcome = handler.handle(message, cancel).await;
        match outcome {
            HandlerOutcome::Success => {
                if let Err(e) = self.store.mark_dispatched(message.id, self.owner).await {
                    error!(error = %e, id = %message.id, "mark_dispatched failed");
                }
            }
            HandlerOutcome::Transient(err) | HandlerOutcome::Permanent(err) => {
                self.handle_failure(message, &outcome, &err).await;
            }
        }
    }

    async fn handle_failure(&self, message: &OutboxMessage, outcome: &HandlerOutcome, err: &str) {
        let permanent = matches!(outcome, HandlerOutcome::Permanent(_));
        let exhausted = self.config.backoff.exhausted(message.retry_count);
        if !permanent && !exhausted {
            let delay = self.config.backoff.delay_for(message.retry_count + 1);
            debug!(id = %message.id, ?delay, "rescheduling after handler failure");
            if let Err(e) = self
                .store
                .reschedule(message.id, self.owner, delay, err)
                .await
            {
                error!(error = %e, id = %message.id, "reschedule failed");
            }
        } else {
            warn!(id = %message.id, permanent, "failing message terminally");
            if let Err(e) = self.store.fail(message.id, self.owner, err).await {
                error!(error = %e, id = %message.id, "fail failed");
            }
        }
    }

    /// Runs the worker loop until `cancel` is triggered, honoring the
    /// backpressure rule in spec §4.9 step 5: sleep `pollInterval` after an
    /// empty claim, otherwise loop immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let claimed = self.run_once(&cancel).await;
            if claimed == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
    }
}
