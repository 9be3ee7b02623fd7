//! Backend configuration, loaded from the environment the way
//! `server::config::Config` is.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use wharf::backoff::BackoffPolicy;
use wharf::dispatcher::DispatcherConfig;

/// Connection, dispatcher, reaper, and retention settings for the
/// PostgreSQL backend. Every field also has a sensible default so library
/// consumers can build one programmatically instead of going through the
/// environment.
#[derive(Debug, Clone)]
pub struct PgBackendConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub default_lease: Duration,
    pub dispatcher_batch_size: i64,
    pub dispatcher_poll_interval: Duration,
    pub dispatcher_concurrency: usize,
    pub backoff_cap: Duration,
    pub max_attempts: i32,
    pub reaper_cadence: Duration,
    pub done_retention: Duration,
}

impl PgBackendConfig {
    /// Loads from the environment, falling back to a `.env` file if present
    /// (development only). Only `DATABASE_URL` is required; every other
    /// field has a default matching [`DispatcherConfig::default`] and
    /// [`BackoffPolicy::default`].
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();
        let default = DispatcherConfig::default();
        let default_backoff = BackoffPolicy::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: parse_env("WHARF_MAX_CONNECTIONS", 10)?,
            default_lease: Duration::from_secs(parse_env(
                "WHARF_DEFAULT_LEASE_SECONDS",
                default.lease.as_secs(),
            )?),
            dispatcher_batch_size: parse_env(
                "WHARF_DISPATCHER_BATCH_SIZE",
                default.batch_size,
            )?,
            dispatcher_poll_interval: Duration::from_millis(parse_env(
                "WHARF_DISPATCHER_POLL_INTERVAL_MS",
                default.poll_interval.as_millis() as u64,
            )?),
            dispatcher_concurrency: parse_env("WHARF_DISPATCHER_CONCURRENCY", 4usize)?,
            backoff_cap: Duration::from_secs(parse_env(
                "WHARF_BACKOFF_CAP_SECONDS",
                default_backoff.cap_seconds,
            )?),
            max_attempts: parse_env("WHARF_MAX_ATTEMPTS", default_backoff.max_attempts)?,
            reaper_cadence: Duration::from_secs(parse_env("WHARF_REAPER_CADENCE_SECONDS", 15u64)?),
            done_retention: Duration::from_secs(parse_env(
                "WHARF_DONE_RETENTION_SECONDS",
                7 * 24 * 3600u64,
            )?),
        })
    }

    /// The dispatcher configuration this backend config implies, for
    /// constructing a [`wharf::dispatcher::Dispatcher`] without repeating
    /// field plumbing at every call site.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            lease: self.default_lease,
            batch_size: self.dispatcher_batch_size,
            poll_interval: self.dispatcher_poll_interval,
            backoff: BackoffPolicy {
                cap_seconds: self.backoff_cap.as_secs(),
                max_attempts: self.max_attempts,
            },
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        Err(_) => Ok(default),
    }
}
