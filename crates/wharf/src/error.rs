//! Error taxonomy (spec §7). Kinds, not type names: every store and loop in
//! this crate returns one of these variants rather than an opaque string.

use thiserror::Error;

/// The core never swallows a store error; background loops catch all of
/// these from a single iteration, log, and keep going (spec §7 propagation
/// policy). See `Categorizable` in `seesaw-rs::error` for the analogous
/// category/safe-message split this taxonomy is grounded on.
#[derive(Debug, Error, Clone)]
pub enum WharfError {
    /// Input did not meet a named constraint. Surfaced to the caller; never
    /// retried.
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// The backing store could not be reached, or the transaction aborted.
    /// Surfaced; the caller may retry.
    #[error("backing store unavailable: {message}")]
    Unavailable { message: String },

    /// An operation required an unexpired ownership and had none. The work
    /// is deemed lost; a reaper will recover it.
    #[error("stale lease on {resource}: {message}")]
    StaleLease { resource: String, message: String },

    /// A handler signalled a retryable failure.
    #[error("handler transient failure: {message}")]
    HandlerTransient { message: String },

    /// A handler signalled an unretryable failure, or retries are exhausted.
    #[error("handler permanent failure: {message}")]
    HandlerPermanent { message: String },

    /// Concurrent modification detected: a fencing token lower than
    /// expected, or a serializable abort.
    #[error("conflict on {resource}: {message}")]
    Conflict { resource: String, message: String },
}

impl WharfError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn stale_lease(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StaleLease {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WharfError>;

/// Name validation shared by Lock, Lease, and Semaphore (spec §4.6:
/// `[A-Za-z0-9\-_:/.]{1,200}`).
pub fn validate_resource_name(field: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 200 {
        return Err(WharfError::validation(
            field,
            "must be 1-200 characters long",
        ));
    }
    let valid = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'/' | b'.'));
    if !valid {
        return Err(WharfError::validation(
            field,
            "must match [A-Za-z0-9-_:/.]{1,200}",
        ));
    }
    Ok(())
}
