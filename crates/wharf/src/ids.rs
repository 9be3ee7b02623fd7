//! Owner tokens and fencing tokens (spec §2.2, §2.3, GLOSSARY).

use std::fmt;
use uuid::Uuid;

/// A 128-bit value minted once per worker process and embedded in every
/// claim. Authorizes acks, abandons, and releases against rows it claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    /// Mint a fresh owner token. Call once per process and hold it for the
    /// lifetime of every worker loop running in that process.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for OwnerToken {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A strictly monotonic per-resource counter. Downstream consumers reject
/// any write carrying a fencing token lower than the highest one they have
/// already observed (spec §4.4, §5).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FencingToken(pub i64);

impl FencingToken {
    pub const INITIAL: FencingToken = FencingToken(0);

    pub fn next(self) -> FencingToken {
        FencingToken(self.0 + 1)
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
