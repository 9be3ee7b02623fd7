//! Fanout coordinator (spec §4.8): under a per-topic lease, enumerates
//! `(shardKey, workKey)` candidates, decides which are due, and emits a
//! slice message per due candidate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct FanoutPolicy {
    pub every_seconds: i64,
    pub jitter_seconds: i64,
}

/// A `(fanoutTopic, shardKey, workKey, windowStart?)` quad emitted by the
/// coordinator and carried as an outbox payload (GLOSSARY).
#[derive(Debug, Clone)]
pub struct FanoutSlice {
    pub fanout_topic: String,
    pub shard_key: String,
    pub work_key: String,
    pub window_start: Option<DateTime<Utc>>,
    pub correlation_id: String,
}

#[async_trait]
pub trait FanoutStore: Send + Sync {
    async fn get_policy(&self, fanout_topic: &str, work_key: &str) -> Result<Option<FanoutPolicy>>;

    /// Reads `lastCompletedAt` for every shard key supplied, returning
    /// `None` for shards with no cursor row yet (created lazily on first
    /// completion, spec §3).
    async fn get_cursors(
        &self,
        fanout_topic: &str,
        work_key: &str,
        shard_keys: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>>;

    async fn mark_completed(
        &self,
        fanout_topic: &str,
        work_key: &str,
        shard_key: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;
}

/// Deterministic per-slice jitter: a hash of `(shardKey, workKey,
/// now/everySeconds)` modulo `jitterSeconds`, so that any coordinator tick
/// in the same `everySeconds` bucket computes the same offset for the same
/// slice (spec §9, second open question — see DESIGN.md for why this
/// resolution was chosen).
pub fn jitter_offset(
    shard_key: &str,
    work_key: &str,
    now: DateTime<Utc>,
    every_seconds: i64,
    jitter_seconds: i64,
) -> i64 {
    if jitter_seconds <= 0 {
        return 0;
    }
    let bucket = if every_seconds > 0 {
        now.timestamp() / every_seconds
    } else {
        now.timestamp()
    };
    let mut hasher = DefaultHasher::new();
    shard_key.hash(&mut hasher);
    work_key.hash(&mut hasher);
    bucket.hash(&mut hasher);
    (hasher.finish() % jitter_seconds as u64) as i64
}

/// Pure decision logic for which candidates are due (spec §4.8 steps 2-4),
/// independent of how the candidate list or cursor rows were fetched so it
/// can be unit tested without a store.
pub fn plan_due_slices(
    fanout_topic: &str,
    work_key: &str,
    policy: FanoutPolicy,
    candidates: &[String],
    cursors: &HashMap<String, Option<DateTime<Utc>>>,
    now: DateTime<Utc>,
) -> Vec<FanoutSlice> {
    candidates
        .iter()
        .filter_map(|shard_key| {
            let last_completed_at = cursors.get(shard_key).copied().flatten();
            let due = match last_completed_at {
                None => true,
                Some(last) => {
                    let elapsed = (now - last).num_seconds().max(0);
                    let jitter = jitter_offset(
                        shard_key,
                        work_key,
                        now,
                        policy.every_seconds,
                        policy.jitter_seconds,
                    );
                    elapsed >= policy.every_seconds + jitter
                }
            };
            due.then(|| FanoutSlice {
                fanout_topic: fanout_topic.to_string(),
                shard_key: shard_key.clone(),
                work_key: work_key.to_string(),
                window_start: last_completed_at,
                correlation_id: uuid::Uuid::new_v4().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_offset_is_deterministic_and_bounded() {
        let now = DateTime::parse_from_rfc3339("2026-07-27T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = jitter_offset("shard-1", "work", now, 60, 10);
        let b = jitter_offset("shard-1", "work", now, 60, 10);
        assert_eq!(a, b);
        assert!(a < 10);
    }

    #[test]
    fn jitter_offset_zero_when_no_jitter_configured() {
        let now = Utc::now();
        assert_eq!(jitter_offset("s", "w", now, 60, 0), 0);
    }

    #[test]
    fn candidate_with_no_cursor_is_always_due() {
        let policy = FanoutPolicy {
            every_seconds: 3600,
            jitter_seconds: 0,
        };
        let candidates = vec!["shard-a".to_string()];
        let cursors = HashMap::new();
        let slices = plan_due_slices("sync", "wk", policy, &candidates, &cursors, Utc::now());
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].shard_key, "shard-a");
        assert!(slices[0].window_start.is_none());
    }

    #[test]
    fn candidate_not_due_before_every_seconds_elapses() {
        let now = Utc::now();
        let policy = FanoutPolicy {
            every_seconds: 3600,
            jitter_seconds: 0,
        };
        let candidates = vec!["shard-a".to_string()];
        let mut cursors = HashMap::new();
        cursors.insert("shard-a".to_string(), Some(now - chrono::Duration::seconds(10)));
        let slices = plan_due_slices("sync", "wk", policy, &candidates, &cursors, now);
        assert!(slices.is_empty());
    }
}
