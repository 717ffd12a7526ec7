//! Per-organizer active-run tracking.
//!
//! The "one active run per organizer" rule is host policy, not core
//! semantics, so it lives here as explicit injected state with a TTL and a
//! cleanup contract rather than a process-global. Entries expire after the
//! configured TTL so a missed release (crash between close and release)
//! cannot wedge an organizer; the service re-validates hits against the
//! store before rejecting a create.
//!
//! # Thread Safety
//!
//! State sits behind an `RwLock`; claims take the write lock briefly and
//! reads are lock-shared. Callers invoke [`cleanup`](ActiveRunTracker::cleanup)
//! periodically (the service does so on each create) to bound memory.

use std::collections::HashMap;
use std::sync::RwLock;

use muster_core::RunId;

#[derive(Debug, Clone)]
struct TrackedRun {
    run_id: RunId,
    tracked_at_ms: u64,
}

/// Tracks the most recent active run per `(guild, organizer)`.
#[derive(Debug)]
pub struct ActiveRunTracker {
    ttl_ms: u64,
    state: RwLock<HashMap<(String, String), TrackedRun>>,
}

impl ActiveRunTracker {
    /// Creates a tracker whose entries expire after `ttl_ms`.
    #[must_use]
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Records `run_id` as the organizer's active run.
    pub fn claim(&self, guild_id: &str, organizer_id: &str, run_id: RunId, now_ms: u64) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.insert(
            (guild_id.to_string(), organizer_id.to_string()),
            TrackedRun {
                run_id,
                tracked_at_ms: now_ms,
            },
        );
    }

    /// Returns the organizer's tracked run, if one is within TTL.
    #[must_use]
    pub fn active_run(&self, guild_id: &str, organizer_id: &str, now_ms: u64) -> Option<RunId> {
        let state = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .get(&(guild_id.to_string(), organizer_id.to_string()))
            .filter(|tracked| now_ms.saturating_sub(tracked.tracked_at_ms) < self.ttl_ms)
            .map(|tracked| tracked.run_id.clone())
    }

    /// Releases the organizer's entry if it still points at `run_id`.
    pub fn release(&self, guild_id: &str, organizer_id: &str, run_id: &RunId) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (guild_id.to_string(), organizer_id.to_string());
        if state
            .get(&key)
            .is_some_and(|tracked| tracked.run_id == *run_id)
        {
            state.remove(&key);
        }
    }

    /// Drops every entry past its TTL.
    pub fn cleanup(&self, now_ms: u64) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.retain(|_, tracked| now_ms.saturating_sub(tracked.tracked_at_ms) < self.ttl_ms);
    }

    /// Number of tracked organizers.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_lookup() {
        let tracker = ActiveRunTracker::new(60_000);
        tracker.claim("g1", "org", RunId::from_raw("run-1"), 1_000);
        assert_eq!(
            tracker.active_run("g1", "org", 2_000),
            Some(RunId::from_raw("run-1"))
        );
        assert_eq!(tracker.active_run("g1", "other", 2_000), None);
        assert_eq!(tracker.active_run("g2", "org", 2_000), None);
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let tracker = ActiveRunTracker::new(60_000);
        tracker.claim("g1", "org", RunId::from_raw("run-1"), 1_000);
        assert!(tracker.active_run("g1", "org", 61_000).is_none());
    }

    #[test]
    fn test_release_only_matching_run() {
        let tracker = ActiveRunTracker::new(60_000);
        tracker.claim("g1", "org", RunId::from_raw("run-1"), 1_000);

        tracker.release("g1", "org", &RunId::from_raw("run-other"));
        assert!(tracker.active_run("g1", "org", 2_000).is_some());

        tracker.release("g1", "org", &RunId::from_raw("run-1"));
        assert!(tracker.active_run("g1", "org", 2_000).is_none());
    }

    #[test]
    fn test_cleanup_bounds_memory() {
        let tracker = ActiveRunTracker::new(10_000);
        for i in 0..50 {
            tracker.claim("g1", &format!("org-{i}"), RunId::generate(), 0);
        }
        assert_eq!(tracker.tracked(), 50);
        tracker.cleanup(20_000);
        assert_eq!(tracker.tracked(), 0);
    }
}
