//! Key pop triggering and roster snapshotting.
//!
//! A key pop opens a time-boxed window and segments the run into
//! attributable "clears". Credit for clear N is only well-defined once pop
//! N+1 happens — everyone present between pop N and pop N+1 is credited for
//! clear N — so settlement always runs exactly one pop behind: triggering
//! pop N+1 first settles pop N, then captures the new snapshot. The very
//! last pop is settled at run end by the attribution engine's finalize pass.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::ids::RunId;
use crate::run::error::RunError;
use crate::run::state::{Run, RunStatus};
use crate::settlement::AttributionEngine;
use crate::store::{AttributionStore, RosterStore, RunStore, StoreError};

/// Immutable set of joined participants captured at pop time.
///
/// Created exactly once per pop, never mutated afterwards. Pop number `0` is
/// reserved for the synthetic fallback snapshot of pop-less runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPopSnapshot {
    /// Run the snapshot belongs to.
    pub run_id: RunId,
    /// Pop number, starting at 1.
    pub pop_number: u32,
    /// Joined user ids at the instant of the pop.
    pub user_ids: Vec<String>,
    /// Capture timestamp.
    pub captured_at_ms: u64,
}

/// Result of a successful pop trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopOutcome {
    /// The new pop count.
    pub pop_number: u32,
    /// When the new key window closes.
    pub window_ends_at_ms: u64,
}

/// Pop coordination over the shared store.
///
/// Callers (the lifecycle engine) validate the actor and the live status
/// before delegating here; this component owns the settle-snapshot-persist
/// ordering.
pub struct KeyPopCoordinator<S> {
    store: Arc<S>,
    engine: Arc<AttributionEngine<S>>,
    clock: Arc<dyn Clock>,
}

impl<S: RunStore + RosterStore + AttributionStore> KeyPopCoordinator<S> {
    /// Creates a coordinator sharing the lifecycle's store and engine.
    pub fn new(store: Arc<S>, engine: Arc<AttributionEngine<S>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            engine,
            clock,
        }
    }

    /// Triggers the next pop for a validated live run.
    ///
    /// Ordering is load-bearing: the previous pop is settled strictly before
    /// the new snapshot is captured, so a user who joined after the previous
    /// window opened can never leak into its credited set. Settlement
    /// failures are logged and never abort the pop.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::RunNotLive`] when the run left the live state
    /// between validation and the counter write, or a store failure
    /// (including a conflict when a concurrent trigger won the same pop
    /// number).
    pub fn trigger(&self, run: &Run, window_secs: u32) -> Result<PopOutcome, RunError> {
        if run.key_pop_count > 0 {
            self.engine.settle_best_effort(run, run.key_pop_count);
        }

        let now_ms = self.clock.now_ms();
        let next_pop = run.key_pop_count + 1;
        let snapshot = KeyPopSnapshot {
            run_id: run.run_id.clone(),
            pop_number: next_pop,
            user_ids: self.store.joined_users(&run.run_id)?,
            captured_at_ms: now_ms,
        };
        if !self.store.insert_snapshot(&snapshot)? {
            // A concurrent trigger captured this pop number first.
            return Err(RunError::Store(StoreError::Conflict {
                key: format!("snapshot {}/{next_pop}", run.run_id),
            }));
        }

        let window_ends_at_ms = now_ms + u64::from(window_secs) * 1_000;
        let mut updated = run.clone();
        updated.key_pop_count = next_pop;
        updated.key_window_ends_at_ms = Some(window_ends_at_ms);
        if !self
            .store
            .update_run_guarded(&updated, RunStatus::Live, run.key_pop_count)?
        {
            // The run left Live (or another pop landed) between our
            // validation read and the counter write.
            return Err(RunError::RunNotLive);
        }

        tracing::info!(
            run_id = %run.run_id,
            pop_number = next_pop,
            window_ends_at_ms,
            participants = snapshot.user_ids.len(),
            "key pop triggered"
        );
        Ok(PopOutcome {
            pop_number: next_pop,
            window_ends_at_ms,
        })
    }
}
