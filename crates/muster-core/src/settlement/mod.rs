//! Completion credit settlement for key-pop snapshots.
//!
//! # Key Concepts
//!
//! - **Settlement**: crediting every user in a pop's snapshot exactly once.
//!   The write-once [`SettlementRecord`] is the idempotency guard; the store
//!   applies record, per-user credits, and the aggregate organizer event as
//!   one all-or-nothing unit.
//! - **Fallback**: a run that ends with no pop ever triggered credits its
//!   currently joined participants once, under the reserved pop number
//!   [`FALLBACK_POP_NUMBER`], so organizers of pop-less content are not
//!   penalized by the snapshot mechanism.
//! - **Failure policy**: persistence failures in this engine are caught and
//!   logged here, never surfaced. Run control stays available when the
//!   reward subsystem is degraded; the cost is a missed credit, not a failed
//!   player-facing operation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::clock::Clock;
use crate::ids::RunId;
use crate::keypop::KeyPopSnapshot;
use crate::run::state::{CloseReason, Run};
use crate::store::{AttributionStore, RosterStore, StoreError};

/// Reserved pop number for the pop-less fallback settlement.
pub const FALLBACK_POP_NUMBER: u32 = 0;

/// Write-once marker that a snapshot's credit has been distributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Run the settlement belongs to.
    pub run_id: RunId,
    /// Pop number settled; `0` is the fallback settlement.
    pub pop_number: u32,
    /// When the settlement was written.
    pub settled_at_ms: u64,
}

/// One user's credit for one settled pop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditEntry {
    /// Run the credit belongs to.
    pub run_id: RunId,
    /// Pop number the credit was earned under.
    pub pop_number: u32,
    /// Credited user.
    pub user_id: String,
    /// Points awarded.
    pub points: u32,
    /// When the credit was written.
    pub settled_at_ms: u64,
}

/// Aggregate event attributed to the run's organizer.
///
/// Emitted once per settled pop and once per run close. The deterministic
/// `event_id` makes the append idempotent under the manual/auto close race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizerCreditEvent {
    /// Deterministic identifier, e.g. `evt-{run_id}-pop-3`.
    pub event_id: String,
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Pop number for settlement events; `None` for run-close events.
    pub pop_number: Option<u32>,
    /// Organizer the event is attributed to.
    pub organizer_id: String,
    /// Stable event type: `pop_settled` or `run_closed`.
    pub event_type: String,
    /// JSON payload with event-type-specific detail.
    pub payload: serde_json::Value,
    /// When the event was written.
    pub created_at_ms: u64,
}

/// Injected point-value policy.
///
/// The formula and any role-based overrides are configuration-driven and
/// external; implementations may consult their own member/role sources keyed
/// by `user_id`. Must be pure per (guild, activity, user) within one
/// settlement pass.
pub trait PointsResolver: Send + Sync {
    /// Resolves the completion point value for one credited user.
    fn points_for(&self, guild_id: &str, activity_key: &str, user_id: &str) -> u32;
}

/// Settlement engine over an attribution-capable store.
pub struct AttributionEngine<S> {
    store: Arc<S>,
    resolver: Arc<dyn PointsResolver>,
    clock: Arc<dyn Clock>,
}

impl<S: AttributionStore + RosterStore> AttributionEngine<S> {
    /// Creates an engine over `store` with the injected point resolver.
    pub fn new(store: Arc<S>, resolver: Arc<dyn PointsResolver>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            resolver,
            clock,
        }
    }

    /// Settles pop `pop_number` of `run`, crediting every user in its
    /// snapshot exactly once. Returns the number of users credited; `0` when
    /// the pop was already settled (or lost the settle race).
    ///
    /// # Errors
    ///
    /// Returns a store failure, including [`StoreError::SnapshotMissing`]
    /// when no snapshot exists for the pop.
    pub fn settle(&self, run: &Run, pop_number: u32) -> Result<u32, StoreError> {
        if self.store.settlement_exists(&run.run_id, pop_number)? {
            return Ok(0);
        }
        let snapshot = self
            .store
            .get_snapshot(&run.run_id, pop_number)?
            .ok_or_else(|| StoreError::SnapshotMissing {
                run_id: run.run_id.clone(),
                pop_number,
            })?;

        let now_ms = self.clock.now_ms();
        let mut points_total: u64 = 0;
        let credits: Vec<CreditEntry> = snapshot
            .user_ids
            .iter()
            .map(|user_id| {
                let points =
                    self.resolver
                        .points_for(&run.guild_id, &run.activity_key, user_id);
                points_total += u64::from(points);
                CreditEntry {
                    run_id: run.run_id.clone(),
                    pop_number,
                    user_id: user_id.clone(),
                    points,
                    settled_at_ms: now_ms,
                }
            })
            .collect();

        let event = OrganizerCreditEvent {
            event_id: format!("evt-{}-pop-{pop_number}", run.run_id),
            run_id: run.run_id.clone(),
            pop_number: Some(pop_number),
            organizer_id: run.organizer_id.clone(),
            event_type: "pop_settled".to_string(),
            payload: json!({
                "pop_number": pop_number,
                "credited": credits.len(),
                "points_total": points_total,
            }),
            created_at_ms: now_ms,
        };
        let record = SettlementRecord {
            run_id: run.run_id.clone(),
            pop_number,
            settled_at_ms: now_ms,
        };

        let credited = u32::try_from(credits.len()).unwrap_or(u32::MAX);
        if self.store.settle_once(&record, &credits, &event)? {
            tracing::info!(
                run_id = %run.run_id,
                pop_number,
                credited,
                points_total,
                "settled key pop snapshot"
            );
            Ok(credited)
        } else {
            Ok(0)
        }
    }

    /// [`settle`](Self::settle) with the engine's absorbed-failure policy:
    /// errors are logged and reported as zero credits.
    pub fn settle_best_effort(&self, run: &Run, pop_number: u32) -> u32 {
        match self.settle(run, pop_number) {
            Ok(credited) => credited,
            Err(err) => {
                tracing::error!(
                    run_id = %run.run_id,
                    pop_number,
                    error = %err,
                    "pop settlement failed; run control continues uncredited"
                );
                0
            },
        }
    }

    /// Final settlement pass on transition into the terminal state.
    ///
    /// Settles the still-open last pop, or runs the pop-less fallback when no
    /// pop was ever triggered. Failures are absorbed per the engine's policy;
    /// the run's status write must never be blocked from here.
    pub fn finalize(&self, run: &Run) -> u32 {
        if run.key_pop_count > 0 {
            return self.settle_best_effort(run, run.key_pop_count);
        }
        match self.settle_fallback(run) {
            Ok(credited) => credited,
            Err(err) => {
                tracing::error!(
                    run_id = %run.run_id,
                    error = %err,
                    "fallback settlement failed; run close proceeds uncredited"
                );
                0
            },
        }
    }

    /// Appends the organizer's run-close credit event, independent of any
    /// participant credit. Failures are absorbed.
    pub fn record_run_closed(&self, run: &Run, reason: CloseReason) {
        let event = OrganizerCreditEvent {
            event_id: format!("evt-{}-run-closed", run.run_id),
            run_id: run.run_id.clone(),
            pop_number: None,
            organizer_id: run.organizer_id.clone(),
            event_type: "run_closed".to_string(),
            payload: json!({
                "reason": reason.as_str(),
                "key_pop_count": run.key_pop_count,
            }),
            created_at_ms: self.clock.now_ms(),
        };
        match self.store.append_organizer_event(&event) {
            Ok(true) => {},
            Ok(false) => {
                tracing::debug!(
                    run_id = %run.run_id,
                    "run-close event already recorded by a racing close"
                );
            },
            Err(err) => {
                tracing::error!(
                    run_id = %run.run_id,
                    error = %err,
                    "failed to record run-close organizer event"
                );
            },
        }
    }

    /// Credits every currently joined participant once, under the reserved
    /// fallback pop number, via a synthetic snapshot.
    fn settle_fallback(&self, run: &Run) -> Result<u32, StoreError> {
        if self
            .store
            .settlement_exists(&run.run_id, FALLBACK_POP_NUMBER)?
        {
            return Ok(0);
        }
        let snapshot = KeyPopSnapshot {
            run_id: run.run_id.clone(),
            pop_number: FALLBACK_POP_NUMBER,
            user_ids: self.store.joined_users(&run.run_id)?,
            captured_at_ms: self.clock.now_ms(),
        };
        // A racing close may have inserted the fallback snapshot first; the
        // stored set wins and the settle guard keeps credit exactly-once.
        self.store.insert_snapshot(&snapshot)?;
        self.settle(run, FALLBACK_POP_NUMBER)
    }
}
