//! Storage contracts for the run engine.
//!
//! The engine assumes a transactional relational store reached through
//! simple key-based operations. Each trait method is one atomic unit of
//! work; compound guarantees the engine relies on (status re-checks at write
//! time, write-once settlement) are part of the method contracts rather than
//! left to callers, so every backend provides the same race behavior.
//!
//! # Contracts
//!
//! - The conditional run write (`update_run_guarded`) compare-and-sets
//!   against the stored row's `(status, key_pop_count)` pair and reports a
//!   lost race as `Ok(false)`, never as a lost update.
//! - Roster writes are guarded: they apply only while the stored run is not
//!   ended and report `Ok(false)` otherwise.
//! - `settle_once` applies the settlement record, the per-user credits, and
//!   the organizer event as one all-or-nothing unit, and is a no-op
//!   returning `Ok(false)` when the record already exists.

pub mod memory;

use std::collections::BTreeMap;

use crate::ids::RunId;
use crate::keypop::KeyPopSnapshot;
use crate::roster::ParticipantEntry;
use crate::run::state::{Run, RunStatus};
use crate::settlement::{CreditEntry, OrganizerCreditEvent, SettlementRecord};

/// Storage failure surfaced to the engine.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Backend-level failure (SQL error, I/O, serialization).
    #[error("store backend failure: {message}")]
    Backend {
        /// Underlying failure detail.
        message: String,
    },

    /// A write-once key was already taken by a concurrent writer.
    #[error("conflicting write for {key}")]
    Conflict {
        /// Human-readable key description.
        key: String,
    },

    /// A settlement referenced a snapshot that does not exist.
    #[error("run {run_id} has no snapshot for pop {pop_number}")]
    SnapshotMissing {
        /// Run whose snapshot is missing.
        run_id: RunId,
        /// The missing pop number.
        pop_number: u32,
    },

    /// Store state lock was poisoned by a panicking writer.
    #[error("store state lock poisoned")]
    LockPoisoned,
}

/// Run row storage.
pub trait RunStore: Send + Sync {
    /// Inserts a new run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the run id already exists.
    fn insert_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Loads a run by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_run(&self, run_id: &RunId) -> Result<Option<Run>, StoreError>;

    /// Conditional write: persists `run`'s mutable fields iff the stored row
    /// still has status `expected_status` and pop count
    /// `expected_pop_count`. Returns `Ok(false)` when either condition no
    /// longer holds — the caller lost a status or pop race and must re-read
    /// before deciding how to proceed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn update_run_guarded(
        &self,
        run: &Run,
        expected_status: RunStatus,
        expected_pop_count: u32,
    ) -> Result<bool, StoreError>;

    /// Lists non-ended runs whose configured duration has elapsed at
    /// `now_ms`, for the expiry sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_expired(&self, now_ms: u64) -> Result<Vec<Run>, StoreError>;

    /// Lists non-ended runs for a guild, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_active(&self, guild_id: &str) -> Result<Vec<Run>, StoreError>;
}

/// Participant and offer storage. All writes re-check the stored run status
/// and return `Ok(false)` when the run has ended.
pub trait RosterStore: Send + Sync {
    /// Upserts the `(run, user)` entry to `Joined`. `attribute` of `None`
    /// preserves any existing label; `Some` replaces it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_joined(
        &self,
        run_id: &RunId,
        user_id: &str,
        attribute: Option<&str>,
        now_ms: u64,
    ) -> Result<bool, StoreError>;

    /// Marks the entry `Left` if it exists; absent entries are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn mark_left(&self, run_id: &RunId, user_id: &str, now_ms: u64) -> Result<bool, StoreError>;

    /// Flips the `(run, user, offer_type)` flag. Returns the new value, or
    /// `Ok(None)` when the run has ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn toggle_offer(
        &self,
        run_id: &RunId,
        user_id: &str,
        offer_type: &str,
    ) -> Result<Option<bool>, StoreError>;

    /// Loads one participant entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_participant(
        &self,
        run_id: &RunId,
        user_id: &str,
    ) -> Result<Option<ParticipantEntry>, StoreError>;

    /// Currently joined user ids, sorted for deterministic snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn joined_users(&self, run_id: &RunId) -> Result<Vec<String>, StoreError>;

    /// Joined-participant counts grouped by attribute label.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn counts_by_attribute(&self, run_id: &RunId)
    -> Result<BTreeMap<String, u32>, StoreError>;

    /// Users with each offer flag set, grouped by offer type, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn users_by_offer(
        &self,
        run_id: &RunId,
    ) -> Result<BTreeMap<String, Vec<String>>, StoreError>;
}

/// Snapshot, settlement, and credit-ledger storage.
pub trait AttributionStore: Send + Sync {
    /// Inserts a snapshot if its `(run, pop)` key is free. Returns
    /// `Ok(false)` when a snapshot already exists; existing snapshots are
    /// never overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn insert_snapshot(&self, snapshot: &KeyPopSnapshot) -> Result<bool, StoreError>;

    /// Loads a snapshot by `(run, pop)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_snapshot(
        &self,
        run_id: &RunId,
        pop_number: u32,
    ) -> Result<Option<KeyPopSnapshot>, StoreError>;

    /// Returns whether a settlement record exists for `(run, pop)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn settlement_exists(&self, run_id: &RunId, pop_number: u32) -> Result<bool, StoreError>;

    /// Atomically writes the settlement record, all credit entries, and the
    /// organizer event — or nothing. Returns `Ok(false)` without writing
    /// anything when the settlement record already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit fails; a failed unit leaves no partial
    /// credit behind.
    fn settle_once(
        &self,
        record: &SettlementRecord,
        credits: &[CreditEntry],
        event: &OrganizerCreditEvent,
    ) -> Result<bool, StoreError>;

    /// Appends an organizer event if its `event_id` is new. Returns
    /// `Ok(false)` for a duplicate id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append_organizer_event(&self, event: &OrganizerCreditEvent) -> Result<bool, StoreError>;

    /// All credit entries for a run, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn credits_for_run(&self, run_id: &RunId) -> Result<Vec<CreditEntry>, StoreError>;

    /// All organizer events for a run, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn organizer_events_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<OrganizerCreditEvent>, StoreError>;
}
