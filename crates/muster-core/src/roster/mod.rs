//! Participant roster for a run.
//!
//! Tracks who is currently joined, per-participant attribute labels (the
//! class or role a participant intends to play), and independent per-offer
//! flags ("I have a key", "I can carry"). Entries are upserted, never
//! hard-deleted: a participant who leaves keeps their row with state `Left`,
//! and only `Joined` rows count as participants.
//!
//! All writes go through the store's run-status-guarded operations so a
//! roster edit racing a terminal close is rejected at the moment of write,
//! not just at request validation time.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::ids::RunId;
use crate::run::error::RunError;
use crate::run::state::Run;
use crate::store::RosterStore;

/// Join state of a roster entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    /// Counts as a participant.
    Joined,
    /// Left the run; row retained for history, not counted.
    Left,
}

impl ParticipantState {
    /// Returns the state as a stable string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Joined => "joined",
            Self::Left => "left",
        }
    }

    /// Parses a state from its stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "joined" => Some(Self::Joined),
            "left" => Some(Self::Left),
            _ => None,
        }
    }
}

/// One participant row, keyed by `(run_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEntry {
    /// Run the entry belongs to.
    pub run_id: RunId,
    /// External user identifier.
    pub user_id: String,
    /// Join state.
    pub state: ParticipantState,
    /// Optional class/offer label chosen by the participant.
    pub attribute: Option<String>,
    /// Last modification timestamp.
    pub updated_at_ms: u64,
}

/// Roster component: join/leave/attribute writes and read-only queries.
pub struct ParticipantRoster<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: RosterStore> ParticipantRoster<S> {
    /// Creates a roster component over `store`.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Joins `user_id` to the run. Idempotent; a repeat join refreshes the
    /// entry without clearing an attribute set earlier.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::RunClosed`] if the run has ended, or a store
    /// failure.
    pub fn join(&self, run: &Run, user_id: &str) -> Result<(), RunError> {
        if run.status.is_terminal() {
            return Err(RunError::RunClosed);
        }
        let applied =
            self.store
                .upsert_joined(&run.run_id, user_id, None, self.clock.now_ms())?;
        if applied { Ok(()) } else { Err(RunError::RunClosed) }
    }

    /// Marks `user_id` as having left. Idempotent; unknown users are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::RunClosed`] if the run has ended, or a store
    /// failure.
    pub fn leave(&self, run: &Run, user_id: &str) -> Result<(), RunError> {
        if run.status.is_terminal() {
            return Err(RunError::RunClosed);
        }
        let applied = self
            .store
            .mark_left(&run.run_id, user_id, self.clock.now_ms())?;
        if applied { Ok(()) } else { Err(RunError::RunClosed) }
    }

    /// Sets the participant's attribute label, joining them implicitly.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::RunClosed`] if the run has ended, or a store
    /// failure.
    pub fn set_attribute(&self, run: &Run, user_id: &str, label: &str) -> Result<(), RunError> {
        if run.status.is_terminal() {
            return Err(RunError::RunClosed);
        }
        let applied = self.store.upsert_joined(
            &run.run_id,
            user_id,
            Some(label),
            self.clock.now_ms(),
        )?;
        if applied { Ok(()) } else { Err(RunError::RunClosed) }
    }

    /// Flips the `(run, user, offer_type)` flag and returns the new value.
    ///
    /// Offers are independent of join state and are not counted as
    /// participation.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::RunClosed`] if the run has ended, or a store
    /// failure.
    pub fn toggle_offer(
        &self,
        run: &Run,
        user_id: &str,
        offer_type: &str,
    ) -> Result<bool, RunError> {
        if run.status.is_terminal() {
            return Err(RunError::RunClosed);
        }
        self.store
            .toggle_offer(&run.run_id, user_id, offer_type)?
            .ok_or(RunError::RunClosed)
    }

    /// Number of currently joined participants.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub fn joined_count(&self, run_id: &RunId) -> Result<u32, RunError> {
        let users = self.store.joined_users(run_id)?;
        Ok(u32::try_from(users.len()).unwrap_or(u32::MAX))
    }

    /// Currently joined user ids, in deterministic order.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub fn joined_users(&self, run_id: &RunId) -> Result<Vec<String>, RunError> {
        Ok(self.store.joined_users(run_id)?)
    }

    /// Joined-participant counts grouped by attribute label.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub fn counts_by_attribute(
        &self,
        run_id: &RunId,
    ) -> Result<BTreeMap<String, u32>, RunError> {
        Ok(self.store.counts_by_attribute(run_id)?)
    }

    /// Users with each offer flag currently set, grouped by offer type.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub fn users_by_offer(
        &self,
        run_id: &RunId,
    ) -> Result<BTreeMap<String, Vec<String>>, RunError> {
        Ok(self.store.users_by_offer(run_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::run::state::RunStatus;
    use crate::store::memory::MemoryStore;
    use crate::store::RunStore;

    fn fixture() -> (ParticipantRoster<MemoryStore>, Arc<MemoryStore>, Run) {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(5_000));
        let run = Run {
            run_id: RunId::from_raw("run-roster"),
            guild_id: "g1".into(),
            organizer_id: "org".into(),
            activity_key: "vault".into(),
            status: RunStatus::Open,
            key_pop_count: 0,
            key_window_ends_at_ms: None,
            chain_amount: None,
            party: None,
            location: None,
            description: None,
            auto_end_minutes: 60,
            created_at_ms: 0,
            started_at_ms: None,
            ended_at_ms: None,
        };
        store.insert_run(&run).unwrap();
        (
            ParticipantRoster::new(Arc::clone(&store), clock),
            store,
            run,
        )
    }

    #[test]
    fn test_join_is_idempotent() {
        let (roster, _store, run) = fixture();
        roster.join(&run, "alice").unwrap();
        roster.join(&run, "alice").unwrap();
        assert_eq!(roster.joined_count(&run.run_id).unwrap(), 1);
    }

    #[test]
    fn test_repeat_join_preserves_attribute() {
        let (roster, _store, run) = fixture();
        roster.set_attribute(&run, "alice", "healer").unwrap();
        roster.join(&run, "alice").unwrap();
        let counts = roster.counts_by_attribute(&run.run_id).unwrap();
        assert_eq!(counts.get("healer"), Some(&1));
    }

    #[test]
    fn test_leave_removes_from_count_but_keeps_entry() {
        let (roster, store, run) = fixture();
        roster.join(&run, "alice").unwrap();
        roster.leave(&run, "alice").unwrap();
        assert_eq!(roster.joined_count(&run.run_id).unwrap(), 0);
        let entry = store.get_participant(&run.run_id, "alice").unwrap().unwrap();
        assert_eq!(entry.state, ParticipantState::Left);
    }

    #[test]
    fn test_leave_unknown_user_is_noop() {
        let (roster, _store, run) = fixture();
        roster.leave(&run, "ghost").unwrap();
        assert_eq!(roster.joined_count(&run.run_id).unwrap(), 0);
    }

    #[test]
    fn test_rejoin_after_leave() {
        let (roster, _store, run) = fixture();
        roster.join(&run, "alice").unwrap();
        roster.leave(&run, "alice").unwrap();
        roster.join(&run, "alice").unwrap();
        assert_eq!(roster.joined_count(&run.run_id).unwrap(), 1);
    }

    #[test]
    fn test_toggle_offer_flips_and_groups() {
        let (roster, _store, run) = fixture();
        assert!(roster.toggle_offer(&run, "alice", "key").unwrap());
        assert!(roster.toggle_offer(&run, "bob", "key").unwrap());
        assert!(!roster.toggle_offer(&run, "alice", "key").unwrap());

        let offers = roster.users_by_offer(&run.run_id).unwrap();
        assert_eq!(offers.get("key").map(Vec::as_slice), Some(&["bob".to_string()][..]));
    }

    #[test]
    fn test_offer_does_not_count_as_participation() {
        let (roster, _store, run) = fixture();
        roster.toggle_offer(&run, "alice", "key").unwrap();
        assert_eq!(roster.joined_count(&run.run_id).unwrap(), 0);
    }

    #[test]
    fn test_writes_rejected_on_ended_run() {
        let (roster, _store, mut run) = fixture();
        run.status = RunStatus::Ended;
        assert!(matches!(roster.join(&run, "alice"), Err(RunError::RunClosed)));
        assert!(matches!(
            roster.set_attribute(&run, "alice", "tank"),
            Err(RunError::RunClosed)
        ));
        assert!(matches!(
            roster.toggle_offer(&run, "alice", "key"),
            Err(RunError::RunClosed)
        ));
    }

    #[test]
    fn test_write_guard_rechecks_persisted_status() {
        // The caller's Run copy is stale: the store already holds the run as
        // ended. The guarded write must still reject.
        let (roster, store, run) = fixture();
        let mut ended = run.clone();
        ended.status = RunStatus::Ended;
        ended.ended_at_ms = Some(9_000);
        assert!(store.update_run_guarded(&ended, RunStatus::Open, 0).unwrap());

        assert!(matches!(roster.join(&run, "alice"), Err(RunError::RunClosed)));
    }
}
