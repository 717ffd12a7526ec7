//! In-memory store implementing the storage contracts.
//!
//! Deterministic and fast but not durable; intended for unit tests of the
//! engine components and as the reference behavior for durable backends. A
//! single state mutex makes every trait method one atomic unit, matching the
//! per-run serialization the SQLite backend gets from its connection lock
//! and immediate transactions.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{AttributionStore, RosterStore, RunStore, StoreError};
use crate::ids::RunId;
use crate::keypop::KeyPopSnapshot;
use crate::roster::{ParticipantEntry, ParticipantState};
use crate::run::state::{Run, RunStatus};
use crate::settlement::{CreditEntry, OrganizerCreditEvent, SettlementRecord};

#[derive(Debug, Default)]
struct MemoryState {
    runs: BTreeMap<RunId, Run>,
    participants: BTreeMap<(RunId, String), ParticipantEntry>,
    offers: BTreeMap<(RunId, String, String), bool>,
    snapshots: BTreeMap<(RunId, u32), KeyPopSnapshot>,
    settlements: BTreeMap<(RunId, u32), SettlementRecord>,
    credits: Vec<CreditEntry>,
    events: Vec<OrganizerCreditEvent>,
}

impl MemoryState {
    /// True when the run exists and has not ended.
    fn run_accepts_writes(&self, run_id: &RunId) -> bool {
        self.runs
            .get(run_id)
            .is_some_and(|run| !run.status.is_terminal())
    }
}

/// In-memory store for unit tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl RunStore for MemoryStore {
    fn insert_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.runs.contains_key(&run.run_id) {
            return Err(StoreError::Conflict {
                key: format!("run {}", run.run_id),
            });
        }
        state.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn get_run(&self, run_id: &RunId) -> Result<Option<Run>, StoreError> {
        Ok(self.lock()?.runs.get(run_id).cloned())
    }

    fn update_run_guarded(
        &self,
        run: &Run,
        expected_status: RunStatus,
        expected_pop_count: u32,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.runs.get(&run.run_id) {
            Some(stored)
                if stored.status == expected_status
                    && stored.key_pop_count == expected_pop_count =>
            {
                state.runs.insert(run.run_id.clone(), run.clone());
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    fn list_expired(&self, now_ms: u64) -> Result<Vec<Run>, StoreError> {
        let state = self.lock()?;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|run| !run.status.is_terminal() && run.expires_at_ms() <= now_ms)
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.created_at_ms);
        Ok(runs)
    }

    fn list_active(&self, guild_id: &str) -> Result<Vec<Run>, StoreError> {
        let state = self.lock()?;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|run| !run.status.is_terminal() && run.guild_id == guild_id)
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.created_at_ms);
        Ok(runs)
    }
}

impl RosterStore for MemoryStore {
    fn upsert_joined(
        &self,
        run_id: &RunId,
        user_id: &str,
        attribute: Option<&str>,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if !state.run_accepts_writes(run_id) {
            return Ok(false);
        }
        let key = (run_id.clone(), user_id.to_string());
        let entry = state
            .participants
            .entry(key)
            .or_insert_with(|| ParticipantEntry {
                run_id: run_id.clone(),
                user_id: user_id.to_string(),
                state: ParticipantState::Joined,
                attribute: None,
                updated_at_ms: now_ms,
            });
        entry.state = ParticipantState::Joined;
        if let Some(label) = attribute {
            entry.attribute = Some(label.to_string());
        }
        entry.updated_at_ms = now_ms;
        Ok(true)
    }

    fn mark_left(&self, run_id: &RunId, user_id: &str, now_ms: u64) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if !state.run_accepts_writes(run_id) {
            return Ok(false);
        }
        if let Some(entry) = state
            .participants
            .get_mut(&(run_id.clone(), user_id.to_string()))
        {
            entry.state = ParticipantState::Left;
            entry.updated_at_ms = now_ms;
        }
        Ok(true)
    }

    fn toggle_offer(
        &self,
        run_id: &RunId,
        user_id: &str,
        offer_type: &str,
    ) -> Result<Option<bool>, StoreError> {
        let mut state = self.lock()?;
        if !state.run_accepts_writes(run_id) {
            return Ok(None);
        }
        let flag = state
            .offers
            .entry((run_id.clone(), user_id.to_string(), offer_type.to_string()))
            .or_insert(false);
        *flag = !*flag;
        Ok(Some(*flag))
    }

    fn get_participant(
        &self,
        run_id: &RunId,
        user_id: &str,
    ) -> Result<Option<ParticipantEntry>, StoreError> {
        Ok(self
            .lock()?
            .participants
            .get(&(run_id.clone(), user_id.to_string()))
            .cloned())
    }

    fn joined_users(&self, run_id: &RunId) -> Result<Vec<String>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .participants
            .values()
            .filter(|entry| entry.run_id == *run_id && entry.state == ParticipantState::Joined)
            .map(|entry| entry.user_id.clone())
            .collect())
    }

    fn counts_by_attribute(
        &self,
        run_id: &RunId,
    ) -> Result<BTreeMap<String, u32>, StoreError> {
        let state = self.lock()?;
        let mut counts = BTreeMap::new();
        for entry in state.participants.values() {
            if entry.run_id == *run_id && entry.state == ParticipantState::Joined {
                if let Some(label) = &entry.attribute {
                    *counts.entry(label.clone()).or_insert(0u32) += 1;
                }
            }
        }
        Ok(counts)
    }

    fn users_by_offer(
        &self,
        run_id: &RunId,
    ) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        let state = self.lock()?;
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for ((entry_run, user_id, offer_type), set) in &state.offers {
            if entry_run == run_id && *set {
                grouped
                    .entry(offer_type.clone())
                    .or_default()
                    .push(user_id.clone());
            }
        }
        Ok(grouped)
    }
}

impl AttributionStore for MemoryStore {
    fn insert_snapshot(&self, snapshot: &KeyPopSnapshot) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let key = (snapshot.run_id.clone(), snapshot.pop_number);
        if state.snapshots.contains_key(&key) {
            return Ok(false);
        }
        state.snapshots.insert(key, snapshot.clone());
        Ok(true)
    }

    fn get_snapshot(
        &self,
        run_id: &RunId,
        pop_number: u32,
    ) -> Result<Option<KeyPopSnapshot>, StoreError> {
        Ok(self
            .lock()?
            .snapshots
            .get(&(run_id.clone(), pop_number))
            .cloned())
    }

    fn settlement_exists(&self, run_id: &RunId, pop_number: u32) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .settlements
            .contains_key(&(run_id.clone(), pop_number)))
    }

    fn settle_once(
        &self,
        record: &SettlementRecord,
        credits: &[CreditEntry],
        event: &OrganizerCreditEvent,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let key = (record.run_id.clone(), record.pop_number);
        if state.settlements.contains_key(&key) {
            return Ok(false);
        }
        state.settlements.insert(key, record.clone());
        state.credits.extend_from_slice(credits);
        state.events.push(event.clone());
        Ok(true)
    }

    fn append_organizer_event(&self, event: &OrganizerCreditEvent) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if state.events.iter().any(|e| e.event_id == event.event_id) {
            return Ok(false);
        }
        state.events.push(event.clone());
        Ok(true)
    }

    fn credits_for_run(&self, run_id: &RunId) -> Result<Vec<CreditEntry>, StoreError> {
        Ok(self
            .lock()?
            .credits
            .iter()
            .filter(|credit| credit.run_id == *run_id)
            .cloned()
            .collect())
    }

    fn organizer_events_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<OrganizerCreditEvent>, StoreError> {
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|event| event.run_id == *run_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(id: &str, status: RunStatus, created_at_ms: u64, auto_end_minutes: u32) -> Run {
        Run {
            run_id: RunId::from_raw(id),
            guild_id: "g1".into(),
            organizer_id: "org".into(),
            activity_key: "vault".into(),
            status,
            key_pop_count: 0,
            key_window_ends_at_ms: None,
            chain_amount: None,
            party: None,
            location: None,
            description: None,
            auto_end_minutes,
            created_at_ms,
            started_at_ms: None,
            ended_at_ms: None,
        }
    }

    #[test]
    fn test_insert_run_rejects_duplicate_id() {
        let store = MemoryStore::new();
        let r = run("run-1", RunStatus::Open, 0, 60);
        store.insert_run(&r).unwrap();
        assert!(matches!(
            store.insert_run(&r),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn test_guarded_write_checks_status() {
        let store = MemoryStore::new();
        let r = run("run-1", RunStatus::Open, 0, 60);
        store.insert_run(&r).unwrap();

        let mut live = r.clone();
        live.status = RunStatus::Live;
        assert!(store.update_run_guarded(&live, RunStatus::Open, 0).unwrap());
        // Second writer holding the stale Open view loses.
        assert!(!store.update_run_guarded(&live, RunStatus::Open, 0).unwrap());
        assert_eq!(
            store.get_run(&r.run_id).unwrap().unwrap().status,
            RunStatus::Live
        );
    }

    #[test]
    fn test_guarded_write_checks_pop_count() {
        let store = MemoryStore::new();
        let mut r = run("run-1", RunStatus::Live, 0, 60);
        store.insert_run(&r).unwrap();

        r.key_pop_count = 1;
        assert!(store.update_run_guarded(&r, RunStatus::Live, 0).unwrap());
        // Stale expected count loses.
        assert!(!store.update_run_guarded(&r, RunStatus::Live, 0).unwrap());

        let mut ended = r.clone();
        ended.status = RunStatus::Ended;
        assert!(store.update_run_guarded(&ended, RunStatus::Live, 1).unwrap());
        // Ended runs accept no further writes under a Live expectation.
        r.key_pop_count = 2;
        assert!(!store.update_run_guarded(&r, RunStatus::Live, 1).unwrap());
    }

    #[test]
    fn test_roster_writes_guarded_by_stored_status() {
        let store = MemoryStore::new();
        let r = run("run-1", RunStatus::Open, 0, 60);
        store.insert_run(&r).unwrap();
        assert!(store.upsert_joined(&r.run_id, "alice", None, 1).unwrap());

        let mut ended = r.clone();
        ended.status = RunStatus::Ended;
        store.update_run_guarded(&ended, RunStatus::Open, 0).unwrap();

        assert!(!store.upsert_joined(&r.run_id, "bob", None, 2).unwrap());
        assert!(!store.mark_left(&r.run_id, "alice", 3).unwrap());
        assert_eq!(store.toggle_offer(&r.run_id, "alice", "key").unwrap(), None);
        // The pre-close roster is untouched.
        assert_eq!(store.joined_users(&r.run_id).unwrap(), ["alice"]);
    }

    #[test]
    fn test_missing_run_accepts_no_roster_writes() {
        let store = MemoryStore::new();
        let id = RunId::from_raw("run-ghost");
        assert!(!store.upsert_joined(&id, "alice", None, 1).unwrap());
    }

    #[test]
    fn test_settle_once_is_write_once() {
        let store = MemoryStore::new();
        let id = RunId::from_raw("run-1");
        let record = SettlementRecord {
            run_id: id.clone(),
            pop_number: 1,
            settled_at_ms: 100,
        };
        let credits = [CreditEntry {
            run_id: id.clone(),
            pop_number: 1,
            user_id: "alice".into(),
            points: 10,
            settled_at_ms: 100,
        }];
        let event = OrganizerCreditEvent {
            event_id: "evt-run-1-pop-1".into(),
            run_id: id.clone(),
            pop_number: Some(1),
            organizer_id: "org".into(),
            event_type: "pop_settled".into(),
            payload: json!({"credited": 1}),
            created_at_ms: 100,
        };

        assert!(store.settle_once(&record, &credits, &event).unwrap());
        assert!(!store.settle_once(&record, &credits, &event).unwrap());
        assert_eq!(store.credits_for_run(&id).unwrap().len(), 1);
        assert_eq!(store.organizer_events_for_run(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_append_organizer_event_dedupes_by_id() {
        let store = MemoryStore::new();
        let id = RunId::from_raw("run-1");
        let event = OrganizerCreditEvent {
            event_id: "evt-run-1-run-closed".into(),
            run_id: id.clone(),
            pop_number: None,
            organizer_id: "org".into(),
            event_type: "run_closed".into(),
            payload: json!({"reason": "completed"}),
            created_at_ms: 100,
        };
        assert!(store.append_organizer_event(&event).unwrap());
        assert!(!store.append_organizer_event(&event).unwrap());
        assert_eq!(store.organizer_events_for_run(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_list_expired_filters_by_age_and_status() {
        let store = MemoryStore::new();
        // Created at 0, expires at 60m.
        store.insert_run(&run("run-old", RunStatus::Open, 0, 60)).unwrap();
        // Created late, not yet expired.
        store
            .insert_run(&run("run-new", RunStatus::Live, 3_000_000, 60))
            .unwrap();
        // Expired but already ended.
        let mut done = run("run-done", RunStatus::Open, 0, 1);
        store.insert_run(&done).unwrap();
        done.status = RunStatus::Ended;
        store.update_run_guarded(&done, RunStatus::Open, 0).unwrap();

        let expired = store.list_expired(3_600_000).unwrap();
        let ids: Vec<&str> = expired.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, ["run-old"]);
    }

    #[test]
    fn test_list_active_scopes_to_guild() {
        let store = MemoryStore::new();
        store.insert_run(&run("run-a", RunStatus::Open, 10, 60)).unwrap();
        let mut other = run("run-b", RunStatus::Open, 20, 60);
        other.guild_id = "g2".into();
        store.insert_run(&other).unwrap();

        let active = store.list_active("g1").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].run_id.as_str(), "run-a");
    }
}
