//! Run lifecycle operation surface.
//!
//! `RunLifecycle` ties the gate, roster, pop coordinator, and attribution
//! engine together and exposes the synchronous operations the calling
//! boundary dispatches to. Every operation follows the same shape: load the
//! run, authorize the actor for this specific action, validate the
//! transition, then write through the store's guarded compare-and-set so the
//! status is re-checked at the moment of write.
//!
//! # Authorization policies per action
//!
//! | Operation        | Accepted actors                                |
//! |------------------|------------------------------------------------|
//! | `create`         | Organizer rank or higher                       |
//! | `start`          | run organizer, or Organizer rank or higher     |
//! | `end` / `cancel` | run organizer, or Organizer rank or higher     |
//! | `update_details` | run organizer, or Organizer rank or higher     |
//! | roster ops       | Verified rank or higher (self-service)         |
//! | `trigger_pop`    | run organizer only                             |
//! | `end_expired`    | [`ExpiryBypass`] holder (host wiring only)     |

use std::sync::Arc;

use crate::authz::{
    ActorContext, ExpiryBypass, Forbidden, RequiredAuthority, RoleMap, RoleMapSource, RoleRank,
    RunActorPolicy, authorize_run_actor, has_role_or_higher,
};
use crate::clock::Clock;
use crate::ids::RunId;
use crate::keypop::{KeyPopCoordinator, PopOutcome};
use crate::roster::ParticipantRoster;
use crate::run::error::RunError;
use crate::run::state::{CloseReason, CreateRun, Run, RunDetails, RunStatus};
use crate::settlement::{AttributionEngine, PointsResolver};
use crate::store::{AttributionStore, RosterStore, RunStore, StoreError};

/// Bound on guarded-write retries for terminal closes. A close only loses
/// its compare-and-set to a concurrent pop or a racing close; one re-read is
/// normally enough.
const CLOSE_ATTEMPTS: usize = 3;

/// The run state machine and its operation surface.
pub struct RunLifecycle<S> {
    store: Arc<S>,
    roles: Arc<dyn RoleMapSource>,
    clock: Arc<dyn Clock>,
    roster: ParticipantRoster<S>,
    keypop: KeyPopCoordinator<S>,
    engine: Arc<AttributionEngine<S>>,
}

impl<S: RunStore + RosterStore + AttributionStore> RunLifecycle<S> {
    /// Wires a lifecycle over `store` with the injected role lookup, point
    /// resolver, and clock.
    pub fn new(
        store: Arc<S>,
        roles: Arc<dyn RoleMapSource>,
        resolver: Arc<dyn PointsResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = Arc::new(AttributionEngine::new(
            Arc::clone(&store),
            resolver,
            Arc::clone(&clock),
        ));
        let roster = ParticipantRoster::new(Arc::clone(&store), Arc::clone(&clock));
        let keypop = KeyPopCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&engine),
            Arc::clone(&clock),
        );
        Self {
            store,
            roles,
            clock,
            roster,
            keypop,
            engine,
        }
    }

    /// Read access to the roster component for boundary queries.
    pub fn roster(&self) -> &ParticipantRoster<S> {
        &self.roster
    }

    /// Creates a run in `Open`, organized by the acting user.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` unless the actor holds the Organizer rank or
    /// higher in the target guild, or a store failure.
    pub fn create(&self, actor: &ActorContext, params: CreateRun) -> Result<Run, RunError> {
        let map = self.role_map(&params.guild_id);
        if !has_role_or_higher(&map, actor, RoleRank::Organizer) {
            return Err(Forbidden {
                required: RequiredAuthority::Rank(RoleRank::Organizer),
            }
            .into());
        }

        let run = Run {
            run_id: RunId::generate(),
            guild_id: params.guild_id,
            organizer_id: actor.user_id.clone(),
            activity_key: params.activity_key,
            status: RunStatus::Open,
            key_pop_count: 0,
            key_window_ends_at_ms: None,
            chain_amount: params.chain_amount,
            party: params.party,
            location: params.location,
            description: params.description,
            auto_end_minutes: params.auto_end_minutes,
            created_at_ms: self.clock.now_ms(),
            started_at_ms: None,
            ended_at_ms: None,
        };
        self.store.insert_run(&run)?;
        tracing::info!(
            run_id = %run.run_id,
            guild_id = %run.guild_id,
            organizer_id = %run.organizer_id,
            activity_key = %run.activity_key,
            "run created"
        );
        Ok(run)
    }

    /// Loads a run by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or a store failure.
    pub fn get(&self, run_id: &RunId) -> Result<Run, RunError> {
        self.load(run_id)
    }

    /// Starts an open run: `Open -> Live`, setting `started_at` once.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for any non-open run, `Forbidden` for
    /// unauthorized actors, `NotFound`, or a store failure.
    pub fn start(&self, run_id: &RunId, actor: &ActorContext) -> Result<Run, RunError> {
        let run = self.load(run_id)?;
        let map = self.role_map(&run.guild_id);
        authorize_run_actor(&run, &map, actor, RunActorPolicy::organizer_or_staff())?;

        if run.status != RunStatus::Open {
            return Err(RunError::InvalidTransition {
                from: run.status,
                to: RunStatus::Live,
            });
        }

        let mut updated = run.clone();
        updated.status = RunStatus::Live;
        updated.started_at_ms = Some(self.clock.now_ms());
        if !self
            .store
            .update_run_guarded(&updated, RunStatus::Open, run.key_pop_count)?
        {
            let current = self.load(run_id)?;
            return Err(RunError::InvalidTransition {
                from: current.status,
                to: RunStatus::Live,
            });
        }
        tracing::info!(run_id = %run.run_id, "run started");
        Ok(updated)
    }

    /// Ends a live run: `Live -> Ended`, settling outstanding credit first.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyTerminal` if the run has ended, `InvalidTransition`
    /// if it never went live (use [`cancel`](Self::cancel)), `Forbidden`,
    /// `NotFound`, or a store failure.
    pub fn end(&self, run_id: &RunId, actor: &ActorContext) -> Result<Run, RunError> {
        let run = self.load(run_id)?;
        if run.status.is_terminal() {
            return Err(RunError::AlreadyTerminal);
        }
        let map = self.role_map(&run.guild_id);
        authorize_run_actor(&run, &map, actor, RunActorPolicy::organizer_or_staff())?;
        self.close(run_id, true, CloseReason::Completed)
    }

    /// Cancels a run from `Open` or `Live`. A cancelled run is an `Ended`
    /// run that was never live; outstanding credit is still settled so
    /// participants of an aborted run keep what they cleared.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyTerminal` if the run has ended, `Forbidden`,
    /// `NotFound`, or a store failure.
    pub fn cancel(&self, run_id: &RunId, actor: &ActorContext) -> Result<Run, RunError> {
        let run = self.load(run_id)?;
        if run.status.is_terminal() {
            return Err(RunError::AlreadyTerminal);
        }
        let map = self.role_map(&run.guild_id);
        authorize_run_actor(&run, &map, actor, RunActorPolicy::organizer_or_staff())?;
        self.close(run_id, false, CloseReason::Cancelled)
    }

    /// Trusted system close for runs past their configured duration.
    ///
    /// This is the only any-state close path. The [`ExpiryBypass`] token is
    /// the capability: it exists only where host wiring placed it, so no
    /// boundary request can reach this method. Callers treat
    /// `AlreadyTerminal` as a no-op, since the sweep regularly races manual
    /// closes.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyTerminal` when a manual close won the race,
    /// `NotFound`, or a store failure.
    pub fn end_expired(
        &self,
        run_id: &RunId,
        _bypass: &ExpiryBypass,
    ) -> Result<Run, RunError> {
        let run = self.load(run_id)?;
        if run.status.is_terminal() {
            return Err(RunError::AlreadyTerminal);
        }
        self.close(run_id, false, CloseReason::Expired)
    }

    /// Edits the display-only run fields. `Some` fields replace the stored
    /// value; `None` fields are left unchanged.
    ///
    /// # Errors
    ///
    /// Returns `RunClosed` for ended runs, `Forbidden`, `NotFound`, or a
    /// store failure.
    pub fn update_details(
        &self,
        run_id: &RunId,
        actor: &ActorContext,
        details: RunDetails,
    ) -> Result<Run, RunError> {
        let run = self.load(run_id)?;
        if run.status.is_terminal() {
            return Err(RunError::RunClosed);
        }
        let map = self.role_map(&run.guild_id);
        authorize_run_actor(&run, &map, actor, RunActorPolicy::organizer_or_staff())?;

        let mut updated = run.clone();
        if let Some(chain_amount) = details.chain_amount {
            updated.chain_amount = Some(chain_amount);
        }
        if let Some(party) = details.party {
            updated.party = Some(party);
        }
        if let Some(location) = details.location {
            updated.location = Some(location);
        }
        if let Some(description) = details.description {
            updated.description = Some(description);
        }

        if !self
            .store
            .update_run_guarded(&updated, run.status, run.key_pop_count)?
        {
            let current = self.load(run_id)?;
            if current.status.is_terminal() {
                return Err(RunError::RunClosed);
            }
            return Err(RunError::Store(StoreError::Conflict {
                key: format!("run {run_id} details"),
            }));
        }
        Ok(updated)
    }

    /// Joins the acting user to the run.
    ///
    /// # Errors
    ///
    /// Returns `RunClosed` for ended runs, `Forbidden` below the Verified
    /// rank, `NotFound`, or a store failure.
    pub fn join(&self, run_id: &RunId, actor: &ActorContext) -> Result<(), RunError> {
        let run = self.load(run_id)?;
        self.authorize_participant(&run, actor)?;
        self.roster.join(&run, &actor.user_id)
    }

    /// Marks the acting user as having left the run.
    ///
    /// # Errors
    ///
    /// Returns `RunClosed` for ended runs, `Forbidden` below the Verified
    /// rank, `NotFound`, or a store failure.
    pub fn leave(&self, run_id: &RunId, actor: &ActorContext) -> Result<(), RunError> {
        let run = self.load(run_id)?;
        self.authorize_participant(&run, actor)?;
        self.roster.leave(&run, &actor.user_id)
    }

    /// Sets the acting user's attribute label, joining them implicitly.
    ///
    /// # Errors
    ///
    /// Returns `RunClosed` for ended runs, `Forbidden` below the Verified
    /// rank, `NotFound`, or a store failure.
    pub fn set_attribute(
        &self,
        run_id: &RunId,
        actor: &ActorContext,
        label: &str,
    ) -> Result<(), RunError> {
        let run = self.load(run_id)?;
        self.authorize_participant(&run, actor)?;
        self.roster.set_attribute(&run, &actor.user_id, label)
    }

    /// Flips the acting user's offer flag and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns `RunClosed` for ended runs, `Forbidden` below the Verified
    /// rank, `NotFound`, or a store failure.
    pub fn toggle_offer(
        &self,
        run_id: &RunId,
        actor: &ActorContext,
        offer_type: &str,
    ) -> Result<bool, RunError> {
        let run = self.load(run_id)?;
        self.authorize_participant(&run, actor)?;
        self.roster.toggle_offer(&run, &actor.user_id, offer_type)
    }

    /// Triggers the next key pop, opening a window of `window_secs`.
    ///
    /// Settlement of the previous pop is attempted strictly before the new
    /// snapshot is captured; its failures are logged, never surfaced.
    ///
    /// # Errors
    ///
    /// Returns `NotOrganizer` unless the actor is the run's organizer,
    /// `RunNotLive` outside the live state, `NotFound`, or a store failure.
    pub fn trigger_pop(
        &self,
        run_id: &RunId,
        actor: &ActorContext,
        window_secs: u32,
    ) -> Result<PopOutcome, RunError> {
        let run = self.load(run_id)?;
        if actor.user_id != run.organizer_id {
            return Err(RunError::NotOrganizer);
        }
        if run.status != RunStatus::Live {
            return Err(RunError::RunNotLive);
        }
        self.keypop.trigger(&run, window_secs)
    }

    /// Runs past their configured duration, for the expiry sweep.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub fn list_expired(&self, now_ms: u64) -> Result<Vec<Run>, RunError> {
        Ok(self.store.list_expired(now_ms)?)
    }

    /// Non-ended runs in a guild, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub fn list_active(&self, guild_id: &str) -> Result<Vec<Run>, RunError> {
        Ok(self.store.list_active(guild_id)?)
    }

    fn role_map(&self, guild_id: &str) -> RoleMap {
        self.roles.role_map(guild_id).unwrap_or_default()
    }

    fn load(&self, run_id: &RunId) -> Result<Run, RunError> {
        self.store.get_run(run_id)?.ok_or_else(|| RunError::NotFound {
            run_id: run_id.clone(),
        })
    }

    fn authorize_participant(&self, run: &Run, actor: &ActorContext) -> Result<(), RunError> {
        let map = self.role_map(&run.guild_id);
        if has_role_or_higher(&map, actor, RoleRank::Verified) {
            Ok(())
        } else {
            Err(Forbidden {
                required: RequiredAuthority::Rank(RoleRank::Verified),
            }
            .into())
        }
    }

    /// Terminal close shared by `end`, `cancel`, and `end_expired`.
    ///
    /// Finalizes credit and records the organizer close event before the
    /// status write; both are idempotent and absorbed, so whichever racing
    /// close loses the compare-and-set has already been made harmless.
    fn close(
        &self,
        run_id: &RunId,
        require_live: bool,
        reason: CloseReason,
    ) -> Result<Run, RunError> {
        for _ in 0..CLOSE_ATTEMPTS {
            let run = self.load(run_id)?;
            if run.status.is_terminal() {
                return Err(RunError::AlreadyTerminal);
            }
            if require_live && run.status != RunStatus::Live {
                return Err(RunError::InvalidTransition {
                    from: run.status,
                    to: RunStatus::Ended,
                });
            }

            let credited = self.engine.finalize(&run);
            self.engine.record_run_closed(&run, reason);

            let mut updated = run.clone();
            updated.status = RunStatus::Ended;
            updated.ended_at_ms = Some(self.clock.now_ms());
            if self
                .store
                .update_run_guarded(&updated, run.status, run.key_pop_count)?
            {
                tracing::info!(
                    run_id = %run.run_id,
                    reason = reason.as_str(),
                    credited,
                    key_pop_count = run.key_pop_count,
                    "run closed"
                );
                return Ok(updated);
            }
            // Lost the write to a concurrent pop or close; re-read and
            // re-evaluate from scratch.
        }
        Err(RunError::Store(StoreError::Conflict {
            key: format!("run {run_id} close"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::settlement::PointsResolver;
    use crate::store::memory::MemoryStore;

    struct StaticRoles(RoleMap);

    impl RoleMapSource for StaticRoles {
        fn role_map(&self, _guild_id: &str) -> Option<RoleMap> {
            Some(self.0.clone())
        }
    }

    struct TenPoints;

    impl PointsResolver for TenPoints {
        fn points_for(&self, _guild_id: &str, _activity_key: &str, _user_id: &str) -> u32 {
            10
        }
    }

    fn lifecycle() -> (RunLifecycle<MemoryStore>, Arc<MemoryStore>, Arc<FixedClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(1_000_000));
        let roles = StaticRoles(
            RoleMap::new()
                .with_rank(RoleRank::Verified, "role-verified")
                .with_rank(RoleRank::Organizer, "role-organizer")
                .with_rank(RoleRank::Administrator, "role-admin"),
        );
        let lifecycle = RunLifecycle::new(
            Arc::clone(&store),
            Arc::new(roles),
            Arc::new(TenPoints),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (lifecycle, store, clock)
    }

    fn organizer() -> ActorContext {
        ActorContext::new("org-user", ["role-organizer", "role-verified"])
    }

    fn member(user_id: &str) -> ActorContext {
        ActorContext::new(user_id, ["role-verified"])
    }

    fn params() -> CreateRun {
        CreateRun {
            guild_id: "g1".into(),
            activity_key: "vault".into(),
            chain_amount: Some(6),
            party: None,
            location: None,
            description: None,
            auto_end_minutes: 120,
        }
    }

    #[test]
    fn test_create_requires_organizer_rank() {
        let (lifecycle, _store, _clock) = lifecycle();
        let err = lifecycle.create(&member("pleb"), params()).unwrap_err();
        assert!(matches!(err, RunError::Forbidden(_)));

        let run = lifecycle.create(&organizer(), params()).unwrap();
        assert_eq!(run.status, RunStatus::Open);
        assert_eq!(run.organizer_id, "org-user");
        assert_eq!(run.created_at_ms, 1_000_000);
    }

    #[test]
    fn test_start_sets_started_at_once() {
        let (lifecycle, _store, clock) = lifecycle();
        let run = lifecycle.create(&organizer(), params()).unwrap();
        clock.advance(5_000);

        let live = lifecycle.start(&run.run_id, &organizer()).unwrap();
        assert_eq!(live.status, RunStatus::Live);
        assert_eq!(live.started_at_ms, Some(1_005_000));

        let err = lifecycle.start(&run.run_id, &organizer()).unwrap_err();
        assert!(matches!(
            err,
            RunError::InvalidTransition {
                from: RunStatus::Live,
                to: RunStatus::Live,
            }
        ));
    }

    #[test]
    fn test_staff_may_start_someone_elses_run() {
        let (lifecycle, _store, _clock) = lifecycle();
        let run = lifecycle.create(&organizer(), params()).unwrap();
        let staff = ActorContext::new("staff", ["role-admin"]);
        assert!(lifecycle.start(&run.run_id, &staff).is_ok());
    }

    #[test]
    fn test_end_requires_live() {
        let (lifecycle, _store, _clock) = lifecycle();
        let run = lifecycle.create(&organizer(), params()).unwrap();
        let err = lifecycle.end(&run.run_id, &organizer()).unwrap_err();
        assert!(matches!(
            err,
            RunError::InvalidTransition {
                from: RunStatus::Open,
                to: RunStatus::Ended,
            }
        ));
    }

    #[test]
    fn test_end_then_end_is_already_terminal() {
        let (lifecycle, _store, _clock) = lifecycle();
        let run = lifecycle.create(&organizer(), params()).unwrap();
        lifecycle.start(&run.run_id, &organizer()).unwrap();
        let ended = lifecycle.end(&run.run_id, &organizer()).unwrap();
        assert_eq!(ended.status, RunStatus::Ended);
        assert!(ended.ended_at_ms.is_some());

        let err = lifecycle.end(&run.run_id, &organizer()).unwrap_err();
        assert!(matches!(err, RunError::AlreadyTerminal));
    }

    #[test]
    fn test_cancel_open_run_never_goes_live() {
        let (lifecycle, _store, _clock) = lifecycle();
        let run = lifecycle.create(&organizer(), params()).unwrap();
        let cancelled = lifecycle.cancel(&run.run_id, &organizer()).unwrap();
        assert_eq!(cancelled.status, RunStatus::Ended);
        assert_eq!(cancelled.started_at_ms, None);

        let err = lifecycle.cancel(&run.run_id, &organizer()).unwrap_err();
        assert!(matches!(err, RunError::AlreadyTerminal));
    }

    #[test]
    fn test_end_expired_closes_from_any_state() {
        let (lifecycle, _store, _clock) = lifecycle();
        let bypass = ExpiryBypass::new();
        let run = lifecycle.create(&organizer(), params()).unwrap();

        let ended = lifecycle.end_expired(&run.run_id, &bypass).unwrap();
        assert_eq!(ended.status, RunStatus::Ended);

        let err = lifecycle.end_expired(&run.run_id, &bypass).unwrap_err();
        assert!(matches!(err, RunError::AlreadyTerminal));
    }

    #[test]
    fn test_roster_ops_gated_on_verified() {
        let (lifecycle, _store, _clock) = lifecycle();
        let run = lifecycle.create(&organizer(), params()).unwrap();

        let stranger = ActorContext::new("stranger", Vec::<String>::new());
        assert!(matches!(
            lifecycle.join(&run.run_id, &stranger),
            Err(RunError::Forbidden(_))
        ));

        lifecycle.join(&run.run_id, &member("alice")).unwrap();
        lifecycle
            .set_attribute(&run.run_id, &member("bob"), "healer")
            .unwrap();
        assert_eq!(lifecycle.roster().joined_count(&run.run_id).unwrap(), 2);
    }

    #[test]
    fn test_trigger_pop_requires_organizer_identity_and_live() {
        let (lifecycle, _store, _clock) = lifecycle();
        let run = lifecycle.create(&organizer(), params()).unwrap();

        // Staff rank does not substitute for organizer identity on pops.
        let staff = ActorContext::new("staff", ["role-admin"]);
        assert!(matches!(
            lifecycle.trigger_pop(&run.run_id, &staff, 60),
            Err(RunError::NotOrganizer)
        ));

        assert!(matches!(
            lifecycle.trigger_pop(&run.run_id, &organizer(), 60),
            Err(RunError::RunNotLive)
        ));

        lifecycle.start(&run.run_id, &organizer()).unwrap();
        let outcome = lifecycle.trigger_pop(&run.run_id, &organizer(), 60).unwrap();
        assert_eq!(outcome.pop_number, 1);
    }

    #[test]
    fn test_update_details_replaces_only_given_fields() {
        let (lifecycle, _store, _clock) = lifecycle();
        let run = lifecycle.create(&organizer(), params()).unwrap();

        let updated = lifecycle
            .update_details(
                &run.run_id,
                &organizer(),
                RunDetails {
                    location: Some("north gate".into()),
                    ..RunDetails::default()
                },
            )
            .unwrap();
        assert_eq!(updated.location.as_deref(), Some("north gate"));
        assert_eq!(updated.chain_amount, Some(6));

        lifecycle.cancel(&run.run_id, &organizer()).unwrap();
        assert!(matches!(
            lifecycle.update_details(&run.run_id, &organizer(), RunDetails::default()),
            Err(RunError::RunClosed)
        ));
    }

    #[test]
    fn test_unknown_run_is_not_found() {
        let (lifecycle, _store, _clock) = lifecycle();
        let missing = RunId::from_raw("run-missing");
        assert!(matches!(
            lifecycle.get(&missing),
            Err(RunError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_expired_uses_auto_end_minutes() {
        let (lifecycle, _store, clock) = lifecycle();
        let run = lifecycle.create(&organizer(), params()).unwrap();

        assert!(lifecycle.list_expired(clock.now_ms()).unwrap().is_empty());
        clock.advance(120 * 60_000);
        let expired = lifecycle.list_expired(clock.now_ms()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].run_id, run.run_id);
    }
}
