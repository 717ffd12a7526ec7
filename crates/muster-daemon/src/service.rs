//! Boundary-facing service wiring.
//!
//! `RunService` is the surface the command boundary calls: it layers host
//! policy (one active run per organizer) over the core lifecycle and keeps
//! the tracker in step with creates and closes. Everything else delegates
//! straight through.

use std::sync::Arc;

use muster_core::clock::Clock;
use muster_core::keypop::PopOutcome;
use muster_core::store::{AttributionStore, RosterStore, RunStore};
use muster_core::{
    ActorContext, CreateRun, Run, RunDetails, RunError, RunId, RunLifecycle,
};

use crate::tracker::ActiveRunTracker;

/// Failures from the service surface.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The organizer already has an active run in this guild.
    #[error("organizer already has an active run: {run_id}")]
    ActiveRunExists {
        /// The run blocking the create.
        run_id: RunId,
    },

    /// A core lifecycle failure.
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Host service over the core lifecycle.
pub struct RunService<S> {
    lifecycle: Arc<RunLifecycle<S>>,
    tracker: ActiveRunTracker,
    clock: Arc<dyn Clock>,
}

impl<S: RunStore + RosterStore + AttributionStore> RunService<S> {
    /// Wires the service over a lifecycle engine and tracker.
    pub fn new(
        lifecycle: Arc<RunLifecycle<S>>,
        tracker: ActiveRunTracker,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            lifecycle,
            tracker,
            clock,
        }
    }

    /// The underlying lifecycle engine, for wiring the sweeper.
    #[must_use]
    pub fn lifecycle(&self) -> Arc<RunLifecycle<S>> {
        Arc::clone(&self.lifecycle)
    }

    /// Creates a run, enforcing one active run per organizer per guild.
    ///
    /// A tracker hit is re-validated against the store before rejecting:
    /// stale entries (run already closed, e.g. by the sweeper) are released
    /// and the create proceeds.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::ActiveRunExists`] when the organizer's
    /// previous run is still open, or any core failure.
    pub fn create(&self, actor: &ActorContext, params: CreateRun) -> Result<Run, ServiceError> {
        let now_ms = self.clock.now_ms();
        self.tracker.cleanup(now_ms);

        if let Some(existing) = self
            .tracker
            .active_run(&params.guild_id, &actor.user_id, now_ms)
        {
            match self.lifecycle.get(&existing) {
                Ok(run) if !run.status.is_terminal() => {
                    return Err(ServiceError::ActiveRunExists { run_id: existing });
                },
                // Closed or gone: the entry is stale, drop it and proceed.
                Ok(_) | Err(RunError::NotFound { .. }) => {
                    self.tracker
                        .release(&params.guild_id, &actor.user_id, &existing);
                },
                Err(err) => return Err(err.into()),
            }
        }

        let run = self.lifecycle.create(actor, params)?;
        self.tracker
            .claim(&run.guild_id, &run.organizer_id, run.run_id.clone(), now_ms);
        Ok(run)
    }

    /// Starts a run. See [`RunLifecycle::start`].
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn start(&self, run_id: &RunId, actor: &ActorContext) -> Result<Run, ServiceError> {
        Ok(self.lifecycle.start(run_id, actor)?)
    }

    /// Ends a run and releases the organizer's tracker slot.
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn end(&self, run_id: &RunId, actor: &ActorContext) -> Result<Run, ServiceError> {
        let run = self.lifecycle.end(run_id, actor)?;
        self.tracker
            .release(&run.guild_id, &run.organizer_id, &run.run_id);
        Ok(run)
    }

    /// Cancels a run and releases the organizer's tracker slot.
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn cancel(&self, run_id: &RunId, actor: &ActorContext) -> Result<Run, ServiceError> {
        let run = self.lifecycle.cancel(run_id, actor)?;
        self.tracker
            .release(&run.guild_id, &run.organizer_id, &run.run_id);
        Ok(run)
    }

    /// Edits display-only run details. See [`RunLifecycle::update_details`].
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn update_details(
        &self,
        run_id: &RunId,
        actor: &ActorContext,
        details: RunDetails,
    ) -> Result<Run, ServiceError> {
        Ok(self.lifecycle.update_details(run_id, actor, details)?)
    }

    /// Joins the actor to a run.
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn join(&self, run_id: &RunId, actor: &ActorContext) -> Result<(), ServiceError> {
        Ok(self.lifecycle.join(run_id, actor)?)
    }

    /// Marks the actor as having left a run.
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn leave(&self, run_id: &RunId, actor: &ActorContext) -> Result<(), ServiceError> {
        Ok(self.lifecycle.leave(run_id, actor)?)
    }

    /// Sets the actor's attribute label.
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn set_attribute(
        &self,
        run_id: &RunId,
        actor: &ActorContext,
        label: &str,
    ) -> Result<(), ServiceError> {
        Ok(self.lifecycle.set_attribute(run_id, actor, label)?)
    }

    /// Flips the actor's offer flag.
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn toggle_offer(
        &self,
        run_id: &RunId,
        actor: &ActorContext,
        offer_type: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self.lifecycle.toggle_offer(run_id, actor, offer_type)?)
    }

    /// Triggers the next key pop.
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn trigger_pop(
        &self,
        run_id: &RunId,
        actor: &ActorContext,
        window_secs: u32,
    ) -> Result<PopOutcome, ServiceError> {
        Ok(self.lifecycle.trigger_pop(run_id, actor, window_secs)?)
    }

    /// Loads a run.
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn get(&self, run_id: &RunId) -> Result<Run, ServiceError> {
        Ok(self.lifecycle.get(run_id)?)
    }

    /// Lists a guild's non-ended runs.
    ///
    /// # Errors
    ///
    /// Propagates core failures.
    pub fn list_active(&self, guild_id: &str) -> Result<Vec<Run>, ServiceError> {
        Ok(self.lifecycle.list_active(guild_id)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use muster_core::clock::FixedClock;
    use muster_core::settlement::PointsResolver;
    use muster_core::store::memory::MemoryStore;
    use muster_core::{RoleMap, RoleMapSource, RoleRank};

    use super::*;

    struct StaticRoles(RoleMap);

    impl RoleMapSource for StaticRoles {
        fn role_map(&self, _guild_id: &str) -> Option<RoleMap> {
            Some(self.0.clone())
        }
    }

    struct OnePoint;

    impl PointsResolver for OnePoint {
        fn points_for(&self, _guild_id: &str, _activity_key: &str, _user_id: &str) -> u32 {
            1
        }
    }

    fn service() -> (RunService<MemoryStore>, Arc<FixedClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(1_000_000));
        let roles = StaticRoles(
            RoleMap::new()
                .with_rank(RoleRank::Verified, "role-verified")
                .with_rank(RoleRank::Organizer, "role-organizer"),
        );
        let lifecycle = Arc::new(RunLifecycle::new(
            store,
            Arc::new(roles),
            Arc::new(OnePoint),
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        let tracker = ActiveRunTracker::new(60 * 60_000);
        (
            RunService::new(lifecycle, tracker, Arc::clone(&clock) as Arc<dyn Clock>),
            clock,
        )
    }

    fn organizer() -> ActorContext {
        ActorContext::new("org", ["role-organizer", "role-verified"])
    }

    fn params() -> CreateRun {
        CreateRun {
            guild_id: "g1".into(),
            activity_key: "vault-key".into(),
            chain_amount: None,
            party: None,
            location: None,
            description: None,
            auto_end_minutes: 120,
        }
    }

    #[test]
    fn test_second_create_blocked_while_first_active() {
        let (service, _clock) = service();
        let first = service.create(&organizer(), params()).unwrap();

        let err = service.create(&organizer(), params()).unwrap_err();
        match err {
            ServiceError::ActiveRunExists { run_id } => assert_eq!(run_id, first.run_id),
            other => panic!("expected ActiveRunExists, got {other:?}"),
        }
    }

    #[test]
    fn test_create_allowed_after_cancel() {
        let (service, _clock) = service();
        let first = service.create(&organizer(), params()).unwrap();
        service.cancel(&first.run_id, &organizer()).unwrap();
        assert!(service.create(&organizer(), params()).is_ok());
    }

    #[test]
    fn test_stale_tracker_entry_revalidated_against_store() {
        let (service, _clock) = service();
        let first = service.create(&organizer(), params()).unwrap();

        // The sweeper closes the run without going through the service;
        // the tracker entry is now stale and must not block the organizer.
        let bypass = muster_core::ExpiryBypass::new();
        service
            .lifecycle()
            .end_expired(&first.run_id, &bypass)
            .unwrap();

        assert!(service.create(&organizer(), params()).is_ok());
    }

    #[test]
    fn test_different_organizers_independent() {
        let (service, _clock) = service();
        service.create(&organizer(), params()).unwrap();
        let other = ActorContext::new("org2", ["role-organizer"]);
        assert!(service.create(&other, params()).is_ok());
    }
}
