//! Out-of-band expiry sweep.
//!
//! A periodic task lists runs older than their configured duration and
//! closes each through the trusted bypass path. The sweep regularly races
//! manual closes; `AlreadyTerminal` from the lifecycle is counted as a
//! no-op, not a failure. Store I/O is synchronous, so each pass runs inside
//! `spawn_blocking`.

use std::sync::Arc;
use std::time::Duration;

use muster_core::authz::ExpiryBypass;
use muster_core::clock::Clock;
use muster_core::store::{AttributionStore, RosterStore, RunStore};
use muster_core::{RunError, RunLifecycle};
use tokio::time::MissedTickBehavior;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired runs the pass examined.
    pub examined: usize,
    /// Runs this pass closed.
    pub ended: usize,
    /// Runs a manual close beat us to.
    pub already_terminal: usize,
    /// Runs whose close failed and will be retried next pass.
    pub failed: usize,
}

/// Periodic expiry sweeper over a lifecycle engine.
///
/// Owns the only [`ExpiryBypass`] in the process; host wiring hands the
/// token in at construction and nothing else can reach the bypass path.
pub struct ExpirySweeper<S> {
    lifecycle: Arc<RunLifecycle<S>>,
    clock: Arc<dyn Clock>,
    bypass: ExpiryBypass,
    interval: Duration,
}

impl<S> ExpirySweeper<S>
where
    S: RunStore + RosterStore + AttributionStore + Send + Sync + 'static,
{
    /// Creates a sweeper ticking every `interval`.
    pub fn new(
        lifecycle: Arc<RunLifecycle<S>>,
        clock: Arc<dyn Clock>,
        bypass: ExpiryBypass,
        interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            clock,
            bypass,
            interval,
        }
    }

    /// Runs one sweep pass synchronously.
    ///
    /// Per-run close failures are logged and counted; they never abort the
    /// pass, so one wedged run cannot starve the rest of the backlog.
    ///
    /// # Errors
    ///
    /// Returns a failure only when the expired-run listing itself fails.
    pub fn sweep_once(&self) -> Result<SweepReport, RunError> {
        let now_ms = self.clock.now_ms();
        let expired = self.lifecycle.list_expired(now_ms)?;

        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };
        for run in &expired {
            match self.lifecycle.end_expired(&run.run_id, &self.bypass) {
                Ok(_) => {
                    report.ended += 1;
                    tracing::info!(
                        run_id = %run.run_id,
                        guild_id = %run.guild_id,
                        auto_end_minutes = run.auto_end_minutes,
                        "expired run closed"
                    );
                },
                Err(RunError::AlreadyTerminal) => {
                    // A manual end/cancel won the race between the listing
                    // and our close.
                    report.already_terminal += 1;
                },
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        run_id = %run.run_id,
                        error = %err,
                        "failed to close expired run; will retry next sweep"
                    );
                },
            }
        }
        Ok(report)
    }

    /// Runs the sweep loop forever at the configured interval.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");
        loop {
            ticker.tick().await;
            let sweeper = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || sweeper.sweep_once()).await {
                Ok(Ok(report)) => {
                    if report.examined > 0 {
                        tracing::info!(
                            examined = report.examined,
                            ended = report.ended,
                            already_terminal = report.already_terminal,
                            failed = report.failed,
                            "expiry sweep completed"
                        );
                    }
                },
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "expiry sweep failed to list runs");
                },
                Err(err) => {
                    tracing::error!(error = %err, "expiry sweep task panicked");
                },
            }
        }
    }
}
