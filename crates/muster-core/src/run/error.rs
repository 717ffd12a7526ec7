//! Typed failures returned by run operations.

use crate::authz::Forbidden;
use crate::ids::RunId;
use crate::run::state::RunStatus;
use crate::store::StoreError;

/// Failure taxonomy for the run operation surface.
///
/// Every variant crosses the core boundary as data; the core never retries
/// and never panics across it. The one deliberate exception to typed
/// surfacing is attribution-engine persistence failure, which is absorbed
/// and logged inside the engine so run control stays available when the
/// reward subsystem is degraded.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RunError {
    /// The actor does not satisfy the action's authorization policy.
    #[error(transparent)]
    Forbidden(#[from] Forbidden),

    /// No run exists with the given id.
    #[error("run not found: {run_id}")]
    NotFound {
        /// The missing run id.
        run_id: RunId,
    },

    /// The requested status edge is not in the transition table.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the run was in.
        from: RunStatus,
        /// Status the operation wanted.
        to: RunStatus,
    },

    /// Roster or detail writes are rejected because the run has ended.
    #[error("run is closed to further changes")]
    RunClosed,

    /// Key pops require a live run.
    #[error("run is not live")]
    RunNotLive,

    /// Key pops may only be triggered by the run's organizer.
    #[error("actor is not the run organizer")]
    NotOrganizer,

    /// The run already reached its terminal state.
    #[error("run already ended")]
    AlreadyTerminal,

    /// Storage failure outside the attribution engine's absorbed region.
    #[error(transparent)]
    Store(#[from] StoreError),
}
