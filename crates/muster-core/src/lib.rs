//! Run lifecycle, authorization, and completion-attribution engine.
//!
//! `muster-core` governs guild-scoped, time-boxed group activities ("runs")
//! from creation through a terminal close. Organizers segment a live run
//! with key pops; each pop freezes a snapshot of the joined roster, and the
//! attribution engine later credits every snapshotted participant exactly
//! once, tolerating the continuous join/leave churn in between.
//!
//! # Components
//!
//! - [`authz`]: seven-rank role hierarchy, per-guild rank mapping, and the
//!   per-action authorization gate with its trusted [`authz::ExpiryBypass`]
//!   path.
//! - [`roster`]: join/leave/attribute tracking and offer flags.
//! - [`keypop`]: pop triggering and roster snapshotting.
//! - [`settlement`]: idempotent, best-effort credit settlement per snapshot.
//! - [`run`]: the state machine tying the above together behind the
//!   operation surface the calling boundary dispatches to.
//! - [`store`]: storage contracts plus the in-memory reference backend.
//!
//! The crate performs no I/O of its own; a host supplies a store backend, a
//! guild role lookup, a point-value resolver, and a clock.

pub mod authz;
pub mod clock;
pub mod ids;
pub mod keypop;
pub mod roster;
pub mod run;
pub mod settlement;
pub mod store;

pub use authz::{ActorContext, ExpiryBypass, RoleMap, RoleMapSource, RoleRank};
pub use clock::{Clock, SystemClock};
pub use ids::RunId;
pub use keypop::PopOutcome;
pub use run::{CreateRun, Run, RunDetails, RunError, RunLifecycle, RunStatus};
pub use settlement::PointsResolver;
pub use store::StoreError;
