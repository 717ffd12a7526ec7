//! Run lifecycle state machine.
//!
//! # Architecture
//!
//! ```text
//! create --> Run (Open)
//!              |
//!              v
//! start ---> Run (Live) --- trigger_pop x N
//!              |
//!              v
//! end/cancel/end_expired --> finalize credit --> Run (Ended)
//! ```
//!
//! The status write is always the last step of a close, behind a guarded
//! compare-and-set; settlement runs before it and is idempotent, so racing
//! closes (manual vs. expiry sweep) credit each snapshot exactly once.

pub mod error;
pub mod lifecycle;
pub mod state;

pub use error::RunError;
pub use lifecycle::RunLifecycle;
pub use state::{CloseReason, CreateRun, Run, RunDetails, RunStatus};
