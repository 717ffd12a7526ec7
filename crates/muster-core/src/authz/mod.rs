//! Role-hierarchy authorization for run mutations.
//!
//! # Architecture
//!
//! ```text
//! RoleMapSource --> RoleMap (per guild: rank -> external role id)
//!                     |
//!                     v
//! ActorContext --> has_role / has_role_or_higher --> authorize_run_actor
//! ```
//!
//! # Key Concepts
//!
//! - **`RoleRank`**: fixed seven-tier hierarchy; ordinal comparison decides
//!   "this rank or higher".
//! - **`RoleMap`**: per-guild mapping from rank to external role identifier;
//!   unmapped ranks fail closed.
//! - **`RunActorPolicy`**: per-action combination of the organizer-identity
//!   and organizer-rank acceptance paths.
//! - **`ExpiryBypass`**: capability token for the trusted system close path;
//!   never constructible from request data.

mod gate;
mod hierarchy;

pub use gate::{
    ActorContext, AuthorizedAs, ExpiryBypass, Forbidden, RequiredAuthority, RunActorPolicy,
    authorize_run_actor, has_role, has_role_or_higher, max_rank,
};
pub use hierarchy::{RoleMap, RoleMapSource, RoleRank};
