//! Per-action authorization decisions for run mutations.
//!
//! Every mutating lifecycle operation passes a [`RunActorPolicy`] describing
//! which relationships may perform that specific action. The decision is
//! first-match-wins: the trusted system path short-circuits the gate entirely
//! (see [`ExpiryBypass`]), then the Organizer-or-higher rank check, then the
//! actor-is-organizer identity check. No match fails closed with the
//! authority context the caller was missing.

use std::collections::BTreeSet;

use super::hierarchy::{RoleMap, RoleRank};
use crate::run::state::Run;

/// Ephemeral identity of the caller of a run operation.
///
/// The `role_ids` set is supplied by the calling boundary and is trusted as
/// presented; the core never re-verifies it against the external platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    /// External user identifier.
    pub user_id: String,
    /// External role identifiers the boundary resolved for this actor.
    pub role_ids: BTreeSet<String>,
}

impl ActorContext {
    /// Creates an actor context from a user id and presented role ids.
    #[must_use]
    pub fn new<I, S>(user_id: impl Into<String>, role_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            role_ids: role_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// Returns true iff the actor's presented role set contains the external
/// identifier mapped to `rank`.
///
/// An unmapped rank or an empty presented role set is always false.
#[must_use]
pub fn has_role(map: &RoleMap, actor: &ActorContext, rank: RoleRank) -> bool {
    map.role_id_for(rank)
        .is_some_and(|role_id| actor.role_ids.contains(role_id))
}

/// Returns the highest rank the actor holds under `map`, if any.
#[must_use]
pub fn max_rank(map: &RoleMap, actor: &ActorContext) -> Option<RoleRank> {
    RoleRank::ALL
        .into_iter()
        .filter(|rank| has_role(map, actor, *rank))
        .max_by_key(|rank| rank.ordinal())
}

/// Returns true iff the actor holds `rank` or any rank above it.
///
/// Monotonic: a true result for `rank` implies a true result for every rank
/// with a lower ordinal.
#[must_use]
pub fn has_role_or_higher(map: &RoleMap, actor: &ActorContext, rank: RoleRank) -> bool {
    max_rank(map, actor).is_some_and(|held| held.ordinal() >= rank.ordinal())
}

/// Which relationships may perform a given run action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunActorPolicy {
    /// Accept the run's organizer by identity.
    pub allow_organizer: bool,
    /// Accept any actor holding the Organizer rank or higher.
    pub allow_organizer_role: bool,
}

impl RunActorPolicy {
    /// Only the run's organizer.
    #[must_use]
    pub const fn organizer_only() -> Self {
        Self {
            allow_organizer: true,
            allow_organizer_role: false,
        }
    }

    /// The run's organizer, or staff holding Organizer or higher.
    #[must_use]
    pub const fn organizer_or_staff() -> Self {
        Self {
            allow_organizer: true,
            allow_organizer_role: true,
        }
    }
}

/// Relationship that satisfied the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizedAs {
    /// Matched the Organizer-or-higher rank check.
    OrganizerRole,
    /// Matched the actor-is-organizer identity check.
    Organizer,
}

/// Authority context a rejected actor was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredAuthority {
    /// The action required holding `rank` or higher.
    Rank(RoleRank),
    /// The action required being the run's organizer.
    Organizer,
    /// The action accepted either relationship.
    OrganizerOrRank(RoleRank),
}

impl std::fmt::Display for RequiredAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rank(rank) => write!(f, "rank {rank} or higher"),
            Self::Organizer => f.write_str("run organizer"),
            Self::OrganizerOrRank(rank) => {
                write!(f, "run organizer, or rank {rank} or higher")
            },
        }
    }
}

/// Typed rejection from the gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("actor lacks required authority: {required}")]
pub struct Forbidden {
    /// What the actor would have needed.
    pub required: RequiredAuthority,
}

/// Authorizes `actor` to perform a run action under `policy`.
///
/// # Errors
///
/// Returns [`Forbidden`] with the missing authority context when no enabled
/// relationship matches.
pub fn authorize_run_actor(
    run: &Run,
    map: &RoleMap,
    actor: &ActorContext,
    policy: RunActorPolicy,
) -> Result<AuthorizedAs, Forbidden> {
    if policy.allow_organizer_role && has_role_or_higher(map, actor, RoleRank::Organizer) {
        return Ok(AuthorizedAs::OrganizerRole);
    }
    if policy.allow_organizer && actor.user_id == run.organizer_id {
        return Ok(AuthorizedAs::Organizer);
    }

    let required = match (policy.allow_organizer, policy.allow_organizer_role) {
        (true, true) => RequiredAuthority::OrganizerOrRank(RoleRank::Organizer),
        (false, true) => RequiredAuthority::Rank(RoleRank::Organizer),
        // A policy with both paths disabled is only reachable through the
        // system bypass, which never consults this gate.
        (true | false, false) => RequiredAuthority::Organizer,
    };
    Err(Forbidden { required })
}

/// Capability token for the trusted expiry path.
///
/// Holding an `ExpiryBypass` permits closing a run from any state through
/// [`RunLifecycle::end_expired`](crate::run::RunLifecycle::end_expired); the
/// regular `end`/`cancel` operations neither accept nor construct one. The
/// token is created once at host wiring time and handed to the expiry
/// sweeper only. It is deliberately not `Clone`, not serializable, and never
/// part of any request payload, so no boundary input can smuggle it in.
#[derive(Debug)]
pub struct ExpiryBypass {
    _private: (),
}

impl ExpiryBypass {
    /// Creates the token. Call from host wiring only.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for ExpiryBypass {
    fn default() -> Self {
        Self::new()
    }
}
