//! Role hierarchy and per-guild rank mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Permission rank in the fixed guild hierarchy, lowest authority first.
///
/// Ranks are totally ordered by [`ordinal`](Self::ordinal); every
/// "this rank or higher" decision is an integer comparison on ordinals, so
/// monotonicity holds by construction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RoleRank {
    /// Base tier: completed the guild's verification flow.
    Verified,
    /// Regular guild member.
    Member,
    /// Long-standing member.
    Veteran,
    /// Top-performing member.
    Elite,
    /// May create and control runs.
    Organizer,
    /// Staff: may control any run in the guild.
    Officer,
    /// Full administrative authority.
    Administrator,
}

impl RoleRank {
    /// All ranks, lowest authority first.
    pub const ALL: [Self; 7] = [
        Self::Verified,
        Self::Member,
        Self::Veteran,
        Self::Elite,
        Self::Organizer,
        Self::Officer,
        Self::Administrator,
    ];

    /// Integer position in the hierarchy; higher means more authority.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::Verified => 0,
            Self::Member => 1,
            Self::Veteran => 2,
            Self::Elite => 3,
            Self::Organizer => 4,
            Self::Officer => 5,
            Self::Administrator => 6,
        }
    }

    /// Returns the rank as a stable string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Member => "member",
            Self::Veteran => "veteran",
            Self::Elite => "elite",
            Self::Organizer => "organizer",
            Self::Officer => "officer",
            Self::Administrator => "administrator",
        }
    }
}

impl std::fmt::Display for RoleRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-guild mapping from hierarchy rank to the external role identifier the
/// calling boundary presents for it.
///
/// A rank with no mapping can never be satisfied: an unmapped rank fails
/// closed rather than falling back to a weaker check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleMap {
    mapping: BTreeMap<RoleRank, String>,
}

impl RoleMap {
    /// Creates an empty map (every rank check fails).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style rank assignment.
    #[must_use]
    pub fn with_rank(mut self, rank: RoleRank, role_id: impl Into<String>) -> Self {
        self.mapping.insert(rank, role_id.into());
        self
    }

    /// Returns the external role identifier mapped to `rank`, if any.
    #[must_use]
    pub fn role_id_for(&self, rank: RoleRank) -> Option<&str> {
        self.mapping.get(&rank).map(String::as_str)
    }

    /// Number of mapped ranks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Returns true if no rank is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

/// Guild role-configuration lookup consumed by the gate.
///
/// Returning `None` for a guild is equivalent to an empty [`RoleMap`]: every
/// rank check for that guild fails closed.
pub trait RoleMapSource: Send + Sync {
    /// Resolves the role map for `guild_id`.
    fn role_map(&self, guild_id: &str) -> Option<RoleMap>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_strictly_increasing() {
        for pair in RoleRank::ALL.windows(2) {
            assert!(pair[0].ordinal() < pair[1].ordinal());
        }
    }

    #[test]
    fn test_rank_order_matches_ordinal_order() {
        assert!(RoleRank::Verified < RoleRank::Organizer);
        assert!(RoleRank::Organizer < RoleRank::Administrator);
    }

    #[test]
    fn test_unmapped_rank_resolves_to_none() {
        let map = RoleMap::new().with_rank(RoleRank::Organizer, "role-org");
        assert_eq!(map.role_id_for(RoleRank::Organizer), Some("role-org"));
        assert_eq!(map.role_id_for(RoleRank::Officer), None);
    }

    #[test]
    fn test_with_rank_overwrites() {
        let map = RoleMap::new()
            .with_rank(RoleRank::Member, "old")
            .with_rank(RoleRank::Member, "new");
        assert_eq!(map.role_id_for(RoleRank::Member), Some("new"));
        assert_eq!(map.len(), 1);
    }
}
