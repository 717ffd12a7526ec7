//! Config-backed guild role lookup.

use std::collections::BTreeMap;

use muster_core::{RoleMap, RoleMapSource};

/// [`RoleMapSource`] over the per-guild maps from the daemon config.
///
/// Guilds absent from the config resolve to `None`, which the gate treats as
/// an empty map: every rank check for an unconfigured guild fails closed.
#[derive(Debug, Clone, Default)]
pub struct ConfigRoleMapSource {
    guilds: BTreeMap<String, RoleMap>,
}

impl ConfigRoleMapSource {
    /// Creates a source over the configured guild maps.
    #[must_use]
    pub fn new(guilds: BTreeMap<String, RoleMap>) -> Self {
        Self { guilds }
    }
}

impl RoleMapSource for ConfigRoleMapSource {
    fn role_map(&self, guild_id: &str) -> Option<RoleMap> {
        self.guilds.get(guild_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use muster_core::RoleRank;

    use super::*;

    #[test]
    fn test_lookup_by_guild() {
        let mut guilds = BTreeMap::new();
        guilds.insert(
            "guild-1".to_string(),
            RoleMap::new().with_rank(RoleRank::Organizer, "2222"),
        );
        let source = ConfigRoleMapSource::new(guilds);

        let map = source.role_map("guild-1").expect("configured guild");
        assert_eq!(map.role_id_for(RoleRank::Organizer), Some("2222"));
        assert!(source.role_map("guild-2").is_none());
    }
}
