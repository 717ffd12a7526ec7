//! Flat-rate point resolver.
//!
//! The engine treats point values as external policy behind
//! [`PointsResolver`]; this implementation is a per-activity table from the
//! daemon config with a global default. Richer policies (role-weighted,
//! time-weighted) slot in behind the same trait without touching the engine.

use std::collections::BTreeMap;

use muster_core::PointsResolver;

use crate::config::PointsConfig;

/// Config-driven flat-rate [`PointsResolver`].
#[derive(Debug, Clone)]
pub struct FlatRateResolver {
    default_points: u32,
    per_activity: BTreeMap<String, u32>,
}

impl FlatRateResolver {
    /// Creates a resolver from the daemon's points config.
    #[must_use]
    pub fn new(config: PointsConfig) -> Self {
        Self {
            default_points: config.default_points,
            per_activity: config.per_activity,
        }
    }
}

impl PointsResolver for FlatRateResolver {
    fn points_for(&self, _guild_id: &str, activity_key: &str, _user_id: &str) -> u32 {
        self.per_activity
            .get(activity_key)
            .copied()
            .unwrap_or(self.default_points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_activity_override_with_default() {
        let mut per_activity = BTreeMap::new();
        per_activity.insert("vault-key".to_string(), 25);
        let resolver = FlatRateResolver::new(PointsConfig {
            default_points: 10,
            per_activity,
        });

        assert_eq!(resolver.points_for("g1", "vault-key", "alice"), 25);
        assert_eq!(resolver.points_for("g1", "unlisted", "alice"), 10);
    }
}
