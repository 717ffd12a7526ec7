//! Daemon configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! none at all) yields a working local setup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use muster_core::RoleMap;
use serde::{Deserialize, Serialize};

/// Point values for the daemon's flat-rate resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PointsConfig {
    /// Points per clear when the activity has no specific entry.
    pub default_points: u32,
    /// Per-activity-key overrides.
    pub per_activity: BTreeMap<String, u32>,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            default_points: 10,
            per_activity: BTreeMap::new(),
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Expiry sweep cadence in seconds.
    pub sweep_interval_secs: u64,
    /// TTL for per-organizer active-run tracking, in minutes. Entries older
    /// than this are dropped by cleanup so a missed release cannot wedge an
    /// organizer forever.
    pub active_run_ttl_minutes: u64,
    /// Flat-rate point values.
    pub points: PointsConfig,
    /// Per-guild rank-to-role-id mappings.
    pub guilds: BTreeMap<String, RoleMap>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("muster.sqlite"),
            sweep_interval_secs: 300,
            active_run_ttl_minutes: 8 * 60,
            points: PointsConfig::default(),
            guilds: BTreeMap::new(),
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
}

impl DaemonConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable or malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use muster_core::RoleRank;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.points.default_points, 10);
        assert!(config.guilds.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
            db_path = "/var/lib/muster/muster.sqlite"
            sweep_interval_secs = 120

            [points]
            default_points = 5
            [points.per_activity]
            vault-key = 25

            [guilds.guild-1]
            verified = "1111"
            organizer = "2222"
        "#;
        let config: DaemonConfig = toml::from_str(raw).expect("config should parse");
        assert_eq!(config.sweep_interval_secs, 120);
        assert_eq!(config.points.per_activity.get("vault-key"), Some(&25));
        let map = config.guilds.get("guild-1").expect("guild mapped");
        assert_eq!(map.role_id_for(RoleRank::Organizer), Some("2222"));
        assert_eq!(map.role_id_for(RoleRank::Officer), None);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let raw = "unknown_knob = true";
        assert!(toml::from_str::<DaemonConfig>(raw).is_err());
    }
}
