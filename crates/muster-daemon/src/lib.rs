//! SQLite-backed host for the muster run engine.
//!
//! Supplies what the core leaves injected: a durable store
//! ([`store::SqliteStore`]), the guild role lookup
//! ([`roles::ConfigRoleMapSource`]), the point-value policy
//! ([`points::FlatRateResolver`]), per-organizer active-run tracking
//! ([`tracker::ActiveRunTracker`]), and the out-of-band expiry sweep
//! ([`sweeper::ExpirySweeper`]). [`service::RunService`] ties them together
//! behind the surface a command boundary dispatches to.

pub mod config;
pub mod points;
pub mod roles;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod tracker;

pub use config::{ConfigError, DaemonConfig, PointsConfig};
pub use points::FlatRateResolver;
pub use roles::ConfigRoleMapSource;
pub use service::{RunService, ServiceError};
pub use store::SqliteStore;
pub use sweeper::{ExpirySweeper, SweepReport};
pub use tracker::ActiveRunTracker;
