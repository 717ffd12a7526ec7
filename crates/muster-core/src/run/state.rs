//! Run record and status state machine.

use serde::{Deserialize, Serialize};

use crate::ids::RunId;

/// Lifecycle status of a run.
///
/// ```text
/// Open --> Live --> Ended
///   \________________^        (expiry bypass: any state -> Ended)
/// ```
///
/// A cancelled run is an `Ended` run that was never `Live`; there is no
/// distinct persisted state for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created and gathering participants.
    Open,
    /// Started; key pops may be triggered.
    Live,
    /// Terminal. No further mutation of the run or its roster.
    Ended,
}

impl RunStatus {
    /// Returns true for the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ended)
    }

    /// Returns the status as a stable string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Live => "live",
            Self::Ended => "ended",
        }
    }

    /// Parses a status from its stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "live" => Some(Self::Live),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }

    /// Returns true iff the forward edge `self -> to` is a legal organizer
    /// transition (the expiry bypass is not constrained by this table).
    #[must_use]
    pub const fn allows_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Open, Self::Live) | (Self::Live, Self::Ended) | (Self::Open, Self::Ended)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run reached its terminal state. Recorded on the organizer-credit
/// event, not on the run row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Organizer or staff ended a live run.
    Completed,
    /// Organizer or staff cancelled before or during the run.
    Cancelled,
    /// The expiry sweep closed the run past its configured duration.
    Expired,
}

impl CloseReason {
    /// Returns the reason as a stable string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// One tracked group activity session.
///
/// Owned exclusively by the lifecycle engine; all other components read it by
/// id and never write it directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub run_id: RunId,
    /// Guild this run belongs to.
    pub guild_id: String,
    /// User who created and controls the run.
    pub organizer_id: String,
    /// Activity being run (e.g. a dungeon or raid key).
    pub activity_key: String,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Number of key pops triggered so far. Monotonic non-decreasing.
    pub key_pop_count: u32,
    /// When the current key window closes, if a pop is outstanding.
    pub key_window_ends_at_ms: Option<u64>,
    /// Display-only chain length advertised by the organizer.
    pub chain_amount: Option<u32>,
    /// Display-only party label.
    pub party: Option<String>,
    /// Display-only meeting location.
    pub location: Option<String>,
    /// Display-only free-form description.
    pub description: Option<String>,
    /// Minutes after creation at which the expiry sweep may close the run.
    pub auto_end_minutes: u32,
    /// Creation timestamp.
    pub created_at_ms: u64,
    /// Set once on the first Open -> Live transition.
    pub started_at_ms: Option<u64>,
    /// Set once on terminal entry.
    pub ended_at_ms: Option<u64>,
}

impl Run {
    /// Returns the instant at which this run becomes eligible for the expiry
    /// sweep.
    #[must_use]
    pub const fn expires_at_ms(&self) -> u64 {
        self.created_at_ms
            .saturating_add((self.auto_end_minutes as u64).saturating_mul(60_000))
    }
}

/// Parameters for creating a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRun {
    /// Guild the run belongs to.
    pub guild_id: String,
    /// Activity key for the run.
    pub activity_key: String,
    /// Display-only chain length.
    pub chain_amount: Option<u32>,
    /// Display-only party label.
    pub party: Option<String>,
    /// Display-only meeting location.
    pub location: Option<String>,
    /// Display-only description.
    pub description: Option<String>,
    /// Minutes until the run becomes sweep-eligible.
    pub auto_end_minutes: u32,
}

/// Display-only fields the organizer may edit while a run is not ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunDetails {
    /// New chain length, if set.
    pub chain_amount: Option<u32>,
    /// New party label, if set.
    pub party: Option<String>,
    /// New location, if set.
    pub location: Option<String>,
    /// New description, if set.
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [RunStatus::Open, RunStatus::Live, RunStatus::Ended] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("archived"), None);
    }

    #[test]
    fn test_only_forward_transitions_allowed() {
        assert!(RunStatus::Open.allows_transition_to(RunStatus::Live));
        assert!(RunStatus::Open.allows_transition_to(RunStatus::Ended));
        assert!(RunStatus::Live.allows_transition_to(RunStatus::Ended));

        assert!(!RunStatus::Live.allows_transition_to(RunStatus::Open));
        assert!(!RunStatus::Ended.allows_transition_to(RunStatus::Open));
        assert!(!RunStatus::Ended.allows_transition_to(RunStatus::Live));
        assert!(!RunStatus::Ended.allows_transition_to(RunStatus::Ended));
    }

    #[test]
    fn test_terminal_state() {
        assert!(RunStatus::Ended.is_terminal());
        assert!(!RunStatus::Open.is_terminal());
        assert!(!RunStatus::Live.is_terminal());
    }

    #[test]
    fn test_expiry_instant() {
        let run = Run {
            run_id: crate::ids::RunId::from_raw("run-x"),
            guild_id: "g".into(),
            organizer_id: "o".into(),
            activity_key: "a".into(),
            status: RunStatus::Open,
            key_pop_count: 0,
            key_window_ends_at_ms: None,
            chain_amount: None,
            party: None,
            location: None,
            description: None,
            auto_end_minutes: 90,
            created_at_ms: 1_000,
            started_at_ms: None,
            ended_at_ms: None,
        };
        assert_eq!(run.expires_at_ms(), 1_000 + 90 * 60_000);
    }
}
