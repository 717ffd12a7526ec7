//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a run.
///
/// Format: `run-{uuid}`. Generated by the lifecycle engine on `create`;
/// callers treat the value as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Generates a new random run identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("run-{}", Uuid::new_v4()))
    }

    /// Wraps an identifier loaded from storage.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for RunId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_prefixed_and_unique() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert!(a.as_str().starts_with("run-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_raw_roundtrip() {
        let id = RunId::from_raw("run-fixed");
        assert_eq!(id.as_str(), "run-fixed");
        assert_eq!(id.to_string(), "run-fixed");
    }
}
