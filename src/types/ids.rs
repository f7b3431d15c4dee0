//! Strongly-typed identifiers.
//!
//! `AgentId` is the sole key for all state and config access. `AgentName` is
//! a display-only label and is deliberately a distinct type so it can never
//! be used as a lookup key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque agent (tenant) identifier. Validated non-empty at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: String) -> Result<Self, &'static str> {
        if s.is_empty() {
            return Err("AgentId cannot be empty");
        }
        Ok(Self(s))
    }

    /// Construct from a known-good literal. Panics on empty input;
    /// intended for bootstrap code and tests.
    pub fn must(s: &str) -> Self {
        match Self::from_string(s.to_string()) {
            Ok(id) => id,
            Err(e) => panic!("{}", e),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable agent label. Display and logging only, never a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgentName(String);

impl AgentName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_rejects_empty() {
        assert!(AgentId::from_string(String::new()).is_err());
        assert!(AgentId::from_string("a1".to_string()).is_ok());
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(AgentId::generate(), AgentId::generate());
    }

    #[test]
    fn test_display_name_is_not_an_id() {
        // Compile-time property really; just exercise the accessors.
        let name = AgentName::new("Front Desk");
        assert_eq!(name.as_str(), "Front Desk");
        assert_eq!(name.to_string(), "Front Desk");
    }
}
