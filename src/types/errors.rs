//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the Valet runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (malformed manifest or config; fails closed,
    /// aborts only the load/resolve step that produced it).
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (unknown module, agent, or service).
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration resolution or file failure.
    #[error("config error: {0}")]
    Config(String),

    /// Dependency cycle detected during service initialization.
    /// Carries the dependency path that closed the cycle.
    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// Service lifecycle failure, scoped to one (agent, service) pair.
    #[error("service '{service}' failed for agent '{agent}': {message}")]
    Service {
        service: String,
        agent: String,
        message: String,
    },

    /// Invalid lifecycle state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Persistent store failure (a misconfigured store root is fatal).
    #[error("store error: {0}")]
    Store(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn cycle(path: Vec<String>) -> Self {
        Self::Cycle { path }
    }

    pub fn service(
        service: impl Into<String>,
        agent: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Service {
            service: service.into(),
            agent: agent.into(),
            message: message.into(),
        }
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// True when the error is a dependency cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Error::Cycle { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_joins_path() {
        let err = Error::cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
        assert!(err.is_cycle());
    }

    #[test]
    fn test_service_error_carries_context() {
        let err = Error::service("cache", "agent-1", "boom");
        let msg = err.to_string();
        assert!(msg.contains("cache"));
        assert!(msg.contains("agent-1"));
        assert!(msg.contains("boom"));
    }
}
