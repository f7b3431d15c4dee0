//! Core types for the Valet runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (AgentId, AgentName)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Runtime configuration structures

pub mod config;
mod errors;
mod ids;

pub use config::{
    ObservabilityConfig, PathsConfig, RuntimeConfig, SnapshotConfig, WatcherConfig,
};
pub use errors::{Error, Result};
pub use ids::{AgentId, AgentName};
