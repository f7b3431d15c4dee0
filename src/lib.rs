//! # Valet Core - Multi-Tenant Module Runtime
//!
//! Rust implementation of the Valet runtime providing:
//! - Module discovery from tool/service/paired catalogs
//! - Per-agent service lifecycle with dependency-ordered initialization
//! - Scoped persistent state with atomic whole-store writes
//! - Config resolution with defaults/file/inline precedence
//! - Hot reload with validate-all-then-apply semantics
//!
//! ## Architecture
//!
//! Every service instance is keyed by an (agent, service) pair; agents never
//! share instances or state:
//! ```text
//!                  ┌────────────────────────────────────┐
//!   agents.json →  │            Runtime                 │
//!                  │  ┌─────────┐ ┌───────────┐         │
//!                  │  │ Module  │ │ Lifecycle │         │
//!                  │  │Registry │ │  Manager  │         │
//!                  │  └─────────┘ └───────────┘         │
//!                  │  ┌─────────┐ ┌───────────┐         │
//!                  │  │ Config  │ │   State   │         │
//!                  │  │Resolver │ │   Store   │         │
//!                  │  └─────────┘ └───────────┘         │
//!                  └────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod config;
pub mod manifest;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod store;
pub mod types;

// Internal utilities
pub mod observability;

pub use runtime::{LifecycleManager, Runtime, ServiceState};
pub use service::{Service, ServiceContext, ServiceFactory};
pub use types::{AgentId, Error, Result};
