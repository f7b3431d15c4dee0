//! Per-agent configuration: resolution and hot reload.

pub mod resolver;
pub mod watcher;

pub use resolver::{AgentEntry, AgentsConfig, ConfigResolver, ModuleConfigSource};
pub use watcher::{ConfigWatcher, ReloadOutcome, WatcherHandle};
