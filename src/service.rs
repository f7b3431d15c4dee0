//! Service implementation contract.
//!
//! A service is a stateful, per-agent object with lifecycle hooks. The
//! lifecycle manager programs only against these traits; concrete modules
//! provide their own implementations behind a factory.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::store::ScopedStore;
use crate::types::{AgentId, Result};

/// Lifecycle hooks implemented by a service.
///
/// Only `init` is mandatory. The optional hooks default to no-ops so simple
/// services stay simple. Implementations use interior mutability for their
/// in-memory state; the manager only ever holds `Arc<dyn Service>`.
#[async_trait]
pub trait Service: Send + Sync {
    /// Bring the instance up for one agent with its resolved config.
    async fn init(&self, agent: &AgentId, config: &Value, ctx: ServiceContext) -> Result<()>;

    /// Apply a config change in place. Called only while running; a failure
    /// leaves the instance on its previous config.
    async fn reconfigure(&self, _old: &Value, _new: &Value) -> Result<()> {
        Ok(())
    }

    /// Export a snapshot of in-memory state, or `None` when the service has
    /// nothing to persist.
    async fn export_state(&self) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Rebuild in-memory state from a previously exported snapshot.
    async fn restore_state(&self, _snapshot: Value) -> Result<()> {
        Ok(())
    }

    /// Release resources. Best-effort; errors are logged, not propagated.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// Dependencies declared by the implementation itself, unioned with the
    /// manifest-declared list by the lifecycle manager.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }
}

// Trait objects carry no implementation identity worth printing, but
// `Result<Arc<dyn Service>>` values must still format for assertions and
// error reports.
impl fmt::Debug for dyn Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Service")
    }
}

/// Creates one fresh instance per (agent, module). No implicit singletons:
/// the lifecycle manager invokes the factory lazily and owns the result.
pub trait ServiceFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Service>;
}

impl<F> ServiceFactory for F
where
    F: Fn() -> Arc<dyn Service> + Send + Sync,
{
    fn create(&self) -> Arc<dyn Service> {
        self()
    }
}

/// Read-only lookup over already-running peer services. Never triggers
/// initialization, so a service calling into it from a hook cannot deadlock
/// the manager.
pub trait PeerLookup: Send + Sync {
    fn get(&self, service: &str) -> Option<Arc<dyn Service>>;
}

/// Per-instance context handed to `init`.
///
/// Owns the scoped store for this (agent, service) pair; implementations
/// typically stash a clone of the store for later writes.
#[derive(Clone)]
pub struct ServiceContext {
    agent: AgentId,
    store: ScopedStore,
    peers: Arc<dyn PeerLookup>,
}

impl ServiceContext {
    pub fn new(agent: AgentId, store: ScopedStore, peers: Arc<dyn PeerLookup>) -> Self {
        Self {
            agent,
            store,
            peers,
        }
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    /// Scoped store rooted at this (agent, service) pair.
    pub fn store(&self) -> &ScopedStore {
        &self.store
    }

    /// Look up an already-running sibling service for the same agent.
    pub fn peer(&self, service: &str) -> Option<Arc<dyn Service>> {
        self.peers.get(service)
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("agent", &self.agent)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
