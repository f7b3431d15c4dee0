//! Runtime assembly — discovery, config, store, lifecycle, background loops.

pub mod lifecycle;
pub mod snapshot;

pub use lifecycle::{
    EagerError, EagerReport, LifecycleManager, ServiceState, SnapshotReport,
};
pub use snapshot::{SnapshotService, SnapshotStats};

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::resolver::{AgentsConfig, ConfigResolver};
use crate::config::watcher::{ConfigWatcher, WatcherHandle};
use crate::registry::{FactoryMap, ModuleLoader, SharedRegistry, ToolDescriptor};
use crate::store::StateStore;
use crate::types::config::RuntimeConfig;
use crate::types::Result;

/// A fully wired runtime: discovered modules, live config, persistent store,
/// the lifecycle manager and the optional background loops.
///
/// Construction performs the whole boot sequence up to and including the
/// eager initialization pass; `shutdown` is the graceful mirror image.
pub struct Runtime {
    config: RuntimeConfig,
    registry: SharedRegistry,
    resolver: ConfigResolver,
    store: StateStore,
    lifecycle: Arc<LifecycleManager>,
    eager: EagerReport,
    watcher: Option<WatcherHandle>,
    snapshot: Option<SnapshotService>,
    snapshot_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("eager_started", &self.eager.started)
            .field("eager_failed", &self.eager.errors.len())
            .field("watcher", &self.watcher.is_some())
            .field("snapshot", &self.snapshot.is_some())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Boot the runtime: discover modules, load the agents config, open the
    /// store, run the eager initialization pass and start the configured
    /// background loops.
    ///
    /// Eager per-service failures do not abort the boot; they are recorded
    /// in the report available via [`Runtime::eager_report`].
    pub async fn start(config: RuntimeConfig, factories: FactoryMap) -> Result<Self> {
        let loader = ModuleLoader::new(&config.paths.modules_root, factories);
        let registry = crate::registry::shared(loader.discover_all().await?);

        let agents = AgentsConfig::load(&config.paths.agents_file).await?;
        let resolver = ConfigResolver::new(&config.paths.configs_root, agents);
        let store = StateStore::open(&config.paths.state_file).await?;

        let lifecycle = Arc::new(LifecycleManager::new(
            registry.clone(),
            resolver.clone(),
            store.clone(),
        ));
        let eager = lifecycle.initialize_eager().await;

        let watcher = if config.watcher.enabled {
            let watcher = ConfigWatcher::new(
                &config.paths.agents_file,
                &config.paths.configs_root,
                resolver.clone(),
                registry.clone(),
                lifecycle.clone(),
                config.watcher.debounce(),
            );
            Some(watcher.start()?)
        } else {
            None
        };

        let (snapshot, snapshot_task) = if config.snapshot.enabled {
            let mut service = SnapshotService::new(lifecycle.clone(), config.snapshot.clone());
            let task = service.start();
            (Some(service), Some(task))
        } else {
            (None, None)
        };

        Ok(Self {
            config,
            registry,
            resolver,
            store,
            lifecycle,
            eager,
            watcher,
            snapshot,
            snapshot_task,
        })
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Outcome of the boot-time eager initialization pass.
    pub fn eager_report(&self) -> &EagerReport {
        &self.eager
    }

    /// Tool surface advertised by loaded modules.
    pub fn advertised_tools(&self) -> Vec<ToolDescriptor> {
        match self.registry.read() {
            Ok(guard) => guard.advertised_tools(),
            Err(poisoned) => poisoned.into_inner().advertised_tools(),
        }
    }

    /// Graceful shutdown: stop the background loops, take a final state
    /// snapshot, then tear down every agent's services.
    pub async fn shutdown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        if let Some(mut snapshot) = self.snapshot.take() {
            snapshot.stop();
        }
        if let Some(task) = self.snapshot_task.take() {
            let _ = task.await;
        }

        let report = self.lifecycle.snapshot_all().await;
        tracing::info!(
            exported = report.exported,
            failed = report.failures.len(),
            "final shutdown snapshot"
        );

        self.lifecycle.teardown_all().await;
        tracing::info!("runtime shut down");
    }
}
