//! Hot-reload of the agents config file.
//!
//! Reload is validate-all-then-apply: the candidate tree is parsed and every
//! (agent, module) config it names is resolved and schema-checked before
//! anything touches live state. Any failure aborts the whole reload and the
//! previous config stays authoritative. Only after full validation does the
//! live tree swap, and only structurally-changed configs of RUNNING services
//! get their reconfigure hook invoked.

use notify::{RecursiveMode, Watcher};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::resolver::{AgentsConfig, ConfigResolver};
use crate::registry::SharedRegistry;
use crate::runtime::lifecycle::LifecycleManager;
use crate::types::{AgentId, Error, Result};

/// Outcome of one reload pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// (agent, module) pairs validated in the candidate tree.
    pub validated: usize,
    /// Running pairs whose config changed and whose hook succeeded.
    pub applied: usize,
    /// Running pairs whose reconfigure hook rejected the change; they stay
    /// on their previous config.
    pub hook_failures: usize,
}

/// Watches the agents file and configs root, reloading on change.
pub struct ConfigWatcher {
    agents_path: PathBuf,
    configs_root: PathBuf,
    resolver: ConfigResolver,
    registry: SharedRegistry,
    lifecycle: Arc<LifecycleManager>,
    debounce: Duration,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("agents_path", &self.agents_path)
            .field("configs_root", &self.configs_root)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    pub fn new(
        agents_path: impl Into<PathBuf>,
        configs_root: impl Into<PathBuf>,
        resolver: ConfigResolver,
        registry: SharedRegistry,
        lifecycle: Arc<LifecycleManager>,
        debounce: Duration,
    ) -> Self {
        Self {
            agents_path: agents_path.into(),
            configs_root: configs_root.into(),
            resolver,
            registry,
            lifecycle,
            debounce,
        }
    }

    /// Run one validate-then-apply reload pass against the current file
    /// contents. On any parse or validation error the live config is left
    /// untouched and the error is returned.
    pub async fn reload_once(&self) -> Result<ReloadOutcome> {
        let candidate = AgentsConfig::load(&self.agents_path).await?;

        // Phase 1: resolve and validate everything the candidate names.
        // Nothing is applied until every pair passes.
        let mut resolved: Vec<(AgentId, String, Value)> = Vec::new();
        for agent in candidate.enabled_agents() {
            let Some(entry) = candidate.entry(&agent) else {
                continue;
            };
            for module_name in entry.modules.keys() {
                let manifest = {
                    let registry = match self.registry.read() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    let record = registry.require(module_name)?;
                    record.manifest.clone().ok_or_else(|| {
                        Error::validation(format!(
                            "module '{module_name}' failed to load: {}",
                            record.error.as_deref().unwrap_or("unknown error")
                        ))
                    })?
                };
                let config = self
                    .resolver
                    .resolve_in(&candidate, &agent, &manifest)
                    .await?;
                resolved.push((agent.clone(), module_name.clone(), config));
            }
        }

        // Phase 2: swap the live tree, then push changed configs into
        // running instances. Hook failures are per-pair, never a rollback
        // of the tree itself.
        let validated = resolved.len();
        self.resolver.replace(candidate);

        let mut outcome = ReloadOutcome {
            validated,
            ..Default::default()
        };
        for (agent, module_name, new_config) in resolved {
            let Some(old_config) = self.lifecycle.running_config(&agent, &module_name) else {
                continue;
            };
            if old_config == new_config {
                continue;
            }
            match self
                .lifecycle
                .apply_config_change(&agent, &module_name, &old_config, &new_config)
                .await
            {
                Ok(()) => outcome.applied += 1,
                Err(e) => {
                    tracing::warn!(agent = %agent, module = %module_name, error = %e, "reconfigure rejected reload change");
                    outcome.hook_failures += 1;
                }
            }
        }

        tracing::info!(
            validated = outcome.validated,
            applied = outcome.applied,
            hook_failures = outcome.hook_failures,
            "config reload complete"
        );
        Ok(outcome)
    }

    /// Start the filesystem watch loop. At most one reload runs at a time;
    /// events arriving mid-reload coalesce into the next pass.
    pub fn start(self) -> Result<WatcherHandle> {
        let (event_tx, mut event_rx) = mpsc::channel::<()>(8);
        let mut fs_watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        // Full queue means a reload is already pending.
                        let _ = event_tx.try_send(());
                    }
                }
            })
            .map_err(|e| Error::config(format!("cannot create config watcher: {e}")))?;

        // Watch the agents file's directory: editors replace files by
        // rename, which would drop a watch on the file itself.
        let watch_dir = self
            .agents_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        fs_watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                Error::config(format!("cannot watch '{}': {e}", watch_dir.display()))
            })?;
        if self.configs_root.is_dir() && self.configs_root != watch_dir {
            fs_watcher
                .watch(&self.configs_root, RecursiveMode::Recursive)
                .map_err(|e| {
                    Error::config(format!(
                        "cannot watch '{}': {e}",
                        self.configs_root.display()
                    ))
                })?;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            // Keep the OS watcher alive for the lifetime of the loop.
            let _fs_watcher = fs_watcher;
            tracing::info!(path = %self.agents_path.display(), "config watcher started");
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    event = event_rx.recv() => {
                        if event.is_none() {
                            break;
                        }
                        tokio::time::sleep(self.debounce).await;
                        // Collapse the burst into a single reload.
                        while event_rx.try_recv().is_ok() {}
                        if let Err(e) = self.reload_once().await {
                            tracing::warn!(error = %e, "config reload aborted, previous config kept");
                        }
                    }
                }
            }
            tracing::info!("config watcher stopped");
        });

        Ok(WatcherHandle {
            stop: stop_tx,
            task,
        })
    }
}

/// Handle to a running watch loop.
#[derive(Debug)]
pub struct WatcherHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Capability, ConfigSchema, ModuleManifest};
    use crate::registry::{LoadStatus, LoadedModule, ModuleRegistry};
    use crate::service::{Service, ServiceContext, ServiceFactory};
    use crate::store::StateStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        fail_reconfigure: bool,
        reconfigure_calls: Arc<AtomicUsize>,
        current: Arc<StdMutex<Option<Value>>>,
    }

    #[async_trait]
    impl Service for Recorder {
        async fn init(
            &self,
            _agent: &AgentId,
            config: &Value,
            _ctx: ServiceContext,
        ) -> Result<()> {
            *self.current.lock().unwrap() = Some(config.clone());
            Ok(())
        }

        async fn reconfigure(&self, _old: &Value, new: &Value) -> Result<()> {
            self.reconfigure_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_reconfigure {
                return Err(Error::validation("rejected"));
            }
            *self.current.lock().unwrap() = Some(new.clone());
            Ok(())
        }
    }

    struct Fixture {
        watcher: ConfigWatcher,
        lifecycle: Arc<LifecycleManager>,
        resolver: ConfigResolver,
        agents_path: PathBuf,
        reconfigure_calls: Arc<AtomicUsize>,
        current: Arc<StdMutex<Option<Value>>>,
        _dir: tempfile::TempDir,
    }

    fn cache_manifest() -> ModuleManifest {
        ModuleManifest {
            name: "cache".to_string(),
            version: "1.0.0".to_string(),
            provides: vec![Capability::Service],
            dependencies: vec![],
            config_schema: serde_json::from_value::<ConfigSchema>(json!({
                "type": "object",
                "properties": { "max": { "type": "number", "default": 10 } }
            }))
            .unwrap(),
            advertise: false,
            description: String::new(),
        }
    }

    async fn fixture(initial_agents: &str, fail_reconfigure: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let agents_path = dir.path().join("agents.json");
        tokio::fs::write(&agents_path, initial_agents).await.unwrap();

        let reconfigure_calls = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(StdMutex::new(None));

        let mut registry = ModuleRegistry::new();
        let calls = reconfigure_calls.clone();
        let cell = current.clone();
        let factory = move || {
            Arc::new(Recorder {
                fail_reconfigure,
                reconfigure_calls: calls.clone(),
                current: cell.clone(),
            }) as Arc<dyn Service>
        };
        registry.insert(LoadedModule {
            name: "cache".to_string(),
            manifest: Some(cache_manifest()),
            status: LoadStatus::Loaded,
            error: None,
            factory: Some(Arc::new(factory) as Arc<dyn ServiceFactory>),
            tools: Vec::new(),
        });
        let registry = crate::registry::shared(registry);

        let tree = AgentsConfig::parse(initial_agents).unwrap();
        let resolver = ConfigResolver::new(dir.path(), tree);
        let store = StateStore::open(dir.path().join("state.json")).await.unwrap();
        let lifecycle = Arc::new(LifecycleManager::new(
            registry.clone(),
            resolver.clone(),
            store,
        ));

        let watcher = ConfigWatcher::new(
            &agents_path,
            dir.path(),
            resolver.clone(),
            registry,
            lifecycle.clone(),
            Duration::from_millis(10),
        );

        Fixture {
            watcher,
            lifecycle,
            resolver,
            agents_path,
            reconfigure_calls,
            current,
            _dir: dir,
        }
    }

    const INITIAL: &str = r#"{ "agents": { "a1": { "modules": { "cache": { "max": 10 } } } } }"#;

    #[tokio::test]
    async fn test_reload_applies_changed_config_to_running_service() {
        let fx = fixture(INITIAL, false).await;
        let agent = AgentId::must("a1");
        fx.lifecycle.ensure_initialized(&agent, "cache").await.unwrap();

        tokio::fs::write(
            &fx.agents_path,
            r#"{ "agents": { "a1": { "modules": { "cache": { "max": 20 } } } } }"#,
        )
        .await
        .unwrap();

        let outcome = fx.watcher.reload_once().await.unwrap();
        assert_eq!(outcome.validated, 1);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.hook_failures, 0);

        assert_eq!(
            fx.lifecycle.running_config(&agent, "cache").unwrap(),
            json!({"max": 20})
        );
        assert_eq!(fx.current.lock().unwrap().clone().unwrap(), json!({"max": 20}));
    }

    #[tokio::test]
    async fn test_reload_skips_unchanged_config() {
        let fx = fixture(INITIAL, false).await;
        let agent = AgentId::must("a1");
        fx.lifecycle.ensure_initialized(&agent, "cache").await.unwrap();

        // Rewrite the same content; structural diff finds nothing to apply.
        tokio::fs::write(&fx.agents_path, INITIAL).await.unwrap();

        let outcome = fx.watcher.reload_once().await.unwrap();
        assert_eq!(outcome.applied, 0);
        assert_eq!(fx.reconfigure_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_candidate_aborts_whole_reload() {
        let fx = fixture(INITIAL, false).await;
        let agent = AgentId::must("a1");
        fx.lifecycle.ensure_initialized(&agent, "cache").await.unwrap();

        // Schema violation: max must be a number.
        tokio::fs::write(
            &fx.agents_path,
            r#"{ "agents": { "a1": { "modules": { "cache": { "max": "oops" } } } } }"#,
        )
        .await
        .unwrap();

        let err = fx.watcher.reload_once().await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Nothing was applied and the live tree still resolves the old value.
        assert_eq!(fx.reconfigure_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            fx.lifecycle.running_config(&agent, "cache").unwrap(),
            json!({"max": 10})
        );
        let live = fx
            .resolver
            .resolve(&agent, &cache_manifest())
            .await
            .unwrap();
        assert_eq!(live, json!({"max": 10}));
    }

    #[tokio::test]
    async fn test_unparseable_candidate_aborts() {
        let fx = fixture(INITIAL, false).await;

        tokio::fs::write(&fx.agents_path, "{ not json").await.unwrap();
        let err = fx.watcher.reload_once().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!fx.resolver.current().agents.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_module_in_candidate_aborts() {
        let fx = fixture(INITIAL, false).await;

        tokio::fs::write(
            &fx.agents_path,
            r#"{ "agents": { "a1": { "modules": { "ghost": {} } } } }"#,
        )
        .await
        .unwrap();

        let err = fx.watcher.reload_once().await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        // Live tree untouched.
        assert!(fx
            .resolver
            .current()
            .entry(&AgentId::must("a1"))
            .unwrap()
            .modules
            .contains_key("cache"));
    }

    #[tokio::test]
    async fn test_hook_rejection_keeps_service_on_old_config() {
        let fx = fixture(INITIAL, true).await;
        let agent = AgentId::must("a1");
        fx.lifecycle.ensure_initialized(&agent, "cache").await.unwrap();

        tokio::fs::write(
            &fx.agents_path,
            r#"{ "agents": { "a1": { "modules": { "cache": { "max": 30 } } } } }"#,
        )
        .await
        .unwrap();

        let outcome = fx.watcher.reload_once().await.unwrap();
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.hook_failures, 1);

        // The tree swapped (validation passed) but the instance kept its
        // last-known-good config.
        assert_eq!(
            fx.lifecycle.running_config(&agent, "cache").unwrap(),
            json!({"max": 10})
        );
    }

    #[tokio::test]
    async fn test_reload_ignores_not_running_pairs() {
        let fx = fixture(INITIAL, false).await;

        // Nothing initialized: a changed config validates and swaps but no
        // hook fires.
        tokio::fs::write(
            &fx.agents_path,
            r#"{ "agents": { "a1": { "modules": { "cache": { "max": 50 } } } } }"#,
        )
        .await
        .unwrap();

        let outcome = fx.watcher.reload_once().await.unwrap();
        assert_eq!(outcome.validated, 1);
        assert_eq!(outcome.applied, 0);
        assert_eq!(fx.reconfigure_calls.load(Ordering::SeqCst), 0);

        // A later first-use init sees the new value.
        let agent = AgentId::must("a1");
        fx.lifecycle.ensure_initialized(&agent, "cache").await.unwrap();
        assert_eq!(fx.current.lock().unwrap().clone().unwrap(), json!({"max": 50}));
    }

    #[tokio::test]
    async fn test_disabled_agent_skipped_on_reload() {
        let fx = fixture(INITIAL, false).await;

        tokio::fs::write(
            &fx.agents_path,
            r#"{ "agents": { "a1": { "enabled": false, "modules": { "cache": { "max": "oops" } } } } }"#,
        )
        .await
        .unwrap();

        // Disabled agents are not validated; the reload succeeds.
        let outcome = fx.watcher.reload_once().await.unwrap();
        assert_eq!(outcome.validated, 0);
    }
}
