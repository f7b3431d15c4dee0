//! Module registry — catalog discovery and factory materialization.
//!
//! Modules are discovered from three catalogs under the modules root:
//! `tools/` (tool-only), `services/` (service-only) and `modules/` (paired).
//! Each subdirectory holds a `manifest.json`. Per-module failures (bad
//! manifest, missing factory) are recorded on that module's record and
//! never abort discovery of its siblings.
//!
//! The registry is an explicitly constructed value with a defined lifetime:
//! built once at startup and replaced wholesale on rediscovery, never
//! ambient global state.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::manifest::{Catalog, ModuleManifest};
use crate::service::ServiceFactory;
use crate::types::{Error, Result};

/// Host-registered factories, keyed by module name. The Rust analogue of a
/// dynamic factory import: a service-capable manifest with no entry here
/// records a load error on that module only.
pub type FactoryMap = HashMap<String, Arc<dyn ServiceFactory>>;

/// Load outcome of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded,
    Failed,
}

/// Tool surface advertised by a module.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub module: String,
    pub description: String,
}

/// One discovered module: descriptor plus load outcome and, when valid,
/// its materialized service factory and/or tool list.
#[derive(Clone)]
pub struct LoadedModule {
    pub name: String,
    pub manifest: Option<ModuleManifest>,
    pub status: LoadStatus,
    pub error: Option<String>,
    pub factory: Option<Arc<dyn ServiceFactory>>,
    pub tools: Vec<ToolDescriptor>,
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("error", &self.error)
            .field("has_factory", &self.factory.is_some())
            .field("tools", &self.tools)
            .finish()
    }
}

impl LoadedModule {
    fn failed(name: impl Into<String>, manifest: Option<ModuleManifest>, error: String) -> Self {
        Self {
            name: name.into(),
            manifest,
            status: LoadStatus::Failed,
            error: Some(error),
            factory: None,
            tools: Vec::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.status == LoadStatus::Loaded
    }
}

/// Snapshot of all discovered modules.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, LoadedModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any existing one with the same name.
    pub fn insert(&mut self, module: LoadedModule) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn get(&self, name: &str) -> Option<&LoadedModule> {
        self.modules.get(name)
    }

    /// Record for a module, or a typed error naming it.
    pub fn require(&self, name: &str) -> Result<&LoadedModule> {
        self.modules
            .get(name)
            .ok_or_else(|| Error::not_found(format!("unknown module: {name}")))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadedModule> {
        self.modules.values()
    }

    /// All advertised tools across loaded modules.
    pub fn advertised_tools(&self) -> Vec<ToolDescriptor> {
        self.modules
            .values()
            .filter(|m| m.is_loaded())
            .flat_map(|m| m.tools.iter().cloned())
            .collect()
    }

    /// Count of modules that failed to load.
    pub fn failed_count(&self) -> usize {
        self.modules
            .values()
            .filter(|m| m.status == LoadStatus::Failed)
            .count()
    }
}

/// Registry handle shared across subsystems. Rediscovery swaps the whole
/// snapshot under the write lock; readers always see one consistent set.
pub type SharedRegistry = Arc<RwLock<ModuleRegistry>>;

pub fn shared(registry: ModuleRegistry) -> SharedRegistry {
    Arc::new(RwLock::new(registry))
}

/// Discovers modules from the catalogs and materializes factories.
pub struct ModuleLoader {
    modules_root: PathBuf,
    factories: FactoryMap,
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("modules_root", &self.modules_root)
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleLoader {
    pub fn new(modules_root: impl Into<PathBuf>, factories: FactoryMap) -> Self {
        Self {
            modules_root: modules_root.into(),
            factories,
        }
    }

    /// Walk all three catalogs and build a fresh registry snapshot.
    ///
    /// The returned registry replaces any previous one wholesale; no stale
    /// entries survive a rediscovery.
    pub async fn discover_all(&self) -> Result<ModuleRegistry> {
        let mut registry = ModuleRegistry::new();

        for catalog in Catalog::all() {
            let dir = self.modules_root.join(catalog.dir_name());
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::config(format!(
                        "cannot read catalog '{}': {e}",
                        dir.display()
                    )))
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let dir_name = entry.file_name().to_string_lossy().to_string();
                let record = self.load_one(&dir_name, &path, catalog).await;

                if registry.get(&record.name).is_some() {
                    tracing::warn!(
                        module = %record.name,
                        catalog = catalog.dir_name(),
                        "duplicate module name, keeping first discovery"
                    );
                    continue;
                }
                if let Some(err) = &record.error {
                    tracing::warn!(module = %record.name, error = %err, "module load failed");
                }
                registry.insert(record);
            }
        }

        tracing::info!(
            modules = registry.len(),
            failed = registry.failed_count(),
            "module discovery complete"
        );
        Ok(registry)
    }

    async fn load_one(&self, dir_name: &str, path: &PathBuf, catalog: Catalog) -> LoadedModule {
        let manifest_path = path.join("manifest.json");
        let raw = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(raw) => raw,
            Err(e) => {
                return LoadedModule::failed(dir_name, None, format!("cannot read manifest: {e}"))
            }
        };

        let manifest = match ModuleManifest::parse(&raw) {
            Ok(m) => m,
            Err(e) => return LoadedModule::failed(dir_name, None, e.to_string()),
        };

        if let Err(e) = manifest.validate(catalog) {
            let name = manifest.name.clone();
            return LoadedModule::failed(name, Some(manifest), e.to_string());
        }

        let name = manifest.name.clone();

        let factory = if manifest.provides_service() {
            match self.factories.get(&name) {
                Some(factory) => Some(factory.clone()),
                None => {
                    return LoadedModule::failed(
                        name.clone(),
                        Some(manifest),
                        format!("no service factory registered for '{name}'"),
                    )
                }
            }
        } else {
            None
        };

        let tools = if manifest.provides_tool() && manifest.advertise {
            vec![ToolDescriptor {
                name: name.clone(),
                module: name.clone(),
                description: manifest.description.clone(),
            }]
        } else {
            Vec::new()
        };

        LoadedModule {
            name,
            manifest: Some(manifest),
            status: LoadStatus::Loaded,
            error: None,
            factory,
            tools,
        }
    }
}
