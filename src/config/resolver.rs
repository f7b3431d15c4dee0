//! Config resolution — 3-level precedence merge plus schema validation.
//!
//! For every (agent, module) pair the resolved config is built from:
//! manifest-declared field defaults, then an optional external file
//! (resolved against the configs root unless absolute; a missing file is a
//! hard error), then inline per-agent overrides. Each level shallow-merges
//! over the previous one. The merged object is validated against the
//! module's config schema before anyone sees it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::manifest::ModuleManifest;
use crate::types::{AgentId, AgentName, Error, Result};

/// Per-module config source inside an agent entry: empty, a file
/// reference, inline fields, or both (inline wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModuleConfigSource {
    /// External file reference, relative to the configs root unless absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,

    /// Inline overrides, highest precedence.
    #[serde(default, flatten)]
    pub inline: Map<String, Value>,
}

/// One agent's entry in the config source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Display/log label only; lookups always key on the agent id.
    #[serde(default)]
    pub display_name: Option<AgentName>,

    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfigSource>,
}

fn default_enabled() -> bool {
    true
}

impl Default for AgentEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            display_name: None,
            modules: BTreeMap::new(),
        }
    }
}

/// The whole per-agent config tree, keyed by opaque agent id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentsConfig {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentEntry>,
}

impl AgentsConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::config(format!("bad agents config: {e}")))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("cannot read agents config '{}': {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    /// Ids of agents marked enabled.
    pub fn enabled_agents(&self) -> Vec<AgentId> {
        self.agents
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .filter_map(|(id, _)| AgentId::from_string(id.clone()).ok())
            .collect()
    }

    pub fn entry(&self, agent: &AgentId) -> Option<&AgentEntry> {
        self.agents.get(agent.as_str())
    }
}

/// Resolves validated configs per (agent, module). Clones share the live
/// `AgentsConfig`, which the watcher replaces atomically on reload.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    configs_root: PathBuf,
    live: Arc<RwLock<AgentsConfig>>,
}

impl ConfigResolver {
    pub fn new(configs_root: impl Into<PathBuf>, agents: AgentsConfig) -> Self {
        Self {
            configs_root: configs_root.into(),
            live: Arc::new(RwLock::new(agents)),
        }
    }

    /// Snapshot of the current live config tree.
    pub fn current(&self) -> AgentsConfig {
        match self.live.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Atomically replace the live config tree (reload success path only).
    pub fn replace(&self, next: AgentsConfig) {
        match self.live.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Resolve and validate the config for one (agent, module) pair against
    /// the live tree.
    pub async fn resolve(&self, agent: &AgentId, manifest: &ModuleManifest) -> Result<Value> {
        let source = self
            .current()
            .entry(agent)
            .and_then(|entry| entry.modules.get(&manifest.name).cloned())
            .unwrap_or_default();
        self.resolve_source(&source, manifest).await
    }

    /// Resolve against an explicit tree instead of the live one. The watcher
    /// uses this to validate a candidate reload before applying anything.
    pub async fn resolve_in(
        &self,
        tree: &AgentsConfig,
        agent: &AgentId,
        manifest: &ModuleManifest,
    ) -> Result<Value> {
        let source = tree
            .entry(agent)
            .and_then(|entry| entry.modules.get(&manifest.name).cloned())
            .unwrap_or_default();
        self.resolve_source(&source, manifest).await
    }

    async fn resolve_source(
        &self,
        source: &ModuleConfigSource,
        manifest: &ModuleManifest,
    ) -> Result<Value> {
        // Level 1: manifest-declared defaults.
        let mut merged = manifest.config_schema.defaults();

        // Level 2: external file.
        if let Some(reference) = &source.config_file {
            let path = self.resolve_path(reference);
            let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
                Error::config(format!(
                    "config file '{}' for module '{}': {e}",
                    path.display(),
                    manifest.name
                ))
            })?;
            let file_value: Value = serde_json::from_str(&raw).map_err(|e| {
                Error::config(format!(
                    "config file '{}' for module '{}': {e}",
                    path.display(),
                    manifest.name
                ))
            })?;
            let file_map = file_value.as_object().ok_or_else(|| {
                Error::config(format!(
                    "config file '{}' for module '{}' must contain an object",
                    path.display(),
                    manifest.name
                ))
            })?;
            shallow_merge(&mut merged, file_map);
        }

        // Level 3: inline overrides.
        shallow_merge(&mut merged, &source.inline);

        let merged = Value::Object(merged);
        self.validate(&merged, manifest)?;
        Ok(merged)
    }

    fn resolve_path(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.configs_root.join(path)
        }
    }

    fn validate(&self, merged: &Value, manifest: &ModuleManifest) -> Result<()> {
        let schema = manifest.config_schema.to_json_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            Error::validation(format!(
                "invalid config schema for module '{}': {e}",
                manifest.name
            ))
        })?;
        validator.validate(merged).map_err(|e| {
            Error::validation(format!(
                "config for module '{}' rejected: {e}",
                manifest.name
            ))
        })?;
        Ok(())
    }
}

/// Whether a resolved config marks the service lazy. Undeclared defaults
/// to true: services start on first use unless opted into eager startup.
pub fn is_lazy(resolved: &Value) -> bool {
    resolved
        .get("lazy")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

fn shallow_merge(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}
