//! Persistent state store with per-(agent, service) subtree isolation.
//!
//! The tree is `agent -> service -> blob`, held in memory and persisted as
//! one JSON document with whole-store write granularity. All mutations go
//! through a single async mutex, so there is exactly one in-process writer
//! and no partial-write interleaving to reconcile. Persistence is atomic:
//! serialize to a temp file, then rename over the live file.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::types::{AgentId, Error, Result};

struct StoreShared {
    path: PathBuf,
    tree: Mutex<Map<String, Value>>,
}

/// Whole-store handle. Cheap to clone; all clones share one writer.
#[derive(Clone)]
pub struct StateStore {
    shared: Arc<StoreShared>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("path", &self.shared.path)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open the store, creating the parent directory if needed and loading
    /// any existing document. An uncreatable root or unreadable document is
    /// fatal: no tenant work can be trusted without its state.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::store(format!(
                        "cannot create store root '{}': {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let tree = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<Map<String, Value>>(&raw).map_err(|e| {
                Error::store(format!("corrupt store file '{}': {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                return Err(Error::store(format!(
                    "cannot read store file '{}': {e}",
                    path.display()
                )))
            }
        };

        Ok(Self {
            shared: Arc::new(StoreShared {
                path,
                tree: Mutex::new(tree),
            }),
        })
    }

    /// Current value of one (agent, service) subtree. Absent subtrees read
    /// as an empty object, never null.
    pub async fn read_scope(&self, agent: &AgentId, service: &str) -> Value {
        let tree = self.shared.tree.lock().await;
        tree.get(agent.as_str())
            .and_then(|per_agent| per_agent.get(service))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Replace one subtree and persist the whole store.
    pub async fn write_scope(&self, agent: &AgentId, service: &str, value: Value) -> Result<()> {
        let mut tree = self.shared.tree.lock().await;
        let per_agent = tree
            .entry(agent.as_str().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match per_agent {
            Value::Object(map) => {
                map.insert(service.to_string(), value);
            }
            other => {
                // A non-object agent node means the document was hand-edited;
                // replace it rather than fail every write forever.
                tracing::warn!(agent = %agent, "replacing non-object agent node in store");
                let mut map = Map::new();
                map.insert(service.to_string(), value);
                *other = Value::Object(map);
            }
        }
        Self::persist(&self.shared.path, &tree).await
    }

    /// Read-modify-write one subtree under the store writer lock.
    pub async fn update_scope<F>(&self, agent: &AgentId, service: &str, mutate: F) -> Result<Value>
    where
        F: FnOnce(&mut Value),
    {
        let mut tree = self.shared.tree.lock().await;
        let per_agent = tree
            .entry(agent.as_str().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !per_agent.is_object() {
            *per_agent = Value::Object(Map::new());
        }
        let map = per_agent
            .as_object_mut()
            .ok_or_else(|| Error::store("agent node is not an object"))?;
        let slot = map
            .entry(service.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        mutate(slot);
        let updated = slot.clone();
        Self::persist(&self.shared.path, &tree).await?;
        Ok(updated)
    }

    /// Drop every subtree owned by one agent and persist.
    pub async fn remove_agent(&self, agent: &AgentId) -> Result<()> {
        let mut tree = self.shared.tree.lock().await;
        if tree.remove(agent.as_str()).is_some() {
            Self::persist(&self.shared.path, &tree).await?;
        }
        Ok(())
    }

    /// Handle restricted to one (agent, service) subtree.
    pub fn scoped(&self, agent: AgentId, service: impl Into<String>) -> ScopedStore {
        ScopedStore {
            store: self.clone(),
            agent,
            service: service.into(),
        }
    }

    async fn persist(path: &Path, tree: &Map<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(tree)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::store(format!("write '{}': {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::store(format!("rename '{}': {e}", path.display())))?;
        Ok(())
    }
}

/// Exclusive view over one (agent, service) subtree.
///
/// There is no key parameter anywhere on this API: a service holding a
/// `ScopedStore` can only ever see and replace its own subtree, so no
/// caller-supplied input can escape the prefix.
#[derive(Clone)]
pub struct ScopedStore {
    store: StateStore,
    agent: AgentId,
    service: String,
}

impl std::fmt::Debug for ScopedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStore")
            .field("agent", &self.agent)
            .field("service", &self.service)
            .finish()
    }
}

impl ScopedStore {
    /// Current subtree value; an empty object when nothing was written yet.
    pub async fn read(&self) -> Value {
        self.store.read_scope(&self.agent, &self.service).await
    }

    /// Read-modify-write with a caller-supplied transform.
    pub async fn update<F>(&self, mutate: F) -> Result<Value>
    where
        F: FnOnce(&mut Value),
    {
        self.store
            .update_scope(&self.agent, &self.service, mutate)
            .await
    }

    /// Unconditional replace.
    pub async fn write(&self, value: Value) -> Result<()> {
        self.store
            .write_scope(&self.agent, &self.service, value)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_test::assert_ok;

    async fn open_temp() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_read_absent_is_empty_object() {
        let (_dir, store) = open_temp().await;
        let value = store
            .read_scope(&AgentId::must("a1"), "cache")
            .await;
        assert_eq!(value, json!({}));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, store) = open_temp().await;
        let agent = AgentId::must("a1");
        assert_ok!(store.write_scope(&agent, "cache", json!({"hits": 3})).await);
        assert_eq!(store.read_scope(&agent, "cache").await, json!({"hits": 3}));
    }

    #[tokio::test]
    async fn test_scoped_isolation_across_agents() {
        let (_dir, store) = open_temp().await;
        let a = store.scoped(AgentId::must("a1"), "cache");
        let b = store.scoped(AgentId::must("a2"), "cache");

        a.write(json!({"owner": "a1"})).await.unwrap();

        // Same service name, different agent: nothing visible.
        assert_eq!(b.read().await, json!({}));
        assert_eq!(a.read().await, json!({"owner": "a1"}));
    }

    #[tokio::test]
    async fn test_scoped_isolation_across_services() {
        let (_dir, store) = open_temp().await;
        let agent = AgentId::must("a1");
        let cache = store.scoped(agent.clone(), "cache");
        let ledger = store.scoped(agent, "ledger");

        cache.write(json!({"k": 1})).await.unwrap();
        assert_eq!(ledger.read().await, json!({}));
    }

    #[tokio::test]
    async fn test_update_read_modify_write() {
        let (_dir, store) = open_temp().await;
        let scoped = store.scoped(AgentId::must("a1"), "counter");

        scoped.write(json!({"n": 1})).await.unwrap();
        let updated = scoped
            .update(|v| {
                let n = v.get("n").and_then(Value::as_i64).unwrap_or(0);
                v["n"] = json!(n + 1);
            })
            .await
            .unwrap();
        assert_eq!(updated, json!({"n": 2}));
        assert_eq!(scoped.read().await, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let agent = AgentId::must("a1");

        {
            let store = StateStore::open(&path).await.unwrap();
            store
                .write_scope(&agent, "cache", json!({"warm": true}))
                .await
                .unwrap();
        }

        let reopened = StateStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.read_scope(&agent, "cache").await,
            json!({"warm": true})
        );
    }

    #[tokio::test]
    async fn test_remove_agent_drops_all_subtrees() {
        let (_dir, store) = open_temp().await;
        let agent = AgentId::must("a1");
        store.write_scope(&agent, "s1", json!({"x": 1})).await.unwrap();
        store.write_scope(&agent, "s2", json!({"y": 2})).await.unwrap();

        store.remove_agent(&agent).await.unwrap();
        assert_eq!(store.read_scope(&agent, "s1").await, json!({}));
        assert_eq!(store.read_scope(&agent, "s2").await, json!({}));
    }

    #[tokio::test]
    async fn test_corrupt_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let result = StateStore::open(&path).await;
        assert!(matches!(result, Err(Error::Store(_))));
    }
}
