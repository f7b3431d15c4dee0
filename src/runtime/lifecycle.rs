//! Service lifecycle management — the runtime core.
//!
//! Tracks one state machine per (agent, service) pair:
//!
//! ```text
//! UNINITIALIZED → INITIALIZING → RUNNING → (RECONFIGURING → RUNNING | FAILED)
//!                                      ↓
//!                                 CLEANED_UP
//! ```
//!
//! `FAILED` is only left by a fresh caller invocation (the explicit retry);
//! `CLEANED_UP` is terminal for the instance. Initialization resolves the
//! dependency graph depth-first with per-call cycle detection, and concurrent
//! first-calls for one pair coalesce on a per-pair gate instead of
//! double-constructing.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::resolver::{is_lazy, ConfigResolver};
use crate::registry::SharedRegistry;
use crate::service::{PeerLookup, Service, ServiceContext, ServiceFactory};
use crate::store::StateStore;
use crate::types::{AgentId, Error, Result};

/// Lifecycle state of one (agent, service) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Running,
    Reconfiguring,
    Failed,
    CleanedUp,
}

impl ServiceState {
    /// Check if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        self == ServiceState::CleanedUp
    }

    /// Check if the instance is live (holds a cached service object).
    pub fn is_live(self) -> bool {
        matches!(self, ServiceState::Running | ServiceState::Reconfiguring)
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: ServiceState) -> bool {
        match (self, to) {
            (ServiceState::Uninitialized, ServiceState::Initializing) => true,
            (ServiceState::Initializing, ServiceState::Running) => true,
            (ServiceState::Initializing, ServiceState::Failed) => true,
            // Cycle or dependency failure: the pair never started its own init
            (ServiceState::Initializing, ServiceState::Uninitialized) => true,
            (ServiceState::Running, ServiceState::Reconfiguring) => true,
            (ServiceState::Running, ServiceState::CleanedUp) => true,
            (ServiceState::Reconfiguring, ServiceState::Running) => true,
            (ServiceState::Reconfiguring, ServiceState::CleanedUp) => true,
            // Explicit retry re-enters initialization
            (ServiceState::Failed, ServiceState::Initializing) => true,
            (ServiceState::Failed, ServiceState::CleanedUp) => true,
            (ServiceState::CleanedUp, _) => false,
            _ => false,
        }
    }
}

#[derive(Clone)]
struct LiveInstance {
    instance: Arc<dyn Service>,
    config: Value,
}

enum SlotState {
    Idle,
    Initializing,
    Running(LiveInstance),
    Reconfiguring(LiveInstance),
    Failed(String),
    CleanedUp,
}

impl SlotState {
    fn public(&self) -> ServiceState {
        match self {
            SlotState::Idle => ServiceState::Uninitialized,
            SlotState::Initializing => ServiceState::Initializing,
            SlotState::Running(_) => ServiceState::Running,
            SlotState::Reconfiguring(_) => ServiceState::Reconfiguring,
            SlotState::Failed(_) => ServiceState::Failed,
            SlotState::CleanedUp => ServiceState::CleanedUp,
        }
    }
}

/// One tracked pair. The gate serializes lifecycle transitions for the pair;
/// the state mutex is only ever held for non-awaiting reads and writes.
struct SlotCell {
    gate: Arc<AsyncMutex<()>>,
    state: StdMutex<SlotState>,
}

impl SlotCell {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Arc::new(AsyncMutex::new(())),
            state: StdMutex::new(SlotState::Idle),
        })
    }

    fn set(&self, next: SlotState) {
        *lock(&self.state) = next;
    }
}

type PairKey = (AgentId, String);
type SlotMap = HashMap<PairKey, Arc<SlotCell>>;

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cross-call wait graph over the pair gates.
///
/// The per-call visiting set only sees one call's own walk. Two calls that
/// enter a dependency cycle from different nodes each hold their entry gate
/// and block on the other's, which neither visiting set can see. Every call
/// therefore registers the gates it holds and the one gate it is about to
/// block on; a wait whose holder chain leads back to the waiting call would
/// deadlock and is refused with a cycle error instead.
#[derive(Default)]
struct WaitGraph {
    holders: HashMap<PairKey, u64>,
    waiting: HashMap<u64, PairKey>,
}

impl WaitGraph {
    /// Service names along the holder chain when blocking `call` on `target`
    /// would close a loop, `None` when the wait is safe.
    fn closes_loop(&self, call: u64, target: &PairKey) -> Option<Vec<String>> {
        let mut path = vec![target.1.clone()];
        let mut cur = target;
        for _ in 0..=self.holders.len() {
            let holder = self.holders.get(cur)?;
            if *holder == call {
                return Some(path);
            }
            cur = self.waiting.get(holder)?;
            path.push(cur.1.clone());
        }
        None
    }
}

/// Removes this call's wait edge on drop, including when the blocked gate
/// acquisition is dropped mid-await.
struct WaitEdge {
    graph: Arc<StdMutex<WaitGraph>>,
    call: u64,
}

impl Drop for WaitEdge {
    fn drop(&mut self) {
        lock(&self.graph).waiting.remove(&self.call);
    }
}

/// Removes this call's holder entry on drop, unless a later acquirer of the
/// same gate already overwrote it.
struct HoldGuard {
    graph: Arc<StdMutex<WaitGraph>>,
    key: PairKey,
    call: u64,
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        let mut graph = lock(&self.graph);
        if graph.holders.get(&self.key) == Some(&self.call) {
            graph.holders.remove(&self.key);
        }
    }
}

/// Read-only peer accessor handed to service contexts. Looks only at the
/// already-resolved cache and never starts an initialization, so a service
/// calling it from inside a lifecycle hook cannot re-enter the manager.
struct Peers {
    slots: Weak<StdMutex<SlotMap>>,
    agent: AgentId,
}

impl PeerLookup for Peers {
    fn get(&self, service: &str) -> Option<Arc<dyn Service>> {
        let slots = self.slots.upgrade()?;
        let guard = lock(&slots);
        let cell = guard.get(&(self.agent.clone(), service.to_string()))?;
        let state = lock(&cell.state);
        match &*state {
            SlotState::Running(live) | SlotState::Reconfiguring(live) => {
                Some(live.instance.clone())
            }
            _ => None,
        }
    }
}

/// Outcome of an eager initialization pass.
#[derive(Debug, Default)]
pub struct EagerReport {
    pub started: usize,
    pub errors: Vec<EagerError>,
}

impl EagerReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One failed eager bring-up, naming the pair.
#[derive(Debug)]
pub struct EagerError {
    pub agent: AgentId,
    pub service: String,
    pub message: String,
}

/// Outcome of a snapshot pass.
#[derive(Debug, Default)]
pub struct SnapshotReport {
    pub exported: usize,
    pub failures: Vec<(AgentId, String, String)>,
}

/// The per-(agent, service) lifecycle manager.
pub struct LifecycleManager {
    registry: SharedRegistry,
    resolver: ConfigResolver,
    store: StateStore,
    slots: Arc<StdMutex<SlotMap>>,
    waits: Arc<StdMutex<WaitGraph>>,
    next_call: AtomicU64,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("pairs", &lock(&self.slots).len())
            .finish_non_exhaustive()
    }
}

enum InitError {
    /// Failed before this pair's own init ran (cycle, dependency failure,
    /// unknown module). The pair goes back to UNINITIALIZED.
    Before(Error),
    /// This pair's own initialization failed. The pair is FAILED.
    During(Error),
}

impl LifecycleManager {
    pub fn new(registry: SharedRegistry, resolver: ConfigResolver, store: StateStore) -> Self {
        Self {
            registry,
            resolver,
            store,
            slots: Arc::new(StdMutex::new(SlotMap::new())),
            waits: Arc::new(StdMutex::new(WaitGraph::default())),
            next_call: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state of a pair.
    pub fn state_of(&self, agent: &AgentId, service: &str) -> ServiceState {
        let guard = lock(&self.slots);
        guard
            .get(&(agent.clone(), service.to_string()))
            .map(|cell| lock(&cell.state).public())
            .unwrap_or(ServiceState::Uninitialized)
    }

    /// Last recorded initialization error for a FAILED pair.
    pub fn last_error(&self, agent: &AgentId, service: &str) -> Option<String> {
        let guard = lock(&self.slots);
        let cell = guard.get(&(agent.clone(), service.to_string()))?;
        let state = lock(&cell.state);
        match &*state {
            SlotState::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }

    /// Resolved config the live instance is currently running on.
    pub fn running_config(&self, agent: &AgentId, service: &str) -> Option<Value> {
        let guard = lock(&self.slots);
        let cell = guard.get(&(agent.clone(), service.to_string()))?;
        let state = lock(&cell.state);
        match &*state {
            SlotState::Running(live) | SlotState::Reconfiguring(live) => Some(live.config.clone()),
            _ => None,
        }
    }

    /// Idempotently bring one (agent, service) pair to RUNNING and return the
    /// cached instance.
    ///
    /// Dependencies (service-declared ∪ manifest-declared) are brought up
    /// depth-first; a dependency cycle fails the whole call with a `Cycle`
    /// error and leaves every not-yet-completed pair uninitialized — also
    /// when the cycle is only closed across two concurrent calls entering it
    /// from different nodes. Concurrent first-calls for the same pair
    /// coalesce: one task runs the initialization, the rest wait and receive
    /// the cached instance.
    pub async fn ensure_initialized(
        &self,
        agent: &AgentId,
        service: &str,
    ) -> Result<Arc<dyn Service>> {
        let call = self.next_call.fetch_add(1, Ordering::Relaxed);
        let mut visiting = Vec::new();
        self.ensure_inner(agent, service.to_string(), call, &mut visiting)
            .await
    }

    fn ensure_inner<'a>(
        &'a self,
        agent: &'a AgentId,
        service: String,
        call: u64,
        visiting: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Arc<dyn Service>>> {
        Box::pin(async move {
            if visiting.contains(&service) {
                let mut path = visiting.clone();
                path.push(service.clone());
                return Err(Error::cycle(path));
            }

            let key = (agent.clone(), service.clone());

            // Acquire the pair gate; re-fetch if a teardown swapped the cell
            // out from under us while we were waiting. A wait whose holder
            // chain leads back to this call is a cross-call cycle and fails
            // here instead of blocking forever.
            let (cell, _gate, _hold) = loop {
                let cell = self.cell(agent, &service);
                let edge = {
                    let mut graph = lock(&self.waits);
                    if let Some(chain) = graph.closes_loop(call, &key) {
                        let mut path = visiting.clone();
                        path.extend(chain);
                        return Err(Error::cycle(path));
                    }
                    graph.waiting.insert(call, key.clone());
                    WaitEdge {
                        graph: self.waits.clone(),
                        call,
                    }
                };
                let gate = cell.gate.clone().lock_owned().await;
                drop(edge);
                let hold = {
                    lock(&self.waits).holders.insert(key.clone(), call);
                    HoldGuard {
                        graph: self.waits.clone(),
                        key: key.clone(),
                        call,
                    }
                };
                if self.cell_is_current(agent, &service, &cell) {
                    break (cell, gate, hold);
                }
            };

            {
                let state = lock(&cell.state);
                match &*state {
                    SlotState::Running(live) | SlotState::Reconfiguring(live) => {
                        return Ok(live.instance.clone());
                    }
                    SlotState::CleanedUp => {
                        return Err(Error::state_transition(format!(
                            "'{service}' for agent '{agent}' is cleaned up"
                        )));
                    }
                    _ => {}
                }
            }

            cell.set(SlotState::Initializing);
            match self.initialize(agent, &service, call, visiting).await {
                Ok(live) => {
                    let instance = live.instance.clone();
                    cell.set(SlotState::Running(live));
                    tracing::info!(agent = %agent, service = %service, "service running");
                    Ok(instance)
                }
                Err(InitError::Before(e)) => {
                    cell.set(SlotState::Idle);
                    Err(e)
                }
                Err(InitError::During(e)) => {
                    tracing::warn!(agent = %agent, service = %service, error = %e, "service initialization failed");
                    cell.set(SlotState::Failed(e.to_string()));
                    Err(e)
                }
            }
        })
    }

    async fn initialize(
        &self,
        agent: &AgentId,
        service: &str,
        call: u64,
        visiting: &mut Vec<String>,
    ) -> std::result::Result<LiveInstance, InitError> {
        let (manifest, factory) = self.lookup(service).map_err(InitError::Before)?;
        let instance = factory.create();

        // Service-declared ∪ manifest-declared, first-seen order.
        let mut deps = instance.dependencies();
        for dep in &manifest.dependencies {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }

        visiting.push(service.to_string());
        let mut dep_failure = None;
        for dep in deps {
            if let Err(e) = self.ensure_inner(agent, dep, call, &mut *visiting).await {
                dep_failure = Some(e);
                break;
            }
        }
        visiting.pop();
        if let Some(e) = dep_failure {
            return Err(InitError::Before(e));
        }

        let config = self
            .resolver
            .resolve(agent, &manifest)
            .await
            .map_err(InitError::During)?;

        let scoped = self.store.scoped(agent.clone(), service);
        let peers = Arc::new(Peers {
            slots: Arc::downgrade(&self.slots),
            agent: agent.clone(),
        });
        let ctx = ServiceContext::new(agent.clone(), scoped, peers);

        if let Err(e) = instance.init(agent, &config, ctx).await {
            self.best_effort_cleanup(agent, service, &instance).await;
            return Err(InitError::During(Error::service(
                service,
                agent.as_str(),
                e.to_string(),
            )));
        }

        // Restore persisted state, if any, through the restore hook.
        let snapshot = self.store.read_scope(agent, service).await;
        let has_state = snapshot
            .as_object()
            .map(|map| !map.is_empty())
            .unwrap_or(true);
        if has_state {
            if let Err(e) = instance.restore_state(snapshot).await {
                self.best_effort_cleanup(agent, service, &instance).await;
                return Err(InitError::During(Error::service(
                    service,
                    agent.as_str(),
                    format!("state restore failed: {e}"),
                )));
            }
        }

        Ok(LiveInstance { instance, config })
    }

    /// Eagerly bring up every enabled agent's non-lazy services in
    /// dependency order. Failures are recorded per pair; later pairs and
    /// later agents are still processed.
    pub async fn initialize_eager(&self) -> EagerReport {
        let tree = self.resolver.current();
        let mut report = EagerReport::default();

        for agent in tree.enabled_agents() {
            let Some(entry) = tree.entry(&agent) else {
                continue;
            };

            let mut eager: Vec<(String, Vec<String>)> = Vec::new();
            for module_name in entry.modules.keys() {
                let manifest = {
                    let registry = match self.registry.read() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    match registry.get(module_name) {
                        Some(record) if record.is_loaded() => record.manifest.clone(),
                        Some(record) => {
                            report.errors.push(EagerError {
                                agent: agent.clone(),
                                service: module_name.clone(),
                                message: format!(
                                    "module failed to load: {}",
                                    record.error.as_deref().unwrap_or("unknown error")
                                ),
                            });
                            continue;
                        }
                        None => {
                            report.errors.push(EagerError {
                                agent: agent.clone(),
                                service: module_name.clone(),
                                message: format!("unknown module: {module_name}"),
                            });
                            continue;
                        }
                    }
                };
                let Some(manifest) = manifest else { continue };
                // Tool-only modules have no service to start.
                if !manifest.provides_service() {
                    continue;
                }
                match self.resolver.resolve(&agent, &manifest).await {
                    Ok(config) => {
                        if !is_lazy(&config) {
                            eager.push((module_name.clone(), manifest.dependencies.clone()));
                        }
                    }
                    Err(e) => {
                        report.errors.push(EagerError {
                            agent: agent.clone(),
                            service: module_name.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            for service in topo_order(eager) {
                match self.ensure_initialized(&agent, &service).await {
                    Ok(_) => report.started += 1,
                    Err(e) => {
                        tracing::warn!(agent = %agent, service = %service, error = %e, "eager initialization failed");
                        report.errors.push(EagerError {
                            agent: agent.clone(),
                            service,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            started = report.started,
            failed = report.errors.len(),
            "eager initialization pass complete"
        );
        report
    }

    /// Apply a config change to a RUNNING instance via its reconfigure hook.
    ///
    /// A hook failure leaves the instance RUNNING on its last-known-good
    /// config; no automatic restart.
    pub async fn apply_config_change(
        &self,
        agent: &AgentId,
        service: &str,
        old: &Value,
        new: &Value,
    ) -> Result<()> {
        let cell = {
            let guard = lock(&self.slots);
            guard
                .get(&(agent.clone(), service.to_string()))
                .cloned()
                .ok_or_else(|| {
                    Error::state_transition(format!(
                        "cannot reconfigure '{service}' for agent '{agent}': not running"
                    ))
                })?
        };
        let _gate = cell.gate.clone().lock_owned().await;

        let live = {
            let state = lock(&cell.state);
            match &*state {
                SlotState::Running(live) => live.clone(),
                other => {
                    return Err(Error::state_transition(format!(
                        "cannot reconfigure '{service}' for agent '{agent}': state is {:?}",
                        other.public()
                    )))
                }
            }
        };

        cell.set(SlotState::Reconfiguring(live.clone()));
        match live.instance.reconfigure(old, new).await {
            Ok(()) => {
                cell.set(SlotState::Running(LiveInstance {
                    instance: live.instance,
                    config: new.clone(),
                }));
                tracing::info!(agent = %agent, service = %service, "config change applied");
                Ok(())
            }
            Err(e) => {
                // Roll back to the last-known-good config; instance stays live.
                cell.set(SlotState::Running(live));
                tracing::warn!(agent = %agent, service = %service, error = %e, "reconfigure hook failed, keeping previous config");
                Err(Error::service(service, agent.as_str(), e.to_string()))
            }
        }
    }

    /// Export every live instance's state through its state-export hook and
    /// persist each snapshot atomically to the instance's subtree.
    pub async fn snapshot_all(&self) -> SnapshotReport {
        let live: Vec<(AgentId, String, Arc<dyn Service>)> = {
            let guard = lock(&self.slots);
            guard
                .iter()
                .filter_map(|((agent, service), cell)| {
                    let state = lock(&cell.state);
                    match &*state {
                        SlotState::Running(l) | SlotState::Reconfiguring(l) => {
                            Some((agent.clone(), service.clone(), l.instance.clone()))
                        }
                        _ => None,
                    }
                })
                .collect()
        };

        let mut report = SnapshotReport::default();
        for (agent, service, instance) in live {
            match instance.export_state().await {
                Ok(Some(snapshot)) => {
                    match self.store.write_scope(&agent, &service, snapshot).await {
                        Ok(()) => report.exported += 1,
                        Err(e) => {
                            tracing::warn!(agent = %agent, service = %service, error = %e, "snapshot write failed");
                            report.failures.push((agent, service, e.to_string()));
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(agent = %agent, service = %service, error = %e, "state export failed");
                    report.failures.push((agent, service, e.to_string()));
                }
            }
        }
        report
    }

    /// Tear down every live instance for one agent. Cleanup hooks are
    /// best-effort: a failing hook is logged and its siblings still run.
    ///
    /// Pairs that entered the lifecycle end CLEANED_UP, which is terminal:
    /// a later `ensure_initialized` for them is refused. Pairs that never
    /// got past UNINITIALIZED are simply forgotten.
    pub async fn teardown(&self, agent: &AgentId) {
        let cells: Vec<(String, Arc<SlotCell>)> = {
            let guard = lock(&self.slots);
            guard
                .iter()
                .filter(|((a, _), _)| a == agent)
                .map(|((_, service), cell)| (service.clone(), cell.clone()))
                .collect()
        };

        for (service, cell) in &cells {
            let _gate = cell.gate.clone().lock_owned().await;
            let live = {
                let state = lock(&cell.state);
                match &*state {
                    SlotState::Running(l) | SlotState::Reconfiguring(l) => Some(l.clone()),
                    _ => None,
                }
            };
            if let Some(live) = live {
                if let Err(e) = live.instance.cleanup().await {
                    tracing::warn!(agent = %agent, service = %service, error = %e, "cleanup hook failed");
                }
            }
            let mut state = lock(&cell.state);
            if !matches!(&*state, SlotState::Idle) {
                *state = SlotState::CleanedUp;
            }
        }

        let mut guard = lock(&self.slots);
        guard.retain(|(a, _), cell| a != agent || !matches!(&*lock(&cell.state), SlotState::Idle));
        tracing::info!(agent = %agent, services = cells.len(), "agent torn down");
    }

    /// Tear down every agent with any tracked pair.
    pub async fn teardown_all(&self) {
        let agents: Vec<AgentId> = {
            let guard = lock(&self.slots);
            let mut agents: Vec<AgentId> = guard.keys().map(|(a, _)| a.clone()).collect();
            agents.sort();
            agents.dedup();
            agents
        };
        for agent in agents {
            self.teardown(&agent).await;
        }
    }

    fn lookup(
        &self,
        service: &str,
    ) -> Result<(crate::manifest::ModuleManifest, Arc<dyn ServiceFactory>)> {
        let registry = match self.registry.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let record = registry.require(service)?;
        if !record.is_loaded() {
            return Err(Error::validation(format!(
                "module '{service}' failed to load: {}",
                record.error.as_deref().unwrap_or("unknown error")
            )));
        }
        let manifest = record
            .manifest
            .clone()
            .ok_or_else(|| Error::validation(format!("module '{service}' has no manifest")))?;
        if !manifest.provides_service() {
            return Err(Error::validation(format!(
                "module '{service}' provides no service capability"
            )));
        }
        let factory = record
            .factory
            .clone()
            .ok_or_else(|| Error::validation(format!("module '{service}' has no factory")))?;
        Ok((manifest, factory))
    }

    async fn best_effort_cleanup(&self, agent: &AgentId, service: &str, instance: &Arc<dyn Service>) {
        if let Err(e) = instance.cleanup().await {
            tracing::warn!(agent = %agent, service = %service, error = %e, "cleanup of partially-constructed instance failed");
        }
    }

    fn cell(&self, agent: &AgentId, service: &str) -> Arc<SlotCell> {
        let mut guard = lock(&self.slots);
        guard
            .entry((agent.clone(), service.to_string()))
            .or_insert_with(SlotCell::new)
            .clone()
    }

    fn cell_is_current(&self, agent: &AgentId, service: &str, cell: &Arc<SlotCell>) -> bool {
        let guard = lock(&self.slots);
        guard
            .get(&(agent.clone(), service.to_string()))
            .map(|current| Arc::ptr_eq(current, cell))
            .unwrap_or(false)
    }
}

/// Kahn's algorithm over the eager set, deterministic by name. Edges only
/// count dependencies inside the set; anything left over (a cycle) is
/// appended so the subsequent ensure call reports it properly.
fn topo_order(nodes: Vec<(String, Vec<String>)>) -> Vec<String> {
    use std::collections::BTreeMap;

    let names: Vec<String> = nodes.iter().map(|(n, _)| n.clone()).collect();
    let mut indegree: BTreeMap<&str, usize> = names.iter().map(|n| (n.as_str(), 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (name, deps) in &nodes {
        for dep in deps {
            if indegree.contains_key(dep.as_str()) {
                *indegree.entry(name.as_str()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }
    }

    let mut ordered = Vec::with_capacity(names.len());
    loop {
        let next = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .next();
        let Some(node) = next else { break };
        indegree.remove(node);
        ordered.push(node.to_string());
        if let Some(children) = dependents.get(node) {
            for child in children {
                if let Some(d) = indegree.get_mut(child) {
                    *d = d.saturating_sub(1);
                }
            }
        }
    }

    // Leftovers are cyclic; keep them so bring-up surfaces the cycle error.
    for (node, _) in indegree {
        ordered.push(node.to_string());
    }
    ordered
}
