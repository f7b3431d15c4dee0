//! Background state snapshots.
//!
//! SnapshotService periodically exports every live service's in-memory state
//! through its state-export hook and persists it, so a restart restores
//! recent state instead of starting cold. A final pass also runs on shutdown
//! from the runtime, independent of this loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::interval;

use crate::runtime::lifecycle::LifecycleManager;
use crate::types::config::SnapshotConfig;

/// Statistics from one snapshot cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Number of service states exported and persisted
    pub exported: usize,
    /// Number of services whose export or write failed
    pub failed: usize,
    /// When the cycle completed
    pub completed_at: Option<DateTime<Utc>>,
}

/// SnapshotService drives the periodic snapshot loop.
#[derive(Debug)]
pub struct SnapshotService {
    lifecycle: Arc<LifecycleManager>,
    config: SnapshotConfig,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl SnapshotService {
    pub fn new(lifecycle: Arc<LifecycleManager>, config: SnapshotConfig) -> Self {
        Self {
            lifecycle,
            config,
            stop_tx: None,
        }
    }

    /// Start the snapshot loop in the background.
    /// Returns immediately; snapshots run in a spawned task.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let lifecycle = self.lifecycle.clone();
        let period = self.config.interval;
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            // The first tick fires immediately; skip it so a fresh boot
            // doesn't snapshot before anything ran.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = Self::run_cycle(&lifecycle).await;
                        if stats.failed > 0 {
                            tracing::warn!(
                                exported = stats.exported,
                                failed = stats.failed,
                                "snapshot cycle finished with failures"
                            );
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("snapshot service stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the snapshot loop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Run a single snapshot cycle over all live services.
    pub async fn run_cycle(lifecycle: &Arc<LifecycleManager>) -> SnapshotStats {
        let report = lifecycle.snapshot_all().await;
        let stats = SnapshotStats {
            exported: report.exported,
            failed: report.failures.len(),
            completed_at: Some(Utc::now()),
        };
        tracing::debug!(
            exported = stats.exported,
            failed = stats.failed,
            "snapshot cycle completed"
        );
        stats
    }
}
