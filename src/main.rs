//! Valet runtime - main entry point.
//!
//! Boots the full runtime: module discovery, agents config, state store,
//! eager initialization, config watcher and snapshot loop. Runs until
//! SIGINT/SIGTERM, then shuts down gracefully with a final state snapshot.

use valet_core::registry::FactoryMap;
use valet_core::runtime::Runtime;
use valet_core::types::config::RuntimeConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration: explicit path via VALET_CONFIG, defaults otherwise
    let config = match std::env::var("VALET_CONFIG") {
        Ok(path) => RuntimeConfig::load(std::path::Path::new(&path))?,
        Err(_) => RuntimeConfig::default(),
    };

    // Initialize observability
    valet_core::observability::init_tracing_from(&config.observability);

    // Service factories registered by the embedding host. The standalone
    // binary starts with none; tool-only modules are still discovered and
    // advertised.
    let factories = FactoryMap::new();

    let runtime = Runtime::start(config, factories).await?;

    let report = runtime.eager_report();
    tracing::info!(
        started = report.started,
        failed = report.errors.len(),
        "🚀 Valet runtime up"
    );
    for err in &report.errors {
        tracing::warn!(agent = %err.agent, service = %err.service, error = %err.message, "eager service failed");
    }
    for tool in runtime.advertised_tools() {
        tracing::info!(tool = %tool.name, module = %tool.module, "  ✓ tool advertised");
    }

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    runtime.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("sigterm handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
