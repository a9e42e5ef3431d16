mod config;

use anyhow::Result;
use std::sync::Arc;
use svcmon_collector::catalog::default_catalog;
use svcmon_collector::orchestrator::{CollectionOrchestrator, OrchestratorOptions};
use svcmon_collector::scheduler::Scheduler;
use svcmon_collector::session::SessionManager;
use svcmon_collector::ssh::OpensshConnector;
use svcmon_sink::{build_sink, Sink};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = config::AgentConfig::load(&config_path)?;

    let level = if config.debug { "svcmon=debug" } else { "svcmon=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    config.validate()?;
    let target = config.target();
    tracing::info!(
        cluster = %target.name,
        address = %target.address,
        "svcmon-agent starting"
    );

    let sink: Arc<dyn Sink> = Arc::from(build_sink(&config.sink)?);
    let connector = Arc::new(OpensshConnector::new(config.connect_timeout()));
    let session = SessionManager::new(target, connector)
        .with_command_attempts(config.command_attempts);
    let catalog = default_catalog();

    tracing::info!(
        interval_secs = config.interval_secs,
        commands = catalog.len(),
        sink = sink.name(),
        "Starting collection loop"
    );

    let mut orchestrator = CollectionOrchestrator::new(
        session,
        catalog,
        sink,
        config.tags.clone(),
        OrchestratorOptions {
            command_timeout: config.command_timeout(),
            verbose: config.verbose,
            debug: config.debug,
        },
    );

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutting down gracefully");
        trigger.cancel();
    });

    Scheduler::new(config.interval(), config.shutdown_grace())
        .run(&mut orchestrator, shutdown)
        .await;

    Ok(())
}
