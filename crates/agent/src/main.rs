//! OOM kill exporter
//!
//! This binary runs as a DaemonSet on each Kubernetes node, watching the
//! kernel log for OOM kills and exporting a per-workload counter.

use anyhow::{Context, Result};
use clap::Parser;
use oomkill_agent_lib::{
    api,
    health::{components, HealthRegistry},
    kmsg::KmsgWatcher,
    AgentMetrics, DockerClient, Extractor, LabelSchema, OomKillCounter, Pipeline, Resolver,
    StructuredLogger,
};
use prometheus::Registry;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = config::Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %format!("{:#}", e), "Fatal error, exiting");
        std::process::exit(1);
    }
}

async fn run(cli: config::Cli) -> Result<()> {
    let config = config::AgentConfig::load(&cli)?;
    let listen_addr = config.listen_addr()?;
    info!(node_name = %config.node_name, "Exporter configured");

    let extractor =
        Extractor::new(&config.extractor_config()).context("Invalid extraction pattern")?;
    let strategy = extractor.strategy_name();
    let schema = LabelSchema::with_extra_labels(&config.extra_labels)
        .context("Invalid metric label schema")?;

    let lines = KmsgWatcher::new(&config.kmsg_path, config.replay_kmsg)
        .start()
        .context("Could not create log watcher")?;

    let runtime = DockerClient::connect(&config.docker_host, config.runtime_timeout())
        .await
        .context("Could not create container runtime client")?;

    // Owned registry shared by the pipeline (writer) and the HTTP server (reader)
    let registry = Registry::new();
    let counter = OomKillCounter::new(&registry, Arc::new(schema))
        .context("Failed to register OOM kill counter")?;
    let metrics = AgentMetrics::new(&registry).context("Failed to register agent metrics")?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::KMSG_SOURCE).await;
    health_registry.register(components::RUNTIME).await;

    let logger = StructuredLogger::new(&config.node_name);

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        registry.clone(),
    ));
    tokio::spawn(async move {
        // Server failures are logged, not fatal
        if let Err(e) = api::serve(listen_addr, app_state).await {
            warn!(error = %e, "Metrics server stopped");
        }
    });

    let pipeline = Pipeline::new(
        extractor,
        Resolver::new(Arc::new(runtime)),
        counter,
        metrics,
        health_registry.clone(),
        logger.clone(),
    );
    tokio::spawn(async move {
        let stats = pipeline.run(lines).await;
        info!(
            lines = stats.lines,
            recorded = stats.recorded,
            dropped = stats.dropped,
            "OOM kill pipeline finished"
        );
    });

    health_registry.set_ready(true).await;
    logger.log_startup(AGENT_VERSION, &listen_addr.to_string(), strategy);

    // Previously recorded metrics stay available after the log source closes
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    Ok(())
}
