//! vscout - on-premises VM inspection agent
//!
//! Entry point: loads configuration, opens the store, wires the
//! scheduler and services together, and serves the local API until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vs_agent::{vsphere::RestConnector, CollectorService, InspectorService, Scheduler, WorkBuilder};
use vs_config::AgentConfig;
use vs_console::{Console, ConsoleClient};
use vs_store::Store;
use vs_web::{AppState, VersionInfo, WebServer};

#[derive(Parser)]
#[command(name = "vscout", about = "On-premises VM inspection agent")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!(version = %build_version(), "starting vscout agent");

    let config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::from_env()?,
    };

    let store = Store::open(&config.store.db_path).context("opening store")?;

    // A mode persisted by a previous process wins over the config value.
    let initial_mode = match store.agent().mode()? {
        Some(mode) => mode,
        None => config
            .agent
            .mode
            .parse()
            .map_err(|err: String| anyhow::anyhow!(err))?,
    };

    let scheduler = Arc::new(Scheduler::new());
    let connector = Arc::new(RestConnector::new(config.vsphere.insecure_skip_verify));

    let collector = Arc::new(
        CollectorService::new(
            Arc::clone(&scheduler),
            WorkBuilder::new(store.clone(), connector.clone()),
            store.clone(),
        )
        .context("creating collector service")?,
    );
    let inspector = Arc::new(InspectorService::new(
        Arc::clone(&scheduler),
        WorkBuilder::new(store.clone(), connector),
        store.clone(),
    ));

    let console_client = if config.agent.console_url.is_empty() {
        None
    } else {
        Some(ConsoleClient::new(
            &config.agent.console_url,
            &config.agent.id,
            &config.agent.source_id,
        ))
    };
    let console = Arc::new(Console::new(console_client, store.clone(), initial_mode));

    let shutdown = CancellationToken::new();
    let update_loop = console.spawn_update_loop(config.update_interval(), shutdown.clone());

    let state = Arc::new(AppState {
        store,
        collector: Arc::clone(&collector),
        inspector: Arc::clone(&inspector),
        console,
        version: VersionInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_commit: env!("VERGEN_GIT_SHA").to_string(),
        },
        agent_id: config.agent.id.clone(),
    });

    let server = WebServer::new(state, &config.web.bind_address, config.web.port);

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    server.run(shutdown.clone()).await?;

    // Drain the drivers before exiting.
    inspector.stop().await;
    collector.stop().await;
    scheduler.close().await;
    let _ = update_loop.await;
    info!("agent stopped");

    Ok(())
}

fn build_version() -> String {
    let pkg = env!("CARGO_PKG_VERSION");
    let sha = env!("VERGEN_GIT_SHA");
    format!("{pkg} ({sha})")
}
