//! Schema gateway binary.
//!
//! Loads settings, serves the configuration rows file, and hot-reloads it on
//! change until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use schema_gateway::config::load_or_default;
use schema_gateway::datasource::DataSourceRegistry;
use schema_gateway::lifecycle::{self, change_source_from_config};
use schema_gateway::observability::{logging, metrics};
use schema_gateway::store::{ConfigStore, FileConfigStore};

#[derive(Parser)]
#[command(name = "schema-gateway")]
#[command(about = "Graph API gateway with hot-reloaded schema configuration", long_about = None)]
struct Cli {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the rows file from the settings.
    #[arg(short, long)]
    store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_or_default(cli.config.as_deref())?;
    if let Some(store) = cli.store {
        config.store.path = store;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "schema-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        store = ?config.store.path,
        debounce_ms = config.reload.debounce_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(&config.store.path));
    let change_source = change_source_from_config(&config.reload, &config.store.path);
    let running = lifecycle::start(
        &config,
        store,
        DataSourceRegistry::with_builtins(),
        change_source,
    )
    .await?;

    let report = running.serve_until(lifecycle::wait_for_shutdown()).await;
    if !report.is_clean() {
        tracing::warn!(failed = ?report.failed_steps(), "Shutdown completed with errors");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
