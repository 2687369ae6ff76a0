//! Startup orchestration.
//!
//! # Order
//! ```text
//! 1. Wire store → builder → lifecycle → controller → gateway
//! 2. Build and connect generation 1 (fatal on any error)
//! 3. Start the reload worker
//! 4. Bind listeners (query API, then admin API when enabled)
//! 5. Start change notifications
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start after the first generation is bound, so traffic only
//!   arrives once the gateway can answer it
//! - A failure after step 2 runs the regular shutdown sequence before
//!   returning, so no data source stays connected

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{self, AdminState};
use crate::config::{FileChangeSource, GatewayConfig, LoadError, ReloadConfig};
use crate::datasource::{DataSourceLifecycle, DataSourceRegistry};
use crate::http::{HttpServer, ServingGateway};
use crate::lifecycle::shutdown::{Shutdown, ShutdownReport, ShutdownSequence};
use crate::lifecycle::signals::SignalChangeSource;
use crate::pubsub::PubSub;
use crate::reload::{
    ChangeDebouncer, ChangeSource, CombinedChangeSource, ReloadController, ReloadError,
    ReloadHandle, WatchError,
};
use crate::schema::{SchemaBuilder, SdlCompiler};
use crate::store::ConfigStore;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("settings: {0}")]
    Settings(#[from] LoadError),

    #[error("initial configuration: {0}")]
    Reload(#[from] ReloadError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("change notifications: {0}")]
    Watch(#[from] WatchError),
}

/// Build the change source the settings ask for, debounced.
pub fn change_source_from_config(
    config: &ReloadConfig,
    store_path: &Path,
) -> Option<Box<dyn ChangeSource>> {
    let mut combined = CombinedChangeSource::new();
    if config.watch_store {
        combined = combined.with(Box::new(FileChangeSource::new(store_path)));
    }
    if config.reload_on_sighup {
        combined = combined.with(Box::new(SignalChangeSource::new()));
    }
    if combined.is_empty() {
        return None;
    }
    Some(Box::new(ChangeDebouncer::new(combined, config.debounce())))
}

/// A started gateway. Dropping it without [`RunningGateway::shutdown`] leaves
/// data sources connected.
pub struct RunningGateway {
    controller: Arc<ReloadController>,
    reload: ReloadHandle,
    store: Arc<dyn ConfigStore>,
    shutdown: Shutdown,
    servers: Vec<JoinHandle<Result<(), std::io::Error>>>,
    worker: JoinHandle<()>,
    change_source: Option<Box<dyn ChangeSource>>,
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    shutdown_timeout: Duration,
}

impl RunningGateway {
    pub fn controller(&self) -> &Arc<ReloadController> {
        &self.controller
    }

    pub fn gateway(&self) -> &ServingGateway {
        self.controller.gateway()
    }

    pub fn reload_handle(&self) -> &ReloadHandle {
        &self.reload
    }

    /// Address of the query API listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Serve until `stop` resolves, then shut down. A failed stop future
    /// (e.g. signal registration) still leads to a full shutdown.
    pub async fn serve_until<F>(self, stop: F) -> ShutdownReport
    where
        F: Future<Output = std::io::Result<&'static str>>,
    {
        match stop.await {
            Ok(reason) => tracing::info!(reason, "Shutdown requested"),
            Err(e) => tracing::error!(error = %e, "Waiting for shutdown failed; shutting down"),
        }
        self.shutdown().await
    }

    /// Run the shutdown sequence, then wait for the reload worker to exit.
    /// The sequence closes the controller, which stops the worker between
    /// reloads; it is never cancelled mid-reload.
    pub async fn shutdown(self) -> ShutdownReport {
        let report = ShutdownSequence {
            change_source: self.change_source,
            controller: self.controller,
            store: self.store,
            shutdown: self.shutdown,
            servers: self.servers,
            timeout: self.shutdown_timeout,
        }
        .run()
        .await;
        match tokio::time::timeout(self.shutdown_timeout, self.worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Reload worker ended abnormally"),
            Err(_) => tracing::warn!("Reload worker still busy after shutdown; leaving it detached"),
        }
        report
    }
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}

/// Bring the gateway up. See the module docs for the order.
pub async fn start(
    config: &GatewayConfig,
    store: Arc<dyn ConfigStore>,
    registry: DataSourceRegistry,
    change_source: Option<Box<dyn ChangeSource>>,
) -> Result<RunningGateway, StartupError> {
    // Phase 1: wiring
    let builder = SchemaBuilder::new(store.clone(), Arc::new(SdlCompiler), PubSub::new());
    let lifecycle = DataSourceLifecycle::new(registry, config.reload.connect_timeout());
    let controller = Arc::new(
        ReloadController::new(builder, lifecycle, ServingGateway::new())
            .with_retire_grace(config.reload.retire_grace()),
    );

    // Phase 2: first generation
    if let Err(e) = controller.startup().await {
        if let Err(close_err) = store.close().await {
            tracing::warn!(error = %close_err, "Failed to close store after startup failure");
        }
        return Err(e.into());
    }

    // Phase 3: worker
    let (reload, worker) = controller.spawn_worker();

    let mut running = RunningGateway {
        controller: controller.clone(),
        reload: reload.clone(),
        store,
        shutdown: Shutdown::new(),
        servers: Vec::new(),
        worker,
        change_source: None,
        local_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
        admin_addr: None,
        shutdown_timeout: config.lifecycle.shutdown_timeout(),
    };

    // Phase 4: listeners, Phase 5: change notifications
    if let Err(e) = open(&mut running, config, change_source).await {
        let report = running.shutdown().await;
        tracing::warn!(clean = report.is_clean(), "Startup aborted");
        return Err(e);
    }

    tracing::info!(
        address = %running.local_addr,
        admin = ?running.admin_addr,
        generation = ?running.gateway().generation(),
        "Gateway started"
    );
    Ok(running)
}

async fn open(
    running: &mut RunningGateway,
    config: &GatewayConfig,
    change_source: Option<Box<dyn ChangeSource>>,
) -> Result<(), StartupError> {
    let listener = bind(&config.listener.bind_address).await?;
    running.local_addr = listener.local_addr().map_err(|source| StartupError::Bind {
        address: config.listener.bind_address.clone(),
        source,
    })?;
    let server = HttpServer::new(&config.listener, running.gateway().clone());
    let server_shutdown = running.shutdown.subscribe();
    running
        .servers
        .push(tokio::spawn(server.run(listener, server_shutdown)));

    if config.admin.enabled {
        let listener = bind(&config.admin.bind_address).await?;
        running.admin_addr = listener.local_addr().ok();
        let state = AdminState {
            controller: running.controller.clone(),
            reload: running.reload.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        let admin_shutdown = running.shutdown.subscribe();
        running
            .servers
            .push(tokio::spawn(admin::serve(listener, state, admin_shutdown)));
    }

    if let Some(mut source) = change_source {
        source.start(running.reload.change_callback())?;
        tracing::info!(source = source.name(), "Watching for configuration changes");
        running.change_source = Some(source);
    }
    Ok(())
}
