//! Shutdown coordination.
//!
//! # Sequence
//! ```text
//! 1. StopChangeSource   no new reload triggers
//! 2. RetireDataSources  close the controller, wait for an in-flight reload
//!                       (bounded), disconnect live sources
//! 3. UnbindGateway      stop serving, close listening sockets
//! 4. CloseStore         release the configuration store
//! ```
//!
//! Every step runs exactly once and in order. A step that errors, times out
//! or panics is recorded in the [`ShutdownReport`] and the next step still runs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::reload::{ChangeSource, ReloadController};
use crate::store::ConfigStore;

/// Broadcast coordinator for long-running tasks (HTTP and admin servers).
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    StopChangeSource,
    RetireDataSources,
    UnbindGateway,
    CloseStore,
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownStep::StopChangeSource => "stop_change_source",
            ShutdownStep::RetireDataSources => "retire_data_sources",
            ShutdownStep::UnbindGateway => "unbind_gateway",
            ShutdownStep::CloseStore => "close_store",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: ShutdownStep,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub steps: Vec<StepOutcome>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    pub fn failed_steps(&self) -> Vec<ShutdownStep> {
        self.steps
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.step)
            .collect()
    }
}

/// Everything torn down at shutdown. Consumed by [`ShutdownSequence::run`].
pub struct ShutdownSequence {
    pub change_source: Option<Box<dyn ChangeSource>>,
    pub controller: Arc<ReloadController>,
    pub store: Arc<dyn ConfigStore>,
    pub shutdown: Shutdown,
    pub servers: Vec<JoinHandle<Result<(), std::io::Error>>>,
    /// Bound on waiting for an in-flight reload, and on server draining.
    pub timeout: Duration,
}

impl ShutdownSequence {
    pub async fn run(self) -> ShutdownReport {
        let ShutdownSequence {
            change_source,
            controller,
            store,
            shutdown,
            servers,
            timeout,
        } = self;
        let mut report = ShutdownReport::default();
        tracing::info!("Shutdown sequence starting");

        // Step 1: stop change notifications.
        let result = isolate(async move {
            if let Some(mut source) = change_source {
                source.stop();
            }
            Ok(())
        })
        .await;
        record(&mut report, ShutdownStep::StopChangeSource, result);

        // Step 2: retire the live generation's data sources.
        let retiring = controller.clone();
        let result = isolate(async move {
            let errors = match tokio::time::timeout(timeout, retiring.retire_active()).await {
                Ok(errors) => errors,
                Err(_) => {
                    // The stuck reload is closed and cannot swap; retire what is bound.
                    let errors = retiring.retire_active_now().await;
                    let mut failures = vec![format!("timed out after {:?} waiting for reload", timeout)];
                    failures.extend(errors.iter().map(ToString::to_string));
                    return Err(failures.join("; "));
                }
            };
            if errors.is_empty() {
                Ok(())
            } else {
                Err(errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "))
            }
        })
        .await;
        record(&mut report, ShutdownStep::RetireDataSources, result);

        // Step 3: stop serving and close the sockets.
        let gateway = controller.gateway().clone();
        let result = isolate(async move {
            gateway.unbind();
            shutdown.trigger();
            let mut failures = Vec::new();
            for server in servers {
                match tokio::time::timeout(timeout, server).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => failures.push(e.to_string()),
                    Ok(Err(e)) => failures.push(e.to_string()),
                    Err(_) => failures.push("server did not drain in time".to_string()),
                }
            }
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.join("; "))
            }
        })
        .await;
        record(&mut report, ShutdownStep::UnbindGateway, result);

        // Step 4: close the store.
        let result = isolate(async move { store.close().await.map_err(|e| e.to_string()) }).await;
        record(&mut report, ShutdownStep::CloseStore, result);

        tracing::info!(clean = report.is_clean(), "Shutdown sequence complete");
        report
    }
}

/// Run a step on its own task so a panic is contained to that step.
async fn isolate<F>(step: F) -> Result<(), String>
where
    F: std::future::Future<Output = Result<(), String>> + Send + 'static,
{
    match tokio::spawn(step).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err("step panicked".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn record(report: &mut ShutdownReport, step: ShutdownStep, result: Result<(), String>) {
    match &result {
        Ok(()) => tracing::info!(step = %step, "Shutdown step complete"),
        Err(e) => tracing::error!(step = %step, error = %e, "Shutdown step failed; continuing"),
    }
    report.steps.push(StepOutcome {
        step,
        error: result.err(),
    });
}
