//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGTERM/SIGINT (Ctrl+C elsewhere) to begin shutdown
//! - Turn SIGHUP into a reload signal via [`SignalChangeSource`]
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a reload, not shutdown

use tokio::task::JoinHandle;

use crate::reload::{ChangeCallback, ChangeSource, WatchError};

/// Wait for a shutdown signal and return its name.
#[cfg(unix)]
pub async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("CTRL-C")
}

/// Emits a change signal on every SIGHUP.
#[derive(Default)]
pub struct SignalChangeSource {
    task: Option<JoinHandle<()>>,
}

impl SignalChangeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChangeSource for SignalChangeSource {
    #[cfg(unix)]
    fn start(&mut self, on_change: ChangeCallback) -> Result<(), WatchError> {
        use tokio::signal::unix::{signal, SignalKind};

        if self.task.is_some() {
            return Err(WatchError::AlreadyStarted);
        }
        let mut hangup =
            signal(SignalKind::hangup()).map_err(|e| WatchError::Watch(e.to_string()))?;
        self.task = Some(tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                tracing::info!("SIGHUP received");
                on_change();
            }
        }));
        Ok(())
    }

    #[cfg(not(unix))]
    fn start(&mut self, _on_change: ChangeCallback) -> Result<(), WatchError> {
        Err(WatchError::Watch("SIGHUP is not available on this platform".into()))
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn name(&self) -> &'static str {
        "sighup"
    }
}
