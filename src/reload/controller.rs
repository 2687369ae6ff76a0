//! Reload orchestration.
//!
//! # State Machine
//! ```text
//! Idle → Building → Connecting → Swapping → RetiringOld → Idle
//!           │           │
//!           └── error ──┴──→ Idle   (previous generation keeps serving)
//! ```
//!
//! # Design Decisions
//! - One reload at a time; an async mutex is the single-flight guard
//! - Triggers queued behind a running reload coalesce into one follow-up
//! - The old generation is retired only after the gateway serves the new one
//!   and the requests already dispatched against it have drained
//! - Subscription topics follow the served generation and change only at swap
//! - A failed reload leaves no trace besides logs, metrics and stats
//! - Closing is a flag, not a lock: a reload in flight sees it before swapping
//!   and tears down what it connected instead of installing it

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::datasource::{ConnectError, DataSourceLifecycle, DisconnectError};
use crate::http::ServingGateway;
use crate::observability::metrics;
use crate::reload::active::ActiveConfiguration;
use crate::reload::source::ChangeCallback;
use crate::schema::{BuildError, SchemaBuilder};

/// Where the controller is in its state machine.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPhase {
    Idle = 0,
    Building = 1,
    Connecting = 2,
    Swapping = 3,
    RetiringOld = 4,
}

impl From<u8> for ReloadPhase {
    fn from(val: u8) -> Self {
        match val {
            1 => ReloadPhase::Building,
            2 => ReloadPhase::Connecting,
            3 => ReloadPhase::Swapping,
            4 => ReloadPhase::RetiringOld,
            _ => ReloadPhase::Idle,
        }
    }
}

impl fmt::Display for ReloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReloadPhase::Idle => "idle",
            ReloadPhase::Building => "building",
            ReloadPhase::Connecting => "connecting",
            ReloadPhase::Swapping => "swapping",
            ReloadPhase::RetiringOld => "retiring_old",
        };
        f.write_str(s)
    }
}

/// What asked for a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Startup,
    ChangeNotification,
    Admin,
    Manual,
}

impl TriggerSource {
    /// Metric label: startup failures are fatal, everything else recoverable.
    fn kind(self) -> &'static str {
        match self {
            TriggerSource::Startup => "startup",
            _ => "reload",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerSource::Startup => "startup",
            TriggerSource::ChangeNotification => "change_notification",
            TriggerSource::Admin => "admin",
            TriggerSource::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    pub id: Uuid,
    pub source: TriggerSource,
}

impl ReloadTrigger {
    pub fn new(source: TriggerSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("schema build failed: {0}")]
    Build(#[from] BuildError),

    #[error("data source connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("reload controller is shut down")]
    Closed,
}

/// Result shape handed to queued callers; one failure may answer many waiters.
pub type ReloadResult = Result<ReloadOutcome, Arc<ReloadError>>;

#[derive(Debug, Clone, Serialize)]
pub struct ReloadOutcome {
    pub trigger_id: Uuid,
    pub generation: u64,
    pub previous_generation: Option<u64>,
    pub used_fallback: bool,
    pub data_sources: usize,
    pub disconnect_failures: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadStats {
    pub attempts: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Triggers folded into another reload instead of running their own.
    pub coalesced: u64,
    pub last_error: Option<String>,
}

/// How long a replaced generation may keep serving in-flight requests before
/// its data sources are disconnected anyway.
pub const DEFAULT_RETIRE_GRACE: Duration = Duration::from_secs(5);

struct Flight {
    generation: u64,
}

/// Owns the build → connect → swap → retire sequence.
pub struct ReloadController {
    builder: SchemaBuilder,
    lifecycle: DataSourceLifecycle,
    gateway: ServingGateway,
    flight: tokio::sync::Mutex<Flight>,
    closing: watch::Sender<bool>,
    retire_grace: Duration,
    phase: AtomicU8,
    stats: Mutex<ReloadStats>,
}

impl ReloadController {
    pub fn new(builder: SchemaBuilder, lifecycle: DataSourceLifecycle, gateway: ServingGateway) -> Self {
        Self {
            builder,
            lifecycle,
            gateway,
            flight: tokio::sync::Mutex::new(Flight { generation: 0 }),
            closing: watch::Sender::new(false),
            retire_grace: DEFAULT_RETIRE_GRACE,
            phase: AtomicU8::new(ReloadPhase::Idle as u8),
            stats: Mutex::new(ReloadStats::default()),
        }
    }

    /// Bound on draining a replaced generation's in-flight requests.
    #[must_use]
    pub fn with_retire_grace(mut self, grace: Duration) -> Self {
        self.retire_grace = grace;
        self
    }

    pub fn gateway(&self) -> &ServingGateway {
        &self.gateway
    }

    pub fn builder(&self) -> &SchemaBuilder {
        &self.builder
    }

    pub fn phase(&self) -> ReloadPhase {
        ReloadPhase::from(self.phase.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> ReloadStats {
        self.stats_lock().clone()
    }

    /// Build and install the first generation. Callers treat failure as fatal.
    pub async fn startup(&self) -> Result<ReloadOutcome, ReloadError> {
        self.reload(ReloadTrigger::new(TriggerSource::Startup)).await
    }

    /// Run one full reload. Waits for any reload already in progress.
    pub async fn reload(&self, trigger: ReloadTrigger) -> Result<ReloadOutcome, ReloadError> {
        let mut flight = self.flight.lock().await;
        if self.is_closing() {
            return Err(ReloadError::Closed);
        }

        let span = tracing::info_span!("reload", trigger_id = %trigger.id, source = %trigger.source);
        let result = self
            .transition(&mut flight, &trigger)
            .instrument(span)
            .await;
        self.set_phase(ReloadPhase::Idle);
        self.record(&trigger, &result);
        result
    }

    async fn transition(
        &self,
        flight: &mut Flight,
        trigger: &ReloadTrigger,
    ) -> Result<ReloadOutcome, ReloadError> {
        // Phase 1: build. Nothing has been touched yet if this fails.
        self.set_phase(ReloadPhase::Building);
        let built = self.builder.build().await?;

        // Phase 2: connect. Partially connected sources are cleaned up by the lifecycle.
        self.set_phase(ReloadPhase::Connecting);
        let sources = self.lifecycle.connect_all(&built.data_sources).await?;

        // Shutdown began while connecting: nothing new may be installed.
        if self.is_closing() {
            self.lifecycle.disconnect_all(&sources).await;
            return Err(ReloadError::Closed);
        }

        // Phase 3: swap.
        self.set_phase(ReloadPhase::Swapping);
        let generation = flight.generation + 1;
        let data_sources = sources.len();
        let active = Arc::new(ActiveConfiguration::new(
            generation,
            built.schema,
            sources,
            built.used_fallback,
        ));
        let previous = self.gateway.bind(active.clone());
        self.builder.pubsub().sync(active.schema().topics());
        flight.generation = generation;
        metrics::set_active_generation(generation);

        // Phase 4: retire the old generation once its requests are done.
        self.set_phase(ReloadPhase::RetiringOld);
        let (previous_generation, disconnect_failures) = match previous {
            Some(old) => {
                if !old.drain(self.retire_grace).await {
                    tracing::warn!(
                        generation = old.generation(),
                        in_flight = old.in_flight(),
                        grace = ?self.retire_grace,
                        "Retiring generation with requests still in flight"
                    );
                }
                let errors = self.lifecycle.disconnect_all(old.sources()).await;
                (Some(old.generation()), errors.len())
            }
            None => (None, 0),
        };

        Ok(ReloadOutcome {
            trigger_id: trigger.id,
            generation,
            previous_generation,
            used_fallback: built.used_fallback,
            data_sources,
            disconnect_failures,
        })
    }

    fn record(&self, trigger: &ReloadTrigger, result: &Result<ReloadOutcome, ReloadError>) {
        let kind = trigger.source.kind();
        let mut stats = self.stats_lock();
        stats.attempts += 1;

        match result {
            Ok(outcome) => {
                stats.succeeded += 1;
                metrics::record_reload(kind, "success");
                tracing::info!(
                    trigger_id = %trigger.id,
                    generation = outcome.generation,
                    previous = ?outcome.previous_generation,
                    data_sources = outcome.data_sources,
                    fallback = outcome.used_fallback,
                    "Configuration installed"
                );
            }
            Err(e) => {
                stats.failed += 1;
                stats.last_error = Some(e.to_string());
                metrics::record_reload(kind, "failure");
                if trigger.source == TriggerSource::Startup {
                    tracing::error!(trigger_id = %trigger.id, error = %e, "Startup configuration failed");
                } else {
                    tracing::error!(
                        trigger_id = %trigger.id,
                        error = %e,
                        serving = ?self.gateway.generation(),
                        "Reload failed; keeping current configuration"
                    );
                }
            }
        }
    }

    /// Refuse further reloads and stop the worker. A reload already past
    /// its own closed check still finishes; one still connecting discards
    /// its new sources instead of swapping them in.
    pub fn close(&self) {
        if !self.closing.send_replace(true) {
            tracing::info!("Reload controller closing");
        }
    }

    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Close the controller, wait for an in-flight reload to finish, then
    /// disconnect the live generation's data sources. The gateway stays
    /// bound; unbinding is a separate shutdown step.
    pub async fn retire_active(&self) -> Vec<DisconnectError> {
        self.close();
        let _flight = self.flight.lock().await;
        self.retire_current().await
    }

    /// Like [`retire_active`](Self::retire_active) without waiting for an
    /// in-flight reload. Used once that wait has timed out: the reload, being
    /// closed, will not install anything newer, and disconnecting an instance
    /// twice is a no-op.
    pub async fn retire_active_now(&self) -> Vec<DisconnectError> {
        self.close();
        self.retire_current().await
    }

    async fn retire_current(&self) -> Vec<DisconnectError> {
        let Some(active) = self.gateway.current() else {
            return Vec::new();
        };
        let errors = self.lifecycle.disconnect_all(active.sources()).await;
        tracing::info!(
            generation = active.generation(),
            failures = errors.len(),
            "Active data sources retired"
        );
        errors
    }

    /// Start the background reload worker.
    pub fn spawn_worker(self: &Arc<Self>) -> (ReloadHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(self.clone(), rx));
        (ReloadHandle { tx }, handle)
    }

    fn set_phase(&self, phase: ReloadPhase) {
        let old = ReloadPhase::from(self.phase.swap(phase as u8, Ordering::AcqRel));
        if old != phase {
            tracing::debug!(from = %old, to = %phase, "Reload phase");
        }
    }

    fn stats_lock(&self) -> MutexGuard<'_, ReloadStats> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct ReloadRequest {
    trigger: ReloadTrigger,
    reply: Option<oneshot::Sender<ReloadResult>>,
}

/// Queues reloads onto the worker.
#[derive(Clone)]
pub struct ReloadHandle {
    tx: mpsc::UnboundedSender<ReloadRequest>,
}

impl ReloadHandle {
    /// Queue a reload without waiting. Returns false once the worker is gone.
    pub fn trigger(&self, source: TriggerSource) -> bool {
        self.tx
            .send(ReloadRequest {
                trigger: ReloadTrigger::new(source),
                reply: None,
            })
            .is_ok()
    }

    /// Queue a reload and wait for the attempt that covers it.
    pub async fn reload_now(&self, source: TriggerSource) -> ReloadResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ReloadRequest {
                trigger: ReloadTrigger::new(source),
                reply: Some(reply_tx),
            })
            .map_err(|_| Arc::new(ReloadError::Closed))?;
        reply_rx.await.map_err(|_| Arc::new(ReloadError::Closed))?
    }

    /// A change callback that queues a reload on every settled change.
    pub fn change_callback(&self) -> ChangeCallback {
        let handle = self.clone();
        Arc::new(move || {
            if !handle.trigger(TriggerSource::ChangeNotification) {
                tracing::debug!("Change ignored; reload worker stopped");
            }
        })
    }
}

async fn run_worker(controller: Arc<ReloadController>, mut rx: mpsc::UnboundedReceiver<ReloadRequest>) {
    let mut closing = controller.closing.subscribe();
    loop {
        // Only the wait for work is interruptible; a started reload runs to the end.
        let first = tokio::select! {
            biased;
            _ = closing.wait_for(|closed| *closed) => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let trigger = first.trigger;
        let mut waiters: Vec<_> = first.reply.into_iter().collect();

        // Everything already queued is covered by the build about to start.
        let mut coalesced = 0u64;
        while let Ok(extra) = rx.try_recv() {
            coalesced += 1;
            waiters.extend(extra.reply);
        }
        if coalesced > 0 {
            controller.stats_lock().coalesced += coalesced;
            tracing::debug!(trigger_id = %trigger.id, coalesced, "Coalesced queued reload triggers");
        }

        let result = controller.reload(trigger).await.map_err(Arc::new);
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
    tracing::debug!("Reload worker stopped");
}
