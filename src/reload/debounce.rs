//! Trailing-edge debouncing of change signals.
//!
//! ```text
//! signals:   x  x   x            x
//! deadline:  |--|---|--- D ---▶  fire
//! ```
//!
//! Each signal pushes the deadline to `now + D`; the wrapped callback runs once
//! the deadline passes without another signal.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::reload::source::{ChangeCallback, ChangeSource, WatchError};

/// Default quiet window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(500);

/// Debounce timer state for one debouncer.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Record a signal at `now`, restarting the quiet window.
    pub fn signal(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True exactly once per burst, when `now` has reached the deadline.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

struct DebounceTask {
    handle: JoinHandle<()>,
    stop_tx: oneshot::Sender<()>,
}

/// Wraps a [`ChangeSource`] so its callback fires at most once per quiet window.
pub struct ChangeDebouncer<S> {
    inner: S,
    window: Duration,
    task: Option<DebounceTask>,
}

impl<S: ChangeSource> ChangeDebouncer<S> {
    pub fn new(inner: S, window: Duration) -> Self {
        Self {
            inner,
            window,
            task: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl<S: ChangeSource> ChangeSource for ChangeDebouncer<S> {
    /// Must be called from within a Tokio runtime.
    fn start(&mut self, on_change: ChangeCallback) -> Result<(), WatchError> {
        if self.task.is_some() {
            return Err(WatchError::AlreadyStarted);
        }

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_timer(self.window, signal_rx, stop_rx, on_change));

        let forward: ChangeCallback = std::sync::Arc::new(move || {
            let _ = signal_tx.send(());
        });
        if let Err(e) = self.inner.start(forward) {
            handle.abort();
            return Err(e);
        }

        self.task = Some(DebounceTask { handle, stop_tx });
        Ok(())
    }

    /// Stops the inner source and drops any pending fire.
    fn stop(&mut self) {
        self.inner.stop();
        if let Some(task) = self.task.take() {
            let _ = task.stop_tx.send(());
            task.handle.abort();
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

impl<S> Drop for ChangeDebouncer<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.handle.abort();
        }
    }
}

async fn run_timer(
    window: Duration,
    mut signals: mpsc::UnboundedReceiver<()>,
    mut stop: oneshot::Receiver<()>,
    on_change: ChangeCallback,
) {
    let mut state = Debounce::new(window);
    let mut open = true;

    loop {
        if !open && !state.is_pending() {
            break;
        }
        let wake = state.deadline().unwrap_or_else(|| Instant::now() + window);

        tokio::select! {
            _ = &mut stop => {
                state.cancel();
                break;
            }
            signal = signals.recv(), if open => match signal {
                Some(()) => state.signal(Instant::now()),
                None => open = false,
            },
            _ = sleep_until(wake), if state.is_pending() => {
                if state.poll(Instant::now()) {
                    tracing::debug!(window_ms = window.as_millis() as u64, "Change burst settled");
                    on_change();
                }
            }
        }
    }
}
