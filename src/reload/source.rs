//! Change notification sources.
//!
//! A source pushes "something changed" signals; it carries no payload and may
//! fire any number of times for one logical edit.

use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Callback invoked for every raw change signal.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("change source already started")]
    AlreadyStarted,

    #[error("watch error: {0}")]
    Watch(String),
}

/// Push-based change notifications.
pub trait ChangeSource: Send {
    /// Begin delivering signals to `on_change`.
    fn start(&mut self, on_change: ChangeCallback) -> Result<(), WatchError>;

    /// Stop delivering signals. Idempotent.
    fn stop(&mut self);

    fn name(&self) -> &'static str;
}

/// A source fired by hand, through its [`ManualTrigger`].
#[derive(Default)]
pub struct ManualChangeSource {
    callback: Arc<Mutex<Option<ChangeCallback>>>,
}

/// Fires the callback of a started [`ManualChangeSource`].
#[derive(Clone)]
pub struct ManualTrigger {
    callback: Arc<Mutex<Option<ChangeCallback>>>,
}

impl ManualChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) -> ManualTrigger {
        ManualTrigger {
            callback: self.callback.clone(),
        }
    }
}

impl ManualTrigger {
    /// Deliver one signal. Returns false when the source is not started.
    pub fn fire(&self) -> bool {
        let callback = match self.callback.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl ChangeSource for ManualChangeSource {
    fn start(&mut self, on_change: ChangeCallback) -> Result<(), WatchError> {
        let mut slot = self
            .callback
            .lock()
            .map_err(|_| WatchError::Watch("manual source lock poisoned".into()))?;
        if slot.is_some() {
            return Err(WatchError::AlreadyStarted);
        }
        *slot = Some(on_change);
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut slot) = self.callback.lock() {
            slot.take();
        }
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

/// Fans several sources into one callback.
#[derive(Default)]
pub struct CombinedChangeSource {
    sources: Vec<Box<dyn ChangeSource>>,
}

impl CombinedChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, source: Box<dyn ChangeSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl ChangeSource for CombinedChangeSource {
    fn start(&mut self, on_change: ChangeCallback) -> Result<(), WatchError> {
        for i in 0..self.sources.len() {
            if let Err(e) = self.sources[i].start(on_change.clone()) {
                for started in &mut self.sources[..i] {
                    started.stop();
                }
                return Err(e);
            }
            tracing::info!(source = self.sources[i].name(), "Change source started");
        }
        Ok(())
    }

    fn stop(&mut self) {
        for source in &mut self.sources {
            source.stop();
        }
    }

    fn name(&self) -> &'static str {
        "combined"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, ChangeCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_manual_source_lifecycle() {
        let mut source = ManualChangeSource::new();
        let trigger = source.trigger();
        assert!(!trigger.fire());

        let (count, callback) = counter();
        source.start(callback.clone()).unwrap();
        assert!(matches!(source.start(callback), Err(WatchError::AlreadyStarted)));

        assert!(trigger.fire());
        assert!(trigger.fire());
        source.stop();
        assert!(!trigger.fire());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_combined_source_fans_in() {
        let a = ManualChangeSource::new();
        let b = ManualChangeSource::new();
        let (ta, tb) = (a.trigger(), b.trigger());
        let mut combined = CombinedChangeSource::new()
            .with(Box::new(a))
            .with(Box::new(b));

        let (count, callback) = counter();
        combined.start(callback).unwrap();
        ta.fire();
        tb.fire();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        combined.stop();
        assert!(!ta.fire());
        assert!(!tb.fire());
    }
}
