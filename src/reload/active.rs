//! The configuration currently being served.
//!
//! Requests enter a generation through [`ActiveConfiguration::enter`] and hold
//! a [`DispatchGuard`] until they finish. Retiring a generation first stops new
//! entries, then drains the guards still out, and only then are its data
//! sources disconnected.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::datasource::{DataSourceInstance, SourceMap, SourceState};
use crate::schema::CompiledSchema;

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// One installed generation: a compiled schema plus the data sources it was
/// built against. Immutable once installed; replaced wholesale on reload.
#[derive(Debug)]
pub struct ActiveConfiguration {
    generation: u64,
    schema: Arc<CompiledSchema>,
    sources: SourceMap,
    installed_at: SystemTime,
    used_fallback: bool,
    in_flight: AtomicUsize,
    retiring: AtomicBool,
}

impl ActiveConfiguration {
    pub fn new(
        generation: u64,
        schema: CompiledSchema,
        sources: SourceMap,
        used_fallback: bool,
    ) -> Self {
        Self {
            generation,
            schema: Arc::new(schema),
            sources,
            installed_at: SystemTime::now(),
            used_fallback,
            in_flight: AtomicUsize::new(0),
            retiring: AtomicBool::new(false),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn schema(&self) -> &Arc<CompiledSchema> {
        &self.schema
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    pub fn source(&self, key: &str) -> Option<&Arc<DataSourceInstance>> {
        self.sources.get(key)
    }

    pub fn installed_at(&self) -> SystemTime {
        self.installed_at
    }

    pub fn used_fallback(&self) -> bool {
        self.used_fallback
    }

    pub fn source_states(&self) -> BTreeMap<String, SourceState> {
        self.sources
            .iter()
            .map(|(key, source)| (key.clone(), source.state()))
            .collect()
    }

    /// Start dispatching a request against this generation. `None` once the
    /// generation is retiring; the caller should load the current one again.
    pub fn enter(self: &Arc<Self>) -> Option<DispatchGuard> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.retiring.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(DispatchGuard {
            active: self.clone(),
        })
    }

    /// Requests currently dispatching against this generation.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_retiring(&self) -> bool {
        self.retiring.load(Ordering::SeqCst)
    }

    /// Refuse new requests and wait for in-flight ones to finish, up to
    /// `grace`. Returns false if requests were still running at the deadline.
    /// Only call this once the generation is no longer bound.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.retiring.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + grace;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        true
    }

    /// Seconds since the Unix epoch at install time.
    pub fn installed_at_unix(&self) -> u64 {
        self.installed_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Keeps a request counted against its generation until dropped.
#[derive(Debug)]
pub struct DispatchGuard {
    active: Arc<ActiveConfiguration>,
}

impl Deref for DispatchGuard {
    type Target = ActiveConfiguration;

    fn deref(&self) -> &Self::Target {
        &self.active
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.active.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
