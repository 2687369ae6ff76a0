//! The binding between the HTTP surface and the live configuration.
//!
//! Requests enter the current [`ActiveConfiguration`] once through
//! [`ServingGateway::dispatch`] and keep that snapshot for their whole
//! lifetime. A swap never changes the schema under a request already in
//! flight, and the replaced generation's data sources are only disconnected
//! after its dispatched requests have drained.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::reload::{ActiveConfiguration, DispatchGuard};

/// Holds at most one bound [`ActiveConfiguration`].
#[derive(Clone, Default)]
pub struct ServingGateway {
    binding: Arc<ArcSwapOption<ActiveConfiguration>>,
}

impl ServingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically install `active`, returning the configuration it replaced.
    pub fn bind(&self, active: Arc<ActiveConfiguration>) -> Option<Arc<ActiveConfiguration>> {
        let generation = active.generation();
        let previous = self.binding.swap(Some(active));
        tracing::info!(
            generation,
            previous = previous.as_ref().map(|p| p.generation()),
            "Gateway bound to new configuration"
        );
        previous
    }

    /// Stop serving. New requests see no configuration.
    pub fn unbind(&self) -> Option<Arc<ActiveConfiguration>> {
        let previous = self.binding.swap(None);
        if previous.is_some() {
            tracing::info!("Gateway unbound");
        }
        previous
    }

    pub fn current(&self) -> Option<Arc<ActiveConfiguration>> {
        self.binding.load_full()
    }

    /// Enter the bound configuration for one request.
    pub fn dispatch(&self) -> Option<DispatchGuard> {
        loop {
            let active = self.binding.load_full()?;
            if let Some(guard) = active.enter() {
                return Some(guard);
            }
            // Lost a race with a swap; the binding already points past it.
            std::hint::spin_loop();
        }
    }

    pub fn is_bound(&self) -> bool {
        self.binding.load().is_some()
    }

    pub fn generation(&self) -> Option<u64> {
        self.binding.load().as_ref().map(|a| a.generation())
    }
}
