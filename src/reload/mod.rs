//! Hot reload subsystem.
//!
//! # Data Flow
//! ```text
//! FileChangeSource / SignalChangeSource / ManualChangeSource
//!     → debounce.rs (ChangeDebouncer: one signal per quiet window)
//!     → controller.rs (ReloadHandle queue, coalesced)
//!     → SchemaBuilder::build → DataSourceLifecycle::connect_all
//!     → ServingGateway::bind (atomic swap) + PubSub::sync
//!     → ActiveConfiguration::drain (old generation's in-flight requests)
//!     → DataSourceLifecycle::disconnect_all (old generation)
//! ```

pub mod active;
pub mod controller;
pub mod debounce;
pub mod source;

pub use active::{ActiveConfiguration, DispatchGuard};
pub use controller::{
    ReloadController, ReloadError, ReloadHandle, ReloadOutcome, ReloadPhase, ReloadResult,
    ReloadStats, ReloadTrigger, TriggerSource,
};
pub use debounce::{ChangeDebouncer, Debounce};
pub use source::{
    ChangeCallback, ChangeSource, CombinedChangeSource, ManualChangeSource, ManualTrigger,
    WatchError,
};
