//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Wire components → Build generation 1 → Bind listeners → Watch for changes
//!
//! Shutdown (shutdown.rs):
//!     Stop change source → Retire data sources → Unbind + close sockets → Close store
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger configuration reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: first generation before listeners
//! - Ordered shutdown with a timeout on every wait
//! - Shutdown steps are isolated: one failure never skips the rest

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownReport, ShutdownSequence, ShutdownStep};
pub use signals::{wait_for_shutdown, SignalChangeSource};
pub use startup::{change_source_from_config, start, RunningGateway, StartupError};
