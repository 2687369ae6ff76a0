//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! GET /health
//!     → ServingGateway::current (one snapshot)
//!     → report.rs (status from binding + data source states)
//!     → 200 when a configuration is bound, 503 otherwise
//! ```
//!
//! # Design Decisions
//! - Liveness of the process is not health: an unbound gateway is unhealthy
//! - A failed data source degrades the report but keeps it 200, since the
//!   rest of the schema still serves

pub mod report;

pub use report::{health_handler, HealthReport, HealthStatus};
