//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Snapshot pool servers
//!     → Probe each backend concurrently (probe.rs)
//!     → ServerPool::mark_server_up / mark_server_down
//! ```
//!
//! # Design Decisions
//! - A probe never runs while a pool or server lock is held
//! - One failed probe flips only that server; the loop never aborts
//! - Every probe is bounded by the configured timeout, so a round is too

pub mod active;
pub mod probe;

pub use active::{HealthCheckSettings, HealthChecker};
pub use probe::{ProbeClient, ProbeFailure};
