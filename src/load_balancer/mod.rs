//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request arrives
//!     → pool.rs (scan from the rotation cursor)
//!     → server.rs (atomic admission: alive && active < max)
//!     → ConnectionGuard returned to the proxy layer
//!     → guard dropped after forwarding (connection released)
//!
//! Health checker / admin API
//!     → pool.rs (lookup by normalized address, address.rs)
//!     → server.rs (liveness flip under the server's own lock)
//! ```
//!
//! # Design Decisions
//! - Round robin over eligible servers: dead or full servers are skipped
//!   without consuming a turn
//! - Two lock domains (pool structure vs. per-server state)
//! - Weights are tracked but selection does not use them yet

pub mod address;
pub mod pool;
pub mod server;

pub use address::{normalize_url, parse_address, AddressError};
pub use pool::{ReconcileReport, ServerPool};
pub use server::{ConnectionGuard, Server, ServerSnapshot};
