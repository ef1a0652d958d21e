//! HTTP front end subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, tracing + timeout layers)
//!     → ServerPool::acquire_next (select + admit)
//!     → forward to backend, stream response back
//!     → ConnectionGuard dropped (connection released)
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
