//! Backend load balancer core: server registry, per-server state and
//! background health probing.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;

pub use config::BalancerConfig;
pub use health::HealthChecker;
pub use lifecycle::{Balancer, Shutdown};
pub use load_balancer::{ConnectionGuard, Server, ServerPool};
