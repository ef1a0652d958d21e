//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the server pool from validated configuration
//! - Create the health checker (started separately, inside a runtime)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::sync::Arc;

use crate::config::{BalancerConfig, ConfigError};
use crate::health::{HealthCheckSettings, HealthChecker};
use crate::load_balancer::pool::ServerPool;

/// The assembled routing core.
pub struct Balancer {
    pub config: BalancerConfig,
    pub pool: Arc<ServerPool>,
    /// `None` when active health checks are disabled.
    pub health_checker: Option<HealthChecker>,
}

impl Balancer {
    /// Build the pool and health checker described by `config`.
    pub fn bootstrap(config: BalancerConfig) -> Result<Self, ConfigError> {
        let pool = Arc::new(ServerPool::from_configs(&config.backends)?);

        let health_checker = if config.health_check.enabled {
            let settings = HealthCheckSettings::from(&config.health_check);
            Some(HealthChecker::new(pool.clone(), settings)?)
        } else {
            tracing::info!("Active health checks disabled");
            None
        };

        tracing::info!(
            backends = pool.get_server_count(),
            total_weight = pool.total_weight(),
            "Server pool ready"
        );

        Ok(Self {
            config,
            pool,
            health_checker,
        })
    }

    /// Start background health checking, if enabled.
    pub fn start(&self) {
        if let Some(checker) = &self.health_checker {
            checker.start();
        }
    }

    /// Stop background health checking, if running.
    pub async fn stop(&self) {
        if let Some(checker) = &self.health_checker {
            checker.stop().await;
        }
    }
}
