//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject backend addresses that cannot be parsed or are duplicated
//! - Validate value ranges (durations > 0, weights and limits >= 1)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::load_balancer::address::AddressError;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("backends[{index}]: {error}")]
    Backend { index: usize, error: AddressError },

    #[error("backends[{index}]: duplicate of {address}")]
    DuplicateBackend { index: usize, address: String },

    #[error("health_check.{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("{field}: invalid socket address '{value}'")]
    BindAddress { field: &'static str, value: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, backend) in config.backends.iter().enumerate() {
        match backend.build_server() {
            Ok(server) => {
                if !seen.insert(server.key().to_string()) {
                    errors.push(ValidationError::DuplicateBackend {
                        index,
                        address: server.key().to_string(),
                    });
                }
            }
            Err(error) => errors.push(ValidationError::Backend { index, error }),
        }
    }

    if config.health_check.interval_ms == 0 {
        errors.push(ValidationError::ZeroDuration("interval_ms"));
    }
    if config.health_check.timeout_ms == 0 {
        errors.push(ValidationError::ZeroDuration("timeout_ms"));
    }

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.admin.enabled {
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }
    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress {
            field,
            value: value.to_string(),
        });
    }
}
