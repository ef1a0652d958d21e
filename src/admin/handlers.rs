use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use thiserror::Error;

use crate::admin::AdminState;
use crate::config::BackendConfig;
use crate::load_balancer::address::{parse_address, AddressError};
use crate::load_balancer::server::Server;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub backends: usize,
    pub alive: usize,
    pub total_weight: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendStatus {
    pub address: String,
    pub alive: bool,
    pub weight: u32,
    pub active_connections: usize,
    pub max_connections: usize,
    pub avg_response_ms: Option<f64>,
    /// Unix time of the last liveness update, in milliseconds.
    pub last_health_check_ms: u64,
}

impl From<&Server> for BackendStatus {
    fn from(server: &Server) -> Self {
        let snapshot = server.snapshot();
        Self {
            address: server.url().to_string(),
            alive: snapshot.alive,
            weight: server.weight(),
            active_connections: snapshot.active_connections,
            max_connections: snapshot.max_connections,
            avg_response_ms: server
                .average_response_time()
                .map(|d| d.as_secs_f64() * 1000.0),
            last_health_check_ms: snapshot
                .last_health_check
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddressRequest {
    pub address: String,
}

/// Admin request failures.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    BadAddress(#[from] AddressError),

    #[error("no backend registered at {0}")]
    NotFound(String),

    #[error("backend {0} is already registered")]
    AlreadyRegistered(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self {
            AdminError::BadAddress(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::AlreadyRegistered(_) => StatusCode::CONFLICT,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        backends: state.pool.get_server_count(),
        alive: state.pool.get_alive_server_count(),
        total_weight: state.pool.total_weight(),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let statuses = state
        .pool
        .servers()
        .iter()
        .map(|server| BackendStatus::from(server.as_ref()))
        .collect();
    Json(statuses)
}

pub async fn add_backend(
    State(state): State<AdminState>,
    Json(config): Json<BackendConfig>,
) -> Result<(StatusCode, Json<BackendStatus>), AdminError> {
    let server = Arc::new(config.build_server()?);
    let status = BackendStatus::from(server.as_ref());

    if !state.pool.add_server(server) {
        return Err(AdminError::AlreadyRegistered(status.address));
    }
    tracing::info!(address = %status.address, "Backend added via admin API");
    Ok((StatusCode::CREATED, Json(status)))
}

pub async fn remove_backend(
    State(state): State<AdminState>,
    Json(request): Json<AddressRequest>,
) -> Result<StatusCode, AdminError> {
    let url = parse_address(&request.address)?;
    if !state.pool.remove_server(&url) {
        return Err(AdminError::NotFound(request.address));
    }
    tracing::info!(address = %url, "Backend removed via admin API");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_up(
    State(state): State<AdminState>,
    Json(request): Json<AddressRequest>,
) -> Result<StatusCode, AdminError> {
    set_liveness(&state, &request.address, true)
}

pub async fn mark_down(
    State(state): State<AdminState>,
    Json(request): Json<AddressRequest>,
) -> Result<StatusCode, AdminError> {
    set_liveness(&state, &request.address, false)
}

fn set_liveness(state: &AdminState, address: &str, alive: bool) -> Result<StatusCode, AdminError> {
    let url = parse_address(address)?;
    let applied = if alive {
        state.pool.mark_server_up(&url)
    } else {
        state.pool.mark_server_down(&url)
    };

    if !applied {
        return Err(AdminError::NotFound(address.to_string()));
    }
    tracing::info!(address = %url, alive, "Liveness overridden via admin API");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::pool::ServerPool;

    fn state() -> AdminState {
        let pool = ServerPool::from_configs(&[BackendConfig::new("http://a.com")]).unwrap();
        AdminState::new(Arc::new(pool), "secret")
    }

    #[tokio::test]
    async fn test_mark_down_and_up() {
        let state = state();
        let request = || Json(AddressRequest { address: "HTTP://A.COM:80".into() });

        assert_eq!(
            mark_down(State(state.clone()), request()).await.unwrap(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(state.pool.get_alive_server_count(), 0);

        mark_up(State(state.clone()), request()).await.unwrap();
        assert_eq!(state.pool.get_alive_server_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_addresses() {
        let state = state();
        let unknown = mark_down(
            State(state.clone()),
            Json(AddressRequest { address: "http://b.com".into() }),
        )
        .await;
        assert!(matches!(unknown, Err(AdminError::NotFound(_))));

        let malformed = remove_backend(
            State(state),
            Json(AddressRequest { address: "ftp://b.com".into() }),
        )
        .await;
        assert!(matches!(malformed, Err(AdminError::BadAddress(_))));
    }

    #[tokio::test]
    async fn test_add_duplicate_conflicts() {
        let state = state();
        let added = add_backend(State(state.clone()), Json(BackendConfig::new("http://b.com")))
            .await
            .unwrap();
        assert_eq!(added.0, StatusCode::CREATED);

        let dup = add_backend(State(state.clone()), Json(BackendConfig::new("http://B.com/")))
            .await;
        assert!(matches!(dup, Err(AdminError::AlreadyRegistered(_))));
        assert_eq!(state.pool.get_server_count(), 2);
    }

    #[tokio::test]
    async fn test_backends_listing() {
        let state = state();
        let Json(list) = get_backends(State(state)).await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].address, "http://a.com/");
        assert!(list[0].alive);
        assert_eq!(list[0].avg_response_ms, None);
    }
}
