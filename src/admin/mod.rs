//! Admin API: inspect the pool and override liveness.
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::load_balancer::pool::ServerPool;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub pool: Arc<ServerPool>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(pool: Arc<ServerPool>, api_key: &str) -> Self {
        Self {
            pool,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route(
            "/admin/backends",
            get(get_backends).post(add_backend).delete(remove_backend),
        )
        .route("/admin/backends/up", post(mark_up))
        .route("/admin/backends/down", post(mark_down))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
