//! HTTP server setup and request forwarding.
//!
//! # Responsibilities
//! - Build the Axum router for proxied traffic
//! - Pick a backend per request through [`ServerPool::acquire_next`]
//! - Forward the request and stream the response back
//! - Release the admitted connection once the response body is done
//!
//! Responses: no eligible backend → 503, upstream failure → 502.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::StreamExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use url::Url;

use crate::config::TimeoutConfig;
use crate::load_balancer::pool::ServerPool;
use crate::load_balancer::server::ConnectionGuard;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ServerPool>,
    pub client: Client<HttpConnector, Body>,
}

/// HTTP front end that spreads requests over the pool.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(pool: Arc<ServerPool>, timeouts: &TimeoutConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let state = AppState { pool, client };
        let router = Self::build_router(state, Duration::from_secs(timeouts.request_secs));
        Self { router }
    }

    #[allow(deprecated)]
    fn build_router(state: AppState, request_timeout: Duration) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Rewrite an incoming URI onto a backend base address.
pub fn upstream_uri(base: &Url, incoming: &Uri) -> Result<Uri, axum::http::uri::InvalidUri> {
    let host = base.host_str().unwrap_or_default();
    let authority = match base.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let base_path = base.path().trim_end_matches('/');
    let path_and_query = incoming
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{}://{}{}{}", base.scheme(), authority, base_path, path_and_query).parse()
}

/// Move `guard` into the response body so the backend's connection slot stays
/// taken until the body has been streamed to the client or dropped.
fn hold_until_streamed(body: Body, guard: ConnectionGuard) -> Body {
    let stream = body.into_data_stream().map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Body::from_stream(stream)
}

async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let Some(guard) = state.pool.acquire_next() else {
        tracing::warn!(
            backends = state.pool.get_server_count(),
            alive = state.pool.get_alive_server_count(),
            "No eligible backend"
        );
        metrics::record_no_backend();
        return (StatusCode::SERVICE_UNAVAILABLE, "No healthy backends").into_response();
    };

    let (mut parts, body) = request.into_parts();
    parts.uri = match upstream_uri(guard.url(), &parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(backend = %guard.url(), error = %e, "Cannot build upstream URI");
            return (StatusCode::BAD_GATEWAY, "Invalid upstream address").into_response();
        }
    };
    parts.version = Version::HTTP_11;
    parts.headers.remove(header::HOST);

    tracing::debug!(backend = %guard.url(), uri = %parts.uri, "Forwarding request");

    let started = Instant::now();
    let result = state.client.request(Request::from_parts(parts, body)).await;
    guard.update_response_time(started.elapsed());

    match result {
        Ok(response) => {
            metrics::record_request(guard.key(), response.status().as_u16());
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, hold_until_streamed(Body::new(body), guard))
        }
        Err(e) => {
            tracing::error!(backend = %guard.url(), error = %e, "Upstream error");
            metrics::record_request(guard.key(), StatusCode::BAD_GATEWAY.as_u16());
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
