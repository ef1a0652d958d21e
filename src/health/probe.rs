//! Single-backend HTTP probe.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time;
use url::Url;

/// HTTP client shared by all probes.
pub type ProbeClient = Client<HttpConnector, Body>;

const USER_AGENT: &str = "backend-lb-health-check";

/// Why a probe counted as unhealthy.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("invalid probe target '{0}'")]
    InvalidTarget(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("server error status {0}")]
    ServerError(StatusCode),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub fn probe_client() -> ProbeClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// URI to probe: the backend address with `path` appended.
pub fn probe_target(base: &Url, path: &str) -> Result<Uri, ProbeFailure> {
    let target = if path.is_empty() {
        base.as_str().to_string()
    } else {
        format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    target
        .parse::<Uri>()
        .map_err(|_| ProbeFailure::InvalidTarget(target))
}

/// Any status below 500 means the backend is up.
pub fn is_healthy_status(status: StatusCode) -> bool {
    !status.is_server_error()
}

/// Probe one backend. Returns the round-trip time when healthy.
pub async fn probe(
    client: &ProbeClient,
    base: &Url,
    path: &str,
    timeout: Duration,
) -> Result<Duration, ProbeFailure> {
    let uri = probe_target(base, path)?;
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri.clone())
        .header(header::USER_AGENT, USER_AGENT)
        .body(Body::empty())
        .map_err(|_| ProbeFailure::InvalidTarget(uri.to_string()))?;

    let started = Instant::now();
    match time::timeout(timeout, client.request(request)).await {
        Ok(Ok(response)) => {
            let status = response.status();
            if is_healthy_status(status) {
                Ok(started.elapsed())
            } else {
                Err(ProbeFailure::ServerError(status))
            }
        }
        Ok(Err(e)) => Err(ProbeFailure::Connection(e.to_string())),
        Err(_) => Err(ProbeFailure::Timeout(timeout)),
    }
}
