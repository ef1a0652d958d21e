//! Backend address parsing and normalization.
//!
//! Two addresses name the same backend when their normalized keys match:
//! scheme and host are case-folded, default ports (80 for http, 443 for https)
//! are dropped and a trailing path slash is stripped unless the path is root.
//!
//! Backends are reached over plain HTTP only, so `https` addresses are
//! rejected up front.

use thiserror::Error;
use url::Url;

/// Error raised for a backend address that cannot be used.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid backend address '{address}': {source}")]
    Parse {
        address: String,
        #[source]
        source: url::ParseError,
    },

    #[error("backend address '{0}' has no host")]
    MissingHost(String),

    #[error("backend address '{address}' uses unsupported scheme '{scheme}'")]
    UnsupportedScheme { address: String, scheme: String },

    #[error("backend '{0}' must have a weight of at least 1")]
    ZeroWeight(String),

    #[error("backend '{0}' must allow at least one connection")]
    ZeroCapacity(String),
}

/// Parse a configured backend address.
///
/// Bare `host:port` strings are read as plain HTTP.
pub fn parse_address(address: &str) -> Result<Url, AddressError> {
    let trimmed = address.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&candidate).map_err(|source| AddressError::Parse {
        address: address.to_string(),
        source,
    })?;

    match url.scheme() {
        "http" => {}
        other => {
            return Err(AddressError::UnsupportedScheme {
                address: address.to_string(),
                scheme: other.to_string(),
            })
        }
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(AddressError::MissingHost(address.to_string())),
    }
}

/// Build the comparison key for a backend URL.
pub fn normalize_url(url: &Url) -> String {
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

    // `Url::port` already hides the scheme's default port; the explicit check
    // covers URLs assembled by hand with `set_port`.
    let port = match (scheme.as_str(), url.port()) {
        ("http", Some(80)) | ("https", Some(443)) | (_, None) => String::new(),
        (_, Some(port)) => format!(":{}", port),
    };

    let mut path = url.path();
    if path != "/" && !path.is_empty() {
        path = path.trim_end_matches('/');
    }
    if path.is_empty() {
        path = "/";
    }

    let mut key = format!("{}://{}{}{}", scheme, host, port, path);
    if let Some(query) = url.query() {
        key.push('?');
        key.push_str(query);
    }
    key
}

/// Parse and normalize in one step.
pub fn normalize_address(address: &str) -> Result<String, AddressError> {
    parse_address(address).map(|url| normalize_url(&url))
}
