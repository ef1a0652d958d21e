//! Backend server abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track liveness and the time of the last liveness update
//! - Enforce the max connection limit with atomic admission
//! - Keep a ring of recent response times
//!
//! # Design Decisions
//! - All mutable state sits behind one per-server `RwLock`; no pool lock is needed
//!   to update it
//! - Admission is a single critical section (check + increment), so concurrent
//!   callers can never push the count past `max_connections`
//! - A server can be marked dead while it still holds connections; draining is
//!   left to the callers holding guards

use parking_lot::RwLock;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use url::Url;

use crate::load_balancer::address::{normalize_url, parse_address, AddressError};

/// Number of response-time samples kept per server.
pub const RESPONSE_HISTORY_LEN: usize = 100;

#[derive(Debug)]
struct ServerState {
    alive: bool,
    active_connections: usize,
    last_health_check: SystemTime,
    response_times: [Duration; RESPONSE_HISTORY_LEN],
    response_index: usize,
}

/// Point-in-time view of a server's mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub alive: bool,
    pub active_connections: usize,
    pub max_connections: usize,
    pub last_health_check: SystemTime,
}

/// A single backend server.
#[derive(Debug)]
pub struct Server {
    url: Url,
    key: String,
    weight: u32,
    max_connections: usize,
    state: RwLock<ServerState>,
}

impl Server {
    /// Create a new server from a configured address.
    pub fn new(address: &str, weight: u32, max_connections: usize) -> Result<Self, AddressError> {
        let url = parse_address(address)?;
        if weight == 0 {
            return Err(AddressError::ZeroWeight(address.to_string()));
        }
        if max_connections == 0 {
            return Err(AddressError::ZeroCapacity(address.to_string()));
        }
        Ok(Self::from_url(url, weight, max_connections))
    }

    fn from_url(url: Url, weight: u32, max_connections: usize) -> Self {
        let key = normalize_url(&url);
        Self {
            url,
            key,
            weight,
            max_connections,
            state: RwLock::new(ServerState {
                alive: true,
                active_connections: 0,
                last_health_check: SystemTime::now(),
                response_times: [Duration::ZERO; RESPONSE_HISTORY_LEN],
                response_index: 0,
            }),
        }
    }

    /// The address this server was configured with.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Normalized address used for identity comparisons.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn is_alive(&self) -> bool {
        self.state.read().alive
    }

    /// Set liveness and stamp the last health check time.
    pub fn set_alive(&self, alive: bool) {
        let mut state = self.state.write();
        state.alive = alive;
        state.last_health_check = SystemTime::now();
    }

    pub fn last_health_check(&self) -> SystemTime {
        self.state.read().last_health_check
    }

    pub fn active_connections(&self) -> usize {
        self.state.read().active_connections
    }

    /// True if the server is alive and below its connection limit.
    ///
    /// The answer may be stale by the time the caller acts on it; use
    /// [`Server::increment_connections`] or [`Server::try_acquire`] to admit.
    pub fn can_accept_connection(&self) -> bool {
        let state = self.state.read();
        state.alive && state.active_connections < self.max_connections
    }

    /// Atomically admit one connection.
    ///
    /// Returns false, leaving the count untouched, when the server is dead or full.
    pub fn increment_connections(&self) -> bool {
        let mut state = self.state.write();
        if !state.alive || state.active_connections >= self.max_connections {
            return false;
        }
        state.active_connections += 1;
        true
    }

    /// Release one connection. Saturates at zero.
    pub fn decrement_connections(&self) {
        let mut state = self.state.write();
        state.active_connections = state.active_connections.saturating_sub(1);
    }

    /// Admit one connection and return a guard that releases it on drop.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        if self.increment_connections() {
            Some(ConnectionGuard {
                server: self.clone(),
            })
        } else {
            None
        }
    }

    /// Record a response time, overwriting the oldest sample.
    pub fn update_response_time(&self, elapsed: Duration) {
        let mut state = self.state.write();
        let index = state.response_index;
        state.response_times[index] = elapsed;
        state.response_index = (index + 1) % RESPONSE_HISTORY_LEN;
    }

    /// Mean of the recorded (nonzero) response times.
    pub fn average_response_time(&self) -> Option<Duration> {
        let state = self.state.read();
        let (total, count) = state
            .response_times
            .iter()
            .filter(|d| !d.is_zero())
            .fold((Duration::ZERO, 0u32), |(total, count), d| (total + *d, count + 1));

        if count == 0 {
            None
        } else {
            Some(total / count)
        }
    }

    /// Read liveness, connections and last check under a single lock.
    pub fn snapshot(&self) -> ServerSnapshot {
        let state = self.state.read();
        ServerSnapshot {
            alive: state.alive,
            active_connections: state.active_connections,
            max_connections: self.max_connections,
            last_health_check: state.last_health_check,
        }
    }
}

/// A RAII guard holding one admitted connection on a server.
#[derive(Debug)]
pub struct ConnectionGuard {
    server: Arc<Server>,
}

impl ConnectionGuard {
    /// The server this connection was admitted to.
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }
}

impl Deref for ConnectionGuard {
    type Target = Server;
    fn deref(&self) -> &Self::Target {
        &self.server
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.server.decrement_connections();
    }
}
