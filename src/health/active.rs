//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend in the pool
//! - Write liveness back through the pool's mark operations
//!
//! # States
//! ```text
//! Stopped --start()--> Running --stop()--> Stopping --loop exited--> Stopped
//! ```

use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::{ConfigError, HealthCheckConfig};
use crate::health::probe::{self, ProbeClient, ProbeFailure};
use crate::load_balancer::pool::ServerPool;
use crate::load_balancer::server::Server;
use crate::observability::metrics;

/// Timing and target of health probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckSettings {
    pub interval: Duration,
    pub timeout: Duration,
    /// Appended to each backend address; empty probes the address itself.
    pub path: String,
}

impl HealthCheckSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            path: String::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::NonPositiveDuration("health check interval"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::NonPositiveDuration("health check timeout"));
        }
        Ok(())
    }
}

impl From<&HealthCheckConfig> for HealthCheckSettings {
    fn from(config: &HealthCheckConfig) -> Self {
        Self::new(config.interval(), config.timeout()).with_path(config.path.clone())
    }
}

#[derive(Clone)]
struct Prober {
    pool: Arc<ServerPool>,
    settings: HealthCheckSettings,
    client: ProbeClient,
}

impl Prober {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval = ?self.settings.interval,
            timeout = ?self.settings.timeout,
            path = %self.settings.path,
            "Health checker starting"
        );

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_all().await;
                }
            }
        }
    }

    async fn check_all(&self) {
        let servers = self.pool.servers();
        join_all(servers.into_iter().map(|server| self.check_server(server))).await;
    }

    async fn check_server(&self, server: Arc<Server>) {
        let was_alive = server.is_alive();

        let healthy = match probe::probe(
            &self.client,
            server.url(),
            &self.settings.path,
            self.settings.timeout,
        )
        .await
        {
            Ok(elapsed) => {
                server.update_response_time(elapsed);
                true
            }
            Err(ProbeFailure::InvalidTarget(target)) => {
                tracing::error!(addr = %server.url(), probe_uri = %target, "Cannot build health probe, marking down");
                false
            }
            Err(failure) => {
                tracing::debug!(addr = %server.url(), error = %failure, "Health check failed");
                false
            }
        };

        let applied = if healthy {
            self.pool.mark_server_up(server.url())
        } else {
            self.pool.mark_server_down(server.url())
        };

        if !applied {
            tracing::debug!(addr = %server.url(), "Backend removed while probing, result dropped");
            return;
        }

        if was_alive != healthy {
            if healthy {
                tracing::info!(addr = %server.url(), "Backend recovered, marked up");
            } else {
                tracing::warn!(addr = %server.url(), "Backend failed health check, marked down");
            }
        }

        metrics::record_backend_health(server.key(), healthy);
        metrics::record_backend_connections(server.key(), server.active_connections());
    }
}

struct RunningLoop {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

enum LoopState {
    Stopped,
    Running(RunningLoop),
    /// `stop()` is waiting for the old loop; `start()` must not spawn yet.
    Stopping,
}

/// Returns the checker to `Stopped` once a `stop()` call finishes, even if
/// the call is cancelled while waiting.
struct StopCompletion<'a>(&'a Mutex<LoopState>);

impl Drop for StopCompletion<'_> {
    fn drop(&mut self) {
        *self.0.lock() = LoopState::Stopped;
    }
}

/// Background prober that keeps pool liveness current.
pub struct HealthChecker {
    prober: Prober,
    state: Mutex<LoopState>,
}

impl HealthChecker {
    /// Create a stopped checker. Interval and timeout must be non-zero.
    pub fn new(pool: Arc<ServerPool>, settings: HealthCheckSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            prober: Prober {
                pool,
                settings,
                client: probe::probe_client(),
            },
            state: Mutex::new(LoopState::Stopped),
        })
    }

    pub fn settings(&self) -> &HealthCheckSettings {
        &self.prober.settings
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), LoopState::Running(_))
    }

    /// Spawn the probe loop.
    ///
    /// Returns false if a loop is already running or still stopping, or if
    /// there is no Tokio runtime to spawn it on.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, LoopState::Stopped) {
            return false;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(error = %e, "Cannot start health checker outside a Tokio runtime");
                return false;
            }
        };

        let (shutdown, rx) = broadcast::channel(1);
        let handle = runtime.spawn(self.prober.clone().run(rx));
        *state = LoopState::Running(RunningLoop { shutdown, handle });
        true
    }

    /// Signal the loop to exit and wait for it. Returns false if it was not running.
    ///
    /// The loop finishes the round in flight first; a round takes at most one
    /// probe timeout, and a loop that overstays twice that is aborted. Until it
    /// has exited the checker reports not running but refuses to start again.
    pub async fn stop(&self) -> bool {
        let running = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, LoopState::Stopping) {
                LoopState::Running(running) => running,
                other => {
                    *state = other;
                    return false;
                }
            }
        };
        let _completion = StopCompletion(&self.state);
        let RunningLoop { shutdown, mut handle } = running;

        let _ = shutdown.send(());
        let grace = self.prober.settings.timeout * 2;
        if time::timeout(grace, &mut handle).await.is_err() {
            tracing::warn!(grace = ?grace, "Health checker did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
        }
        tracing::info!("Health checker stopped");
        true
    }

    /// Run a single probe round now.
    pub async fn check_all(&self) {
        self.prober.check_all().await;
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        if let LoopState::Running(running) = std::mem::replace(self.state.get_mut(), LoopState::Stopped) {
            running.handle.abort();
        }
    }
}
