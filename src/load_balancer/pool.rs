//! Backend pool management.
//!
//! # Responsibilities
//! - Own the ordered, duplicate-free list of backends
//! - Rotate through eligible backends (round robin, skipping dead or full ones)
//! - Apply administrative and health-check liveness changes
//!
//! # Locking
//! The pool lock guards the server list, the rotation cursor and the cached
//! weight total. Per-server state lives behind each server's own lock. The only
//! nesting is pool -> server (selection reads server state while it holds the
//! pool lock); no code path takes a server lock and then the pool lock.
//! Liveness writes look the server up under the pool lock, release it and only
//! then take the server lock.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use crate::config::{BackendConfig, ConfigError};
use crate::load_balancer::address::normalize_url;
use crate::load_balancer::server::{ConnectionGuard, Server};

#[derive(Debug, Default)]
struct PoolInner {
    servers: Vec<Arc<Server>>,
    cursor: usize,
    total_weight: u64,
}

impl PoolInner {
    /// Locate a server by normalized key. Callers hold the pool lock.
    fn find_server(&self, key: &str) -> Option<(usize, &Arc<Server>)> {
        self.servers
            .iter()
            .enumerate()
            .find(|(_, server)| server.key() == key)
    }

    /// Circular scan from the cursor; the first server `admit` accepts wins and
    /// the cursor moves one past it.
    fn rotate<T>(&mut self, mut admit: impl FnMut(&Arc<Server>) -> Option<T>) -> Option<T> {
        let len = self.servers.len();
        if len == 0 {
            return None;
        }
        if self.cursor >= len {
            self.cursor = 0;
        }

        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            if let Some(found) = admit(&self.servers[index]) {
                self.cursor = (index + 1) % len;
                return Some(found);
            }
        }
        None
    }
}

/// Result of syncing the pool against a backend list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Registry of backend servers plus round-robin state.
#[derive(Debug, Default)]
pub struct ServerPool {
    inner: RwLock<PoolInner>,
}

impl ServerPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from configuration, failing on the first bad entry.
    pub fn from_configs(configs: &[BackendConfig]) -> Result<Self, ConfigError> {
        let pool = Self::new();
        for config in configs {
            let server = config.build_server()?;
            if !pool.add_server(Arc::new(server)) {
                tracing::warn!(address = %config.address, "Duplicate backend address ignored");
            }
        }
        Ok(pool)
    }

    /// Register a server. Returns false if its normalized address is already present.
    pub fn add_server(&self, server: Arc<Server>) -> bool {
        let mut inner = self.inner.write();
        if inner.find_server(server.key()).is_some() {
            return false;
        }

        inner.total_weight += u64::from(server.weight());
        tracing::debug!(address = %server.url(), weight = server.weight(), "Backend added");
        inner.servers.push(server);
        true
    }

    /// Remove a server by address. In-flight connections are not waited for.
    pub fn remove_server(&self, address: &Url) -> bool {
        let key = normalize_url(address);
        let mut inner = self.inner.write();

        let Some((index, _)) = inner.find_server(&key) else {
            return false;
        };

        let removed = inner.servers.remove(index);
        inner.total_weight -= u64::from(removed.weight());
        if inner.cursor >= inner.servers.len() {
            inner.cursor = 0;
        }
        tracing::debug!(address = %removed.url(), "Backend removed");
        true
    }

    /// Select the next server able to take a connection, without admitting it.
    pub fn get_next_server(&self) -> Option<Arc<Server>> {
        self.inner
            .write()
            .rotate(|server| server.can_accept_connection().then(|| server.clone()))
    }

    /// Select the next server and admit a connection on it in the same step.
    pub fn acquire_next(&self) -> Option<ConnectionGuard> {
        self.inner.write().rotate(|server| server.try_acquire())
    }

    /// All servers currently reporting alive, in registry order.
    pub fn get_healthy_servers(&self) -> Vec<Arc<Server>> {
        self.inner
            .read()
            .servers
            .iter()
            .filter(|server| server.is_alive())
            .cloned()
            .collect()
    }

    /// Snapshot of every registered server.
    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.inner.read().servers.clone()
    }

    pub fn get_server_count(&self) -> usize {
        self.inner.read().servers.len()
    }

    pub fn get_alive_server_count(&self) -> usize {
        self.inner
            .read()
            .servers
            .iter()
            .filter(|server| server.is_alive())
            .count()
    }

    /// Sum of weights across registered servers. Selection does not use it yet.
    pub fn total_weight(&self) -> u64 {
        self.inner.read().total_weight
    }

    /// Look up a server by address.
    pub fn get_server(&self, address: &Url) -> Option<Arc<Server>> {
        let key = normalize_url(address);
        self.inner
            .read()
            .find_server(&key)
            .map(|(_, server)| server.clone())
    }

    pub fn mark_server_down(&self, address: &Url) -> bool {
        self.set_liveness(address, false)
    }

    pub fn mark_server_up(&self, address: &Url) -> bool {
        self.set_liveness(address, true)
    }

    fn set_liveness(&self, address: &Url, alive: bool) -> bool {
        // Pool lock is dropped at the end of the lookup.
        match self.get_server(address) {
            Some(server) => {
                server.set_alive(alive);
                true
            }
            None => false,
        }
    }

    /// Make the pool contain exactly the configured backends.
    ///
    /// Existing servers keep their state; the whole list is validated before any
    /// change is applied.
    pub fn reconcile(&self, configs: &[BackendConfig]) -> Result<ReconcileReport, ConfigError> {
        let wanted = configs
            .iter()
            .map(|config| config.build_server().map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let wanted_keys: HashSet<&str> = wanted.iter().map(|server| server.key()).collect();

        let mut report = ReconcileReport::default();

        let stale: Vec<Url> = self
            .servers()
            .into_iter()
            .filter(|server| !wanted_keys.contains(server.key()))
            .map(|server| server.url().clone())
            .collect();
        for url in stale {
            if self.remove_server(&url) {
                report.removed.push(url.to_string());
            }
        }

        for server in wanted {
            let url = server.url().to_string();
            if self.add_server(server) {
                report.added.push(url);
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::address::parse_address;
    use std::thread;

    fn pool_of(addresses: &[&str]) -> ServerPool {
        let pool = ServerPool::new();
        for address in addresses {
            assert!(pool.add_server(Arc::new(Server::new(address, 1, 10).unwrap())));
        }
        pool
    }

    fn url(address: &str) -> Url {
        parse_address(address).unwrap()
    }

    fn next_key(pool: &ServerPool) -> Option<String> {
        pool.get_next_server().map(|s| s.key().to_string())
    }

    #[test]
    fn test_round_robin_visits_each_once() {
        let pool = pool_of(&["http://a.com", "http://b.com", "http://c.com"]);
        let picks: Vec<_> = (0..3).map(|_| next_key(&pool).unwrap()).collect();
        assert_eq!(picks, vec!["http://a.com/", "http://b.com/", "http://c.com/"]);
        assert_eq!(next_key(&pool).unwrap(), "http://a.com/");
    }

    #[test]
    fn test_skips_dead_servers() {
        let pool = pool_of(&["http://a.com", "http://b.com", "http://c.com"]);
        assert!(pool.mark_server_down(&url("http://a.com")));

        assert_eq!(next_key(&pool).unwrap(), "http://b.com/");
        assert_eq!(next_key(&pool).unwrap(), "http://c.com/");
        assert_eq!(next_key(&pool).unwrap(), "http://b.com/");
    }

    #[test]
    fn test_skips_full_servers() {
        let pool = ServerPool::new();
        let a = Arc::new(Server::new("http://a.com", 1, 1).unwrap());
        let b = Arc::new(Server::new("http://b.com", 1, 1).unwrap());
        pool.add_server(a.clone());
        pool.add_server(b.clone());

        assert!(a.increment_connections());
        assert_eq!(next_key(&pool).unwrap(), "http://b.com/");
        assert_eq!(next_key(&pool).unwrap(), "http://b.com/");
    }

    #[test]
    fn test_all_down_returns_none() {
        let pool = pool_of(&["http://a.com", "http://b.com"]);
        pool.mark_server_down(&url("http://a.com"));
        pool.mark_server_down(&url("http://b.com"));
        assert!(pool.get_next_server().is_none());
        assert!(pool.acquire_next().is_none());
        assert!(pool.get_healthy_servers().is_empty());
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let pool = ServerPool::new();
        assert!(pool.get_next_server().is_none());
        assert_eq!(pool.get_server_count(), 0);
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let pool = pool_of(&["http://Example.com:80/path/"]);
        let dup = Arc::new(Server::new("http://example.com/path", 5, 10).unwrap());
        assert!(!pool.add_server(dup));
        assert_eq!(pool.get_server_count(), 1);
        assert_eq!(pool.total_weight(), 1);
    }

    #[test]
    fn test_normalized_address_for_remove_and_mark() {
        let pool = pool_of(&["http://Example.com:80/path/", "http://other.com"]);
        assert!(pool.mark_server_down(&url("http://example.com/path")));
        assert_eq!(pool.get_alive_server_count(), 1);
        assert!(pool.mark_server_up(&url("HTTP://EXAMPLE.COM/path/")));
        assert_eq!(pool.get_alive_server_count(), 2);
        assert!(pool.remove_server(&url("http://example.com:80/path")));
        assert_eq!(pool.get_server_count(), 1);
    }

    #[test]
    fn test_unknown_address() {
        let pool = pool_of(&["http://a.com"]);
        assert!(!pool.mark_server_down(&url("http://nope.com")));
        assert!(!pool.mark_server_up(&url("http://nope.com")));
        assert!(!pool.remove_server(&url("http://nope.com")));
    }

    #[test]
    fn test_weight_total_tracks_membership() {
        let pool = ServerPool::new();
        pool.add_server(Arc::new(Server::new("http://a.com", 3, 1).unwrap()));
        pool.add_server(Arc::new(Server::new("http://b.com", 4, 1).unwrap()));
        assert_eq!(pool.total_weight(), 7);
        pool.remove_server(&url("http://a.com"));
        assert_eq!(pool.total_weight(), 4);
    }

    #[test]
    fn test_removal_resets_cursor() {
        let pool = pool_of(&["http://a.com", "http://b.com", "http://c.com"]);
        next_key(&pool);
        next_key(&pool);
        next_key(&pool);
        next_key(&pool);
        next_key(&pool); // cursor now at 2 (c)

        assert!(pool.remove_server(&url("http://c.com")));
        assert_eq!(next_key(&pool).unwrap(), "http://a.com/");

        assert!(pool.remove_server(&url("http://a.com")));
        assert!(pool.remove_server(&url("http://b.com")));
        assert!(pool.get_next_server().is_none());
    }

    #[test]
    fn test_healthy_servers_keep_registry_order() {
        let pool = pool_of(&["http://a.com", "http://b.com", "http://c.com"]);
        pool.mark_server_down(&url("http://b.com"));
        let healthy: Vec<_> = pool
            .get_healthy_servers()
            .iter()
            .map(|s| s.key().to_string())
            .collect();
        assert_eq!(healthy, vec!["http://a.com/", "http://c.com/"]);
    }

    #[test]
    fn test_acquire_next_admits_and_releases() {
        let pool = ServerPool::new();
        let a = Arc::new(Server::new("http://a.com", 1, 1).unwrap());
        pool.add_server(a.clone());

        let guard = pool.acquire_next().expect("capacity available");
        assert_eq!(a.active_connections(), 1);
        assert!(pool.acquire_next().is_none());
        drop(guard);
        assert!(pool.acquire_next().is_some());
    }

    #[test]
    fn test_reconcile_adds_and_removes() {
        let pool = pool_of(&["http://a.com", "http://b.com"]);
        pool.mark_server_down(&url("http://b.com"));

        let configs = vec![
            BackendConfig::new("http://b.com:80/"),
            BackendConfig::new("http://c.com"),
        ];
        let report = pool.reconcile(&configs).unwrap();
        assert_eq!(report.removed, vec!["http://a.com/".to_string()]);
        assert_eq!(report.added, vec!["http://c.com/".to_string()]);

        // b keeps its state
        assert!(!pool.get_server(&url("http://b.com")).unwrap().is_alive());
        assert_eq!(pool.get_server_count(), 2);
    }

    #[test]
    fn test_reconcile_rejects_bad_list_without_changes() {
        let pool = pool_of(&["http://a.com"]);
        let configs = vec![BackendConfig::new("ftp://bad")];
        assert!(pool.reconcile(&configs).is_err());
        assert_eq!(pool.get_server_count(), 1);
    }

    #[test]
    fn test_from_configs_fails_fast() {
        let configs = vec![
            BackendConfig::new("http://a.com"),
            BackendConfig::new("http://exa mple.com"),
        ];
        assert!(matches!(
            ServerPool::from_configs(&configs),
            Err(ConfigError::Address(_))
        ));
    }

    #[test]
    fn test_concurrent_selection_and_removal() {
        let pool = Arc::new(pool_of(&[
            "http://a.com",
            "http://b.com",
            "http://c.com",
            "http://d.com",
        ]));

        let selectors: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        if let Some(guard) = pool.acquire_next() {
                            assert!(guard.active_connections() <= guard.max_connections());
                        }
                    }
                })
            })
            .collect();

        let churn = {
            let pool = pool.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    pool.remove_server(&url("http://d.com"));
                    pool.add_server(Arc::new(Server::new("http://d.com", 1, 10).unwrap()));
                    pool.mark_server_down(&url("http://a.com"));
                    pool.mark_server_up(&url("http://a.com"));
                }
            })
        };

        for s in selectors {
            s.join().unwrap();
        }
        churn.join().unwrap();

        assert_eq!(pool.get_server_count(), 4);
        for server in pool.servers() {
            assert_eq!(server.active_connections(), 0);
        }
    }

    #[test]
    fn test_concurrent_duplicate_adds_register_once() {
        let pool = Arc::new(ServerPool::new());
        let spellings = ["http://Dup.com:80/", "http://dup.com", "HTTP://DUP.COM"];

        let adders: Vec<_> = (0..16)
            .map(|i| {
                let pool = pool.clone();
                let address = spellings[i % spellings.len()];
                thread::spawn(move || pool.add_server(Arc::new(Server::new(address, 3, 10).unwrap())))
            })
            .collect();

        let accepted = adders
            .into_iter()
            .map(|adder| adder.join().unwrap())
            .filter(|added| *added)
            .count();

        assert_eq!(accepted, 1);
        assert_eq!(pool.get_server_count(), 1);
        assert_eq!(pool.total_weight(), 3);
    }
}
