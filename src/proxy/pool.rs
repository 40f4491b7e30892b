// src/proxy/pool.rs
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::backend::{Backend, BackendStatus};
use crate::load_balancer::{least_connections, round_robin, Algorithm};

/// Ordered backend membership plus the active algorithm and the round-robin
/// cursor, all behind one pool-level lock. The lock covers membership reads,
/// mutations and selection scans only; no I/O happens under it. When a
/// selector reads a backend's own lock it does so nested inside the pool
/// lock, always in that order.
pub struct BackendPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    backends: Vec<Arc<Backend>>,
    algorithm: Algorithm,
    cursor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("unknown load balancing algorithm {0:?}")]
    UnknownAlgorithm(String),

    #[error("backend {0} is already in the pool")]
    DuplicateBackend(String),
}

impl BackendPool {
    pub fn new(backends: Vec<Arc<Backend>>, algorithm: Algorithm) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                backends,
                algorithm,
                cursor: 0,
            }),
        }
    }

    /// Picks a healthy backend using the active algorithm. `None` means no
    /// backend is currently eligible, which callers surface as 503.
    pub fn select(&self) -> Option<Arc<Backend>> {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;
        match inner.algorithm {
            Algorithm::RoundRobin => round_robin::select(&mut inner.cursor, &inner.backends),
            Algorithm::LeastConnections => least_connections::select(&inner.backends),
        }
    }

    pub fn add_backend(&self, backend: Arc<Backend>) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.backends.iter().any(|b| b.address == backend.address) {
            return Err(PoolError::DuplicateBackend(backend.address.clone()));
        }
        tracing::info!(address = %backend.address, "backend added to pool");
        inner.backends.push(backend);
        Ok(())
    }

    /// Removal only hides the backend from future selections and probe
    /// rounds; clones already handed out stay valid for their in-flight
    /// request or probe. The cursor is not reset.
    pub fn remove_backend(&self, address: &str) {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.backends.len();
        inner.backends.retain(|b| b.address != address);
        if inner.backends.len() == before {
            tracing::info!(address, "remove requested for unknown backend, ignoring");
        } else {
            tracing::info!(address, "backend removed from pool");
        }
    }

    /// Only the two recognized names are accepted; anything else leaves the
    /// current algorithm in place.
    pub fn set_algorithm(&self, name: &str) -> Result<(), PoolError> {
        let algorithm =
            Algorithm::parse(name).ok_or_else(|| PoolError::UnknownAlgorithm(name.to_string()))?;
        let mut inner = self.inner.lock().unwrap();
        if inner.algorithm != algorithm {
            tracing::info!(
                from = inner.algorithm.as_str(),
                to = algorithm.as_str(),
                "switching load balancing algorithm"
            );
            inner.algorithm = algorithm;
        }
        Ok(())
    }

    pub fn algorithm(&self) -> Algorithm {
        self.inner.lock().unwrap().algorithm
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().backends.len()
    }

    /// Re-derived from current backend state on every call, never cached.
    pub fn healthy_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.backends.iter().filter(|b| b.is_healthy()).count()
    }

    /// Membership snapshot as cheap `Arc` clones, taken so probes and other
    /// slow work run outside the pool lock.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.inner.lock().unwrap().backends.clone()
    }

    pub fn status(&self) -> PoolStatus {
        let inner = self.inner.lock().unwrap();
        PoolStatus {
            algorithm: inner.algorithm.as_str(),
            backends: inner.backends.iter().map(|b| b.status()).collect(),
        }
    }
}

/// Read-only pool view for the status surface.
#[derive(Debug, Serialize)]
pub struct PoolStatus {
    pub algorithm: &'static str,
    pub backends: Vec<BackendStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(address: &str, healthy: bool) -> Arc<Backend> {
        let backend = Arc::new(Backend::new(address).unwrap());
        backend.set_healthy(healthy);
        backend
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let pool = BackendPool::new(Vec::new(), Algorithm::RoundRobin);
        assert!(pool.select().is_none());
        assert_eq!(pool.count(), 0);
        assert_eq!(pool.healthy_count(), 0);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let pool = BackendPool::new(
            vec![backend("http://127.0.0.1:9001", true)],
            Algorithm::RoundRobin,
        );
        let err = pool
            .add_backend(backend("http://127.0.0.1:9001", true))
            .unwrap_err();
        assert_eq!(
            err,
            PoolError::DuplicateBackend("http://127.0.0.1:9001".to_string())
        );
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn removing_unknown_address_is_a_noop() {
        let pool = BackendPool::new(
            vec![backend("http://127.0.0.1:9001", true)],
            Algorithm::RoundRobin,
        );
        pool.remove_backend("http://127.0.0.1:9999");
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn invalid_algorithm_name_keeps_current_algorithm() {
        let pool = BackendPool::new(Vec::new(), Algorithm::RoundRobin);
        pool.set_algorithm("least-connections").unwrap();
        assert_eq!(pool.algorithm(), Algorithm::LeastConnections);

        let err = pool.set_algorithm("bogus").unwrap_err();
        assert_eq!(err, PoolError::UnknownAlgorithm("bogus".to_string()));
        assert_eq!(pool.algorithm(), Algorithm::LeastConnections);
    }

    #[test]
    fn cursor_survives_membership_changes() {
        let pool = BackendPool::new(
            vec![
                backend("http://127.0.0.1:9001", true),
                backend("http://127.0.0.1:9002", true),
                backend("http://127.0.0.1:9003", true),
            ],
            Algorithm::RoundRobin,
        );

        assert_eq!(pool.select().unwrap().address, "http://127.0.0.1:9001");
        assert_eq!(pool.select().unwrap().address, "http://127.0.0.1:9002");

        // Cursor sits at 2; adding a member does not rewind it.
        pool.add_backend(backend("http://127.0.0.1:9004", true))
            .unwrap();
        assert_eq!(pool.select().unwrap().address, "http://127.0.0.1:9003");
    }

    #[test]
    fn status_reports_algorithm_and_per_backend_state() {
        let busy = backend("http://127.0.0.1:9001", true);
        busy.increment_load();
        let pool = BackendPool::new(
            vec![busy, backend("http://127.0.0.1:9002", false)],
            Algorithm::LeastConnections,
        );

        let status = pool.status();
        assert_eq!(status.algorithm, "least-connections");
        assert_eq!(status.backends.len(), 2);
        assert!(status.backends[0].healthy);
        assert_eq!(status.backends[0].active_connections, 1);
        assert!(!status.backends[1].healthy);
    }
}
