// src/proxy/backend.rs
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

/// One upstream target. Health and load live behind a single lock so a
/// concurrent reader never observes the pair half-updated. The lock is held
/// only for field access, never across I/O.
#[derive(Debug)]
pub struct Backend {
    pub address: String,
    state: Mutex<BackendState>,
}

#[derive(Debug, Default)]
struct BackendState {
    healthy: bool,
    active_connections: usize,
    last_probe: Option<DateTime<Utc>>,
}

impl Backend {
    /// Creates a backend from an absolute `http`/`https` address. A new
    /// backend starts unhealthy until the prober reports on it.
    pub fn new(address: impl Into<String>) -> anyhow::Result<Self> {
        let mut address = address.into();
        while address.ends_with('/') {
            address.pop();
        }

        let url = Url::parse(&address)
            .with_context(|| format!("invalid backend address {address:?}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("backend address {address:?} must use http or https");
        }

        Ok(Self {
            address,
            state: Mutex::new(BackendState::default()),
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.state.lock().unwrap().healthy
    }

    /// Returns the previous value so callers can log actual transitions.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        std::mem::replace(&mut state.healthy, healthy)
    }

    /// Like `set_healthy`, but also stamps the probe time.
    pub(crate) fn record_probe(&self, healthy: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        state.last_probe = Some(Utc::now());
        std::mem::replace(&mut state.healthy, healthy)
    }

    pub fn load(&self) -> usize {
        self.state.lock().unwrap().active_connections
    }

    pub fn increment_load(&self) {
        self.state.lock().unwrap().active_connections += 1;
    }

    /// Floors at zero; a decrement on an idle backend is a no-op.
    pub fn decrement_load(&self) {
        let mut state = self.state.lock().unwrap();
        state.active_connections = state.active_connections.saturating_sub(1);
    }

    /// Health and load read under one lock acquisition, for selectors that
    /// need the pair together.
    pub(crate) fn load_if_healthy(&self) -> Option<usize> {
        let state = self.state.lock().unwrap();
        state.healthy.then_some(state.active_connections)
    }

    /// Counts a dispatched request against this backend until the returned
    /// guard is dropped.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.increment_load();
        ConnectionGuard {
            backend: Arc::clone(self),
        }
    }

    pub fn status(&self) -> BackendStatus {
        let state = self.state.lock().unwrap();
        BackendStatus {
            address: self.address.clone(),
            healthy: state.healthy,
            active_connections: state.active_connections,
            last_probe: state.last_probe,
        }
    }
}

/// Releases the connection count on drop, which covers every exit path of a
/// dispatch, including transport failures and panics.
#[derive(Debug)]
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl Deref for ConnectionGuard {
    type Target = Backend;

    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.decrement_load();
    }
}

/// Immutable per-backend view for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub address: String,
    pub healthy: bool,
    pub active_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_backend_starts_unhealthy_and_idle() {
        let backend = Backend::new("http://127.0.0.1:9001").unwrap();
        assert!(!backend.is_healthy());
        assert_eq!(backend.load(), 0);
        assert!(backend.status().last_probe.is_none());
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let backend = Backend::new("http://127.0.0.1:9001/").unwrap();
        assert_eq!(backend.address, "http://127.0.0.1:9001");
    }

    #[test]
    fn rejects_non_http_addresses() {
        assert!(Backend::new("not a url").is_err());
        assert!(Backend::new("ftp://127.0.0.1:21").is_err());
    }

    #[test]
    fn set_healthy_reports_previous_value() {
        let backend = Backend::new("http://127.0.0.1:9001").unwrap();
        assert!(!backend.set_healthy(true));
        assert!(backend.set_healthy(true));
        assert!(backend.set_healthy(false));
    }

    #[test]
    fn decrement_floors_at_zero() {
        let backend = Backend::new("http://127.0.0.1:9001").unwrap();
        backend.decrement_load();
        assert_eq!(backend.load(), 0);

        backend.increment_load();
        backend.increment_load();
        backend.decrement_load();
        assert_eq!(backend.load(), 1);
    }

    #[test]
    fn guard_releases_on_drop() {
        let backend = Arc::new(Backend::new("http://127.0.0.1:9001").unwrap());
        {
            let _guard = backend.track_connection();
            assert_eq!(backend.load(), 1);
            let _second = backend.track_connection();
            assert_eq!(backend.load(), 2);
        }
        assert_eq!(backend.load(), 0);
    }
}
