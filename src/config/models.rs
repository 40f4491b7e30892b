// src/config/models.rs
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the client-facing proxy listens on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Upstream targets. At least one is required.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// `round-robin` or `least-connections`. Empty or unknown names fall
    /// back to round-robin.
    #[serde(default)]
    pub algorithm: String,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Seconds between probing rounds. Zero means the 10s default.
    pub interval_secs: u64,
    /// Per-probe timeout in seconds. Zero means the 5s default.
    pub timeout_secs: u64,
    /// Path probed on every backend.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        let secs = if self.interval_secs == 0 { 10 } else { self.interval_secs };
        Duration::from_secs(secs)
    }

    pub fn timeout(&self) -> Duration {
        let secs = if self.timeout_secs == 0 { 5 } else { self.timeout_secs };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
    pub status_path: String,
    pub metrics_path: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([0, 0, 0, 0], 9090)),
            status_path: "/status".to_string(),
            metrics_path: "/metrics".to_string(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("configuration lists no backends");
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            let url = Url::parse(&backend.address)
                .with_context(|| format!("invalid backend address {:?}", backend.address))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!(
                    "backend address {:?} must use http or https",
                    backend.address
                );
            }
            if url.host_str().is_none() {
                bail!("backend address {:?} has no host", backend.address);
            }
            if !seen.insert(backend.address.as_str()) {
                bail!("duplicate backend address {:?}", backend.address);
            }
        }

        if !self.health_check.path.starts_with('/') {
            bail!("health check path must start with '/'");
        }
        if self.health_check.timeout() >= self.health_check.interval() {
            bail!("health check timeout must be shorter than the probing interval");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        serde_yaml::from_str(
            r#"
            backends:
              - address: "http://127.0.0.1:9001"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let config = minimal();
        assert_eq!(config.listen, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.algorithm, "");
        assert_eq!(config.health_check.interval(), Duration::from_secs(10));
        assert_eq!(config.health_check.timeout(), Duration::from_secs(5));
        assert_eq!(config.health_check.path, "/health");
        assert!(config.admin.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn zero_interval_means_default() {
        let mut config = minimal();
        config.health_check.interval_secs = 0;
        assert_eq!(config.health_check.interval(), Duration::from_secs(10));
    }

    #[test]
    fn empty_backend_list_is_rejected() {
        let mut config = minimal();
        config.backends.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let mut config = minimal();
        config.backends.push(BackendConfig {
            address: "http://127.0.0.1:9001".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let mut config = minimal();
        config.backends[0].address = "ftp://127.0.0.1:9001".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn timeout_must_stay_below_interval() {
        let mut config = minimal();
        config.health_check.interval_secs = 4;
        config.health_check.timeout_secs = 5;
        assert!(config.validate().is_err());
    }
}
