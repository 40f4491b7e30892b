// src/health/checker.rs
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use reqwest::Client;
use tokio::sync::watch;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendPool};

/// Periodic fan-out prober. Alternates between waiting for the next tick and
/// running one round that probes every backend concurrently; liveness writes
/// land on the backends themselves, so request serving is never blocked.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<BackendPool>,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub address: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: Arc<BackendPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .expect("failed to build health check client");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            pool,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Runs until `shutdown()`. The first tick fires immediately, so a
    /// freshly started balancer has liveness data before the first full
    /// interval elapses. A round in flight when shutdown arrives finishes
    /// before the loop exits.
    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(interval = ?self.config.interval(), "starting health checker");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.clone().run_round().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One probing round: every backend probed concurrently, the round is
    /// complete only when the slowest probe has returned or timed out.
    pub async fn run_round(self: Arc<Self>) {
        let backends = self.pool.backends();
        let mut probes = Vec::with_capacity(backends.len());

        for backend in backends {
            let checker = Arc::clone(&self);
            probes.push(tokio::spawn(async move { checker.probe(backend).await }));
        }

        let mut healthy = 0usize;
        let mut unhealthy = 0usize;
        for joined in join_all(probes).await {
            match joined {
                Ok(result) => {
                    if result.healthy {
                        healthy += 1;
                    } else {
                        unhealthy += 1;
                        debug!(
                            address = %result.address,
                            error = ?result.error,
                            "probe failed"
                        );
                    }
                }
                Err(e) => {
                    error!("probe task failed to join: {e}");
                    unhealthy += 1;
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(self.pool.healthy_count(), self.pool.count());
            for backend in self.pool.backends() {
                metrics.update_backend_connections(&backend.address, backend.load() as i64);
            }
        }

        info!(healthy, unhealthy, "health check round complete");
    }

    async fn probe(&self, backend: Arc<Backend>) -> HealthCheckResult {
        let started = Instant::now();
        let url = format!("{}{}", backend.address, self.config.path);

        let outcome = timeout(self.config.timeout(), self.client.get(&url).send()).await;

        let (healthy, error) = match outcome {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    (true, None)
                } else {
                    (false, Some(format!("HTTP {status}")))
                }
            }
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some("probe timed out".to_string())),
        };

        // The write happens every round; only transitions are logged.
        let was_healthy = backend.record_probe(healthy);
        if healthy && !was_healthy {
            info!(address = %backend.address, "backend is healthy");
        } else if !healthy && was_healthy {
            warn!(address = %backend.address, error = ?error, "backend is unhealthy");
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.address, healthy);
        }

        HealthCheckResult {
            address: backend.address.clone(),
            healthy,
            response_time_ms: started.elapsed().as_millis() as u64,
            error,
        }
    }
}
