// src/main.rs
use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::info;

use balancerd::config;
use balancerd::health::HealthChecker;
use balancerd::load_balancer::Algorithm;
use balancerd::metrics::MetricsRegistry;
use balancerd::proxy::{Backend, BackendPool, Proxy};
use balancerd::server::{admin, RequestHandler, ServerBuilder};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("balancerd=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("loading configuration from {config_path}");
    let config = config::load_config(&config_path).await?;

    let metrics_registry = Arc::new(MetricsRegistry::new()?);
    let metrics = metrics_registry.collector();

    let mut backends = Vec::with_capacity(config.backends.len());
    for backend in &config.backends {
        backends.push(Arc::new(Backend::new(&backend.address)?));
    }
    let algorithm = Algorithm::from_name(&config.algorithm);
    let pool = Arc::new(BackendPool::new(backends, algorithm));
    info!(
        backends = pool.count(),
        algorithm = algorithm.as_str(),
        "backend pool ready"
    );

    let checker = Arc::new(HealthChecker::new(
        config.health_check.clone(),
        pool.clone(),
        Some(metrics.clone()),
    ));
    let checker_task = tokio::spawn(checker.clone().start());

    if config.admin.enabled {
        admin::start_admin_server(config.admin.clone(), pool.clone(), metrics_registry.clone())
            .await?;
    }

    let proxy = Arc::new(Proxy::new(pool, Some(metrics)));
    let handler = RequestHandler::new(proxy);

    info!("starting load balancer on {}", config.listen);
    let server = ServerBuilder::new(config.listen).with_handler(handler);

    tokio::select! {
        result = server.serve() => result?,
        _ = shutdown_signal() => {}
    }

    // Stop probing, but let a round that is already in flight finish.
    checker.shutdown();
    let _ = checker_task.await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
