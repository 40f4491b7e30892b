// src/server/admin.rs
use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{header, Body, Request, Response, Server, StatusCode};
use tracing::{error, info};

use crate::config::AdminConfig;
use crate::metrics::MetricsRegistry;
use crate::proxy::BackendPool;

/// Read-only status and metrics listener on its own port. Reports the active
/// algorithm and per-backend address, health and connection count; mutates
/// nothing.
pub async fn start_admin_server(
    config: AdminConfig,
    pool: Arc<BackendPool>,
    registry: Arc<MetricsRegistry>,
) -> Result<()> {
    let addr = config.listen;
    let status_path = Arc::new(config.status_path);
    let metrics_path = Arc::new(config.metrics_path);

    let make_service = make_service_fn(move |_| {
        let pool = pool.clone();
        let registry = registry.clone();
        let status_path = status_path.clone();
        let metrics_path = metrics_path.clone();

        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let pool = pool.clone();
                let registry = registry.clone();
                let status_path = status_path.clone();
                let metrics_path = metrics_path.clone();

                async move {
                    let response = if req.uri().path() == status_path.as_str() {
                        status_response(&pool)
                    } else if req.uri().path() == metrics_path.as_str() {
                        Response::builder()
                            .status(StatusCode::OK)
                            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                            .body(Body::from(registry.gather()))
                            .unwrap()
                    } else {
                        Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Body::from("Not Found"))
                            .unwrap()
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("admin server listening on http://{addr}");

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("admin server error: {e}");
        }
    });

    Ok(())
}

fn status_response(pool: &BackendPool) -> Response<Body> {
    match serde_json::to_vec(&pool.status()) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap(),
        Err(e) => {
            error!("failed to serialize pool status: {e}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap()
        }
    }
}
