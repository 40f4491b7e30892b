//! demos/test_backend.rs
//! Minimal upstream for exercising the balancer by hand.
//! Run: cargo run --example test_backend -- <port> [name]
//!
//! `/health` answers 200 while healthy; POST `/toggle` flips it so probe
//! transitions can be watched in the balancer logs.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use rand::Rng;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

struct BackendState {
    name: String,
    requests: AtomicU64,
    healthy: AtomicBool,
}

async fn handle(
    req: Request<Body>,
    state: Arc<BackendState>,
) -> Result<Response<Body>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => {
            let status = if state.healthy.load(Ordering::Relaxed) {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Ok(Response::builder()
                .status(status)
                .body(Body::empty())
                .unwrap())
        }
        (&Method::POST, "/toggle") => {
            let now = !state.healthy.fetch_xor(true, Ordering::Relaxed);
            Ok(Response::new(Body::from(format!("healthy={now}\n"))))
        }
        _ => {
            let n = state.requests.fetch_add(1, Ordering::Relaxed) + 1;
            let jitter = rand::thread_rng().gen_range(0..25);
            sleep(Duration::from_millis(jitter)).await;
            Ok(Response::new(Body::from(format!(
                "{} served request #{n}\n",
                state.name
            ))))
        }
    }
}

#[tokio::main]
async fn main() {
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(9001);
    let name = std::env::args()
        .nth(2)
        .unwrap_or_else(|| format!("backend-{port}"));

    let state = Arc::new(BackendState {
        name,
        requests: AtomicU64::new(0),
        healthy: AtomicBool::new(true),
    });

    let make_service = make_service_fn(move |_| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, state.clone()))) }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("test backend listening on http://{addr}");
    if let Err(e) = Server::bind(&addr).serve(make_service).await {
        eprintln!("server error: {e}");
    }
}
