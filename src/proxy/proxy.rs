// src/proxy/proxy.rs
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use hyper::client::HttpConnector;
use hyper::header::{self, HeaderMap, HeaderName};
use hyper::http::uri::InvalidUri;
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use tracing::{debug, error, warn};

use super::backend::Backend;
use super::pool::BackendPool;
use crate::metrics::MetricsCollector;

/// Forwards client requests to pool-selected backends. One shared client
/// handles all upstream connections.
pub struct Proxy {
    pool: Arc<BackendPool>,
    client: hyper::Client<HttpsConnector<HttpConnector>>,
    metrics: Option<Arc<MetricsCollector>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no healthy backends available")]
    NoHealthyBackends,

    #[error("failed to forward request to {backend}: {source}")]
    ForwardFailed {
        backend: String,
        #[source]
        source: hyper::Error,
    },

    #[error("could not build upstream uri: {0}")]
    InvalidUpstreamUri(#[from] InvalidUri),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyBackends => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::ForwardFailed { .. } | ProxyError::InvalidUpstreamUri(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let status = err.status();
        let message = match status {
            StatusCode::SERVICE_UNAVAILABLE => "no healthy backends available",
            _ => "bad gateway",
        };

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from(message))
            .unwrap()
    }
}

impl Proxy {
    pub fn new(pool: Arc<BackendPool>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        let client = hyper::Client::builder().build::<_, Body>(HttpsConnector::new());
        Self {
            pool,
            client,
            metrics,
        }
    }

    /// Full dispatch path: select, account, forward, relay. Every outcome
    /// maps to a response; errors never escape to the connection layer. A
    /// failed forward is reported as 502 and leaves health state alone, the
    /// prober owns that.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let Some(backend) = self.pool.select() else {
            warn!(%method, %path, "no healthy backends available");
            let response = Response::from(ProxyError::NoHealthyBackends);
            self.record(&method, response.status(), "-", started);
            return response;
        };

        let guard = backend.track_connection();
        match self.forward(&backend, req).await {
            Ok(response) => {
                debug!(
                    %method,
                    %path,
                    backend = %backend.address,
                    status = %response.status(),
                    "request forwarded"
                );
                self.record(&method, response.status(), &backend.address, started);

                // The connection stays counted until the relayed body is done.
                let (parts, body) = response.into_parts();
                let body = Body::wrap_stream(body.map(move |chunk| {
                    let _ = &guard;
                    chunk
                }));
                Response::from_parts(parts, body)
            }
            Err(err) => {
                error!(
                    %method,
                    %path,
                    backend = %backend.address,
                    error = %err,
                    "forwarding failed"
                );
                let response = Response::from(err);
                self.record(&method, response.status(), &backend.address, started);
                response
            }
        }
    }

    /// Rebuilds the request against the chosen backend, preserving method,
    /// path, query, headers and body. Hop-by-hop headers stay on this hop.
    async fn forward(
        &self,
        backend: &Backend,
        req: Request<Body>,
    ) -> Result<Response<Body>, ProxyError> {
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        parts.uri = format!("{}{}", backend.address, path_and_query).parse::<Uri>()?;

        strip_hop_by_hop(&mut parts.headers);
        // The client fills Host in from the upstream authority.
        parts.headers.remove(header::HOST);

        let upstream = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|source| ProxyError::ForwardFailed {
                backend: backend.address.clone(),
                source,
            })?;

        let (mut parts, body) = upstream.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, body))
    }

    fn record(&self, method: &Method, status: StatusCode, backend: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(method.as_str(), status.as_u16(), backend, started.elapsed());
        }
    }
}

/// RFC 7230 section 6.1: connection-level headers are not forwarded, nor are
/// any headers the Connection header itself names.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let connection_named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| name.trim().parse::<HeaderName>().ok())
        .collect();
    for name in connection_named {
        headers.remove(name);
    }

    for name in [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "close, x-trace-state".parse().unwrap());
        headers.insert("x-trace-state", "abc".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert(header::ACCEPT, "*/*".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-trace-state").is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get(header::ACCEPT).is_some());
    }

    #[test]
    fn errors_map_to_gateway_statuses() {
        let response = Response::from(ProxyError::NoHealthyBackends);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
