// ────────────────────────────────
// src/proxy/proxy.rs
// Forwards each inbound request to the next backend in the pool
// ────────────────────────────────

use super::{BackendAddress, BackendPool, PoolError};
use crate::config::ProxyConfig;
use crate::metrics::{MetricsCollector, Timer};
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{self, HeaderMap, HeaderName};
use hyper::{Body, Client, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info_span, Instrument};
use uuid::Uuid;

/// Payload sent back on any local failure.
pub const FAILURE_BODY: &str = "internal server error";

/// Status and full body to relay to the original caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResult {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyResult {
    pub fn failure() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: Bytes::from_static(FAILURE_BODY.as_bytes()),
        }
    }

    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        response
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no backend available: {0}")]
    NoBackend(#[from] PoolError),

    #[error("failed to build request for {backend}: {source}")]
    InvalidRequest {
        backend: BackendAddress,
        #[source]
        source: hyper::http::Error,
    },

    #[error("request to {backend} failed: {source}")]
    Transport {
        backend: BackendAddress,
        #[source]
        source: hyper::Error,
    },

    #[error("failed to read response from {backend}: {source}")]
    BodyRead {
        backend: BackendAddress,
        #[source]
        source: hyper::Error,
    },

    #[error("request to {backend} timed out after {timeout:?}")]
    Timeout {
        backend: BackendAddress,
        timeout: Duration,
    },

    #[error("forwarding task ended without a result")]
    Dropped,
}

impl ProxyError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::NoBackend(_) => "no_backend",
            ProxyError::InvalidRequest { .. } => "invalid_request",
            ProxyError::Transport { .. } => "transport",
            ProxyError::BodyRead { .. } => "body_read",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::Dropped => "dropped",
        }
    }
}

// Every local failure looks the same to the caller.
impl From<ProxyError> for Response<Body> {
    fn from(_: ProxyError) -> Self {
        ProxyResult::failure().into_response()
    }
}

pub struct Proxy {
    pool: Arc<BackendPool>,
    client: Client<HttpConnector>,
    timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(
        pool: Arc<BackendPool>,
        config: &ProxyConfig,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            pool,
            client: Client::builder().build_http(),
            timeout: config.timeout(),
            metrics,
        }
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Forwards `req` to exactly one backend and never fails: local errors
    /// become a 500 with [`FAILURE_BODY`].
    ///
    /// The outbound call runs on its own task and hands its single result
    /// back over a oneshot owned by this request alone.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let timer = Timer::new();
        let method = req.method().clone();
        let span = info_span!(
            "forward",
            request_id = %Uuid::new_v4(),
            %method,
            path = %req.uri().path()
        );

        let (tx, rx) = oneshot::channel();
        let pool = self.pool.clone();
        let client = self.client.clone();
        let timeout = self.timeout;
        tokio::spawn(
            async move {
                let _ = tx.send(forward(&pool, &client, timeout, req).await);
            }
            .instrument(span.clone()),
        );

        let result = rx.await.unwrap_or(Err(ProxyError::Dropped));

        span.in_scope(|| match result {
            Ok((backend, result)) => {
                debug!(%backend, status = %result.status, "relaying backend response");
                if let Some(metrics) = &self.metrics {
                    metrics.record_request(
                        method.as_str(),
                        result.status.as_u16(),
                        backend.as_str(),
                        timer.elapsed(),
                    );
                }
                result.into_response()
            }
            Err(e) => {
                error!(error = %e, "forwarding failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_forward_error(e.kind());
                    metrics.record_request(
                        method.as_str(),
                        StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                        "none",
                        timer.elapsed(),
                    );
                }
                e.into()
            }
        })
    }
}

async fn forward(
    pool: &BackendPool,
    client: &Client<HttpConnector>,
    timeout: Duration,
    req: Request<Body>,
) -> Result<(BackendAddress, ProxyResult), ProxyError> {
    let backend = pool.pick_next().await?;
    let outbound = match build_request(&backend, req) {
        Ok(outbound) => outbound,
        Err(source) => return Err(ProxyError::InvalidRequest { backend, source }),
    };
    debug!(%backend, uri = %outbound.uri(), "next back-end service");

    // One deadline covers both the response head and the body.
    let deadline = Instant::now() + timeout;
    let response = match timeout_at(deadline, client.request(outbound)).await {
        Ok(Ok(response)) => response,
        Ok(Err(source)) => return Err(ProxyError::Transport { backend, source }),
        Err(_) => return Err(ProxyError::Timeout { backend, timeout }),
    };

    let status = response.status();
    let body = match timeout_at(deadline, hyper::body::to_bytes(response.into_body())).await {
        Ok(Ok(body)) => body,
        Ok(Err(source)) => return Err(ProxyError::BodyRead { backend, source }),
        Err(_) => return Err(ProxyError::Timeout { backend, timeout }),
    };

    Ok((backend, ProxyResult { status, body }))
}

/// Same method, path, query and body, aimed at `backend`.
fn build_request(
    backend: &BackendAddress,
    req: Request<Body>,
) -> Result<Request<Body>, hyper::http::Error> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut builder = Request::builder()
        .method(parts.method)
        .uri(backend.url(path_and_query));
    if let Some(headers) = builder.headers_mut() {
        copy_end_to_end_headers(&parts.headers, headers);
    }
    builder.body(body)
}

fn copy_end_to_end_headers(from: &HeaderMap, to: &mut HeaderMap) {
    let listed = connection_options(from);
    for (name, value) in from {
        if !is_hop_by_hop(name) && !listed.contains(name) {
            to.append(name, value.clone());
        }
    }
}

/// Header names listed in `Connection`; they only concern this hop.
fn connection_options(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect()
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == header::HOST
        || name == header::CONNECTION
        || name == header::PROXY_AUTHENTICATE
        || name == header::PROXY_AUTHORIZATION
        || name == header::TE
        || name == header::TRAILER
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name.as_str() == "keep-alive"
}
