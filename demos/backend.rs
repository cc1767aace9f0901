//! demos/backend.rs
//! Run: cargo run --example backend -- [port]

use hyper::{
    header,
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server,
};
use serde::Serialize;
use std::{convert::Infallible, net::SocketAddr};
use tracing::info;

#[derive(Serialize)]
struct HealthcheckStatus {
    #[serde(rename = "Status")]
    status: &'static str,
}

// ——————————————————————————————————————————
// Request handler
async fn handle(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_owned();

    info!(
        method = %req.method(),
        uri = %req.uri(),
        version = ?req.version(),
        %host,
        user_agent = ?req.headers().get(header::USER_AGENT),
        "received request"
    );

    if req.method() == Method::GET && req.uri().path() == "/healthcheck" {
        let body = serde_json::to_vec(&HealthcheckStatus { status: "READY" })
            .unwrap_or_else(|_| br#"{"Status":"READY"}"#.to_vec());
        let mut response = Response::new(Body::from(body));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        return Ok(response);
    }

    Ok(Response::new(Body::from(format!("hello {}", host))))
}

// ——————————————————————————————————————————
// Main
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "5001".into())
        .parse()?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });

    info!("Backend listening on http://{}", addr);
    Server::bind(&addr).serve(make_svc).await?;

    Ok(())
}
