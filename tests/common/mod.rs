//! Shared helpers for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use hyper::{Body, Request, Response};
use round_robin_dispatcher::config::Config;
use round_robin_dispatcher::health::{HealthStatus, Prober};
use round_robin_dispatcher::proxy::BackendAddress;
use std::net::TcpListener;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Reports every backend healthy without touching the network.
pub struct AlwaysHealthy;

#[async_trait]
impl Prober for AlwaysHealthy {
    async fn probe(&self, _address: &BackendAddress, _route: &str) -> HealthStatus {
        HealthStatus::Healthy
    }
}

/// An address nothing listens on.
pub fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Accepts connections and holds them open without ever answering.
pub async fn silent_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr.to_string()
}

/// Reads each request head, waits `delay`, then writes `response` verbatim
/// and closes the connection.
pub async fn scripted_backend(delay: Duration, response: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                tokio::time::sleep(delay).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr.to_string()
}

pub fn config_for(backends: &[String]) -> Config {
    Config {
        backends: backends.iter().cloned().map(Into::into).collect(),
        ..Config::default()
    }
}

pub fn request(method: &str, uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
