// src/health/probe.rs
use super::HealthStatus;
use crate::proxy::BackendAddress;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// One liveness check against one backend.
///
/// Failures of any kind are folded into [`HealthStatus::Unhealthy`]; a probe
/// never returns an error to the checker.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &BackendAddress, route: &str) -> HealthStatus;
}

/// `GET http://<address><route>` over reqwest, bounded by `timeout`.
pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create health check HTTP client")?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, address: &BackendAddress, route: &str) -> HealthStatus {
        let url = address.url(route);
        debug!("sending request to {}", url);

        match timeout(self.timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) => {
                let status = response.status();
                let health = HealthStatus::from_status(status);
                if health.is_healthy() {
                    debug!(%url, %status, "probe ok");
                } else {
                    warn!(%url, %status, "probe returned non-OK status");
                }
                health
            }
            Ok(Err(e)) => {
                warn!(%url, error = %e, "probe failed");
                HealthStatus::Unhealthy
            }
            Err(_) => {
                warn!(%url, timeout = ?self.timeout, "probe timed out");
                HealthStatus::Unhealthy
            }
        }
    }
}
