// src/server/dispatcher.rs
use crate::config::Config;
use crate::health::{HealthCheckHandle, HealthChecker, HttpProber, Prober};
use crate::metrics::MetricsCollector;
use crate::proxy::{BackendAddress, BackendPool, Proxy};
use crate::server::RequestHandler;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Owns the pool, the forwarding proxy and the health-check task.
///
/// Construction spawns the checker, so it must happen inside a tokio runtime.
pub struct Dispatcher {
    proxy: Arc<Proxy>,
    health: HealthCheckHandle,
}

impl Dispatcher {
    pub fn new(config: &Config, metrics: Option<Arc<MetricsCollector>>) -> Result<Self> {
        let prober = HttpProber::new(config.health_check.timeout())?;
        Self::with_prober(config, Arc::new(prober), metrics)
    }

    pub fn with_prober(
        config: &Config,
        prober: Arc<dyn Prober>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = BackendPool::new(config.backends.iter().cloned())
            .context("Cannot start dispatcher without backends")?;
        let pool = Arc::new(pool);
        if let Some(metrics) = &metrics {
            metrics.set_pool_size(config.backends.len());
        }
        info!(
            "back-end server addresses: {:?}",
            config.backends.iter().map(BackendAddress::as_str).collect::<Vec<_>>()
        );

        let proxy = Arc::new(Proxy::new(pool.clone(), &config.proxy, metrics.clone()));
        let health =
            HealthChecker::new(config.health_check.clone(), pool, prober, metrics).spawn();

        Ok(Self { proxy, health })
    }

    /// Cloneable service for the listener.
    pub fn handler(&self) -> RequestHandler {
        RequestHandler::new(self.proxy.clone())
    }

    pub fn pool(&self) -> Arc<BackendPool> {
        self.proxy.pool().clone()
    }

    /// Stops the health checker and waits for it.
    pub async fn shutdown(self) {
        self.health.shutdown().await;
        info!("Dispatcher stopped");
    }
}
