// src/health/checker.rs
use super::{HealthStatus, Prober};
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{BackendAddress, BackendPool};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Result of probing the member that sat at `position` when the round's
/// snapshot was taken.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub position: usize,
    pub address: BackendAddress,
    pub status: HealthStatus,
}

pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<BackendPool>,
    prober: Arc<dyn Prober>,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Owner's side of a running checker loop.
pub struct HealthCheckHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HealthCheckHandle {
    /// Signals the loop to stop and waits for it to exit. A round that is
    /// already probing finishes its sweep first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Health checker task failed: {}", e);
        }
    }
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: Arc<BackendPool>,
        prober: Arc<dyn Prober>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            config,
            pool,
            prober,
            metrics,
        }
    }

    /// Spawns the periodic loop onto the current runtime.
    pub fn spawn(self) -> HealthCheckHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::new(self).run(shutdown_rx));

        HealthCheckHandle { shutdown_tx, task }
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let period = self.config.interval();
        // First round one full period after start, like a plain ticker.
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval = ?period,
            route = %self.config.path,
            "Starting health checker"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all_backends().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Runs one probing round and sweeps the failures out of the pool.
    /// Returns the evicted addresses.
    pub async fn check_all_backends(&self) -> Vec<BackendAddress> {
        let snapshot = self.pool.snapshot().await;
        info!(members = snapshot.len(), "Health checking back-ends");

        let tasks: Vec<_> = snapshot
            .iter()
            .map(|(_, address)| {
                let prober = self.prober.clone();
                let address = address.clone();
                let route = self.config.path.clone();
                tokio::spawn(async move { prober.probe(&address, &route).await })
            })
            .collect();

        // The round is complete only once every probe has answered or timed out.
        let results = futures::future::join_all(tasks).await;

        let outcomes: Vec<ProbeOutcome> = snapshot
            .into_iter()
            .zip(results)
            .map(|((position, address), result)| {
                let status = result.unwrap_or_else(|e| {
                    error!(backend = %address, "Probe task join error: {}", e);
                    HealthStatus::Unhealthy
                });
                if let Some(metrics) = &self.metrics {
                    metrics.record_probe(address.as_str(), status);
                }
                ProbeOutcome {
                    position,
                    address,
                    status,
                }
            })
            .collect();

        let unhealthy = outcomes.iter().filter(|o| !o.status.is_healthy()).count();
        debug!(
            "Probes complete: {} healthy, {} unhealthy",
            outcomes.len() - unhealthy,
            unhealthy
        );

        let removed = self.pool.sweep(&outcomes).await;
        for address in &removed {
            warn!(backend = %address, "Removed unhealthy backend from pool");
        }

        let survivors = self.pool.addresses().await;
        if let Some(metrics) = &self.metrics {
            metrics.record_sweep(removed.len(), survivors.len());
        }
        if survivors.is_empty() {
            error!("Health check left the pool empty; requests will fail until restart");
        }
        info!(
            "Health check completed, online services: {:?}",
            survivors.iter().map(BackendAddress::as_str).collect::<Vec<_>>()
        );

        removed
    }
}
