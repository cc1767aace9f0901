// src/main.rs
use anyhow::Result;
use clap::Parser;
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use round_robin_dispatcher::{
    config::{self, Config},
    metrics::MetricsRegistry,
    server::{Dispatcher, ServerBuilder},
};

/// Round-robin HTTP dispatcher with periodic backend health checks.
#[derive(Debug, Parser)]
#[command(name = "dispatcher", version)]
struct Cli {
    /// YAML or JSON config file; flags below override its values
    #[arg(long, env = "DISPATCHER_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, env = "DISPATCHER_PORT")]
    port: Option<u16>,

    /// Health-check period in seconds
    #[arg(long = "htime", env = "DISPATCHER_HEALTHCHECK_PERIOD", value_name = "SECS")]
    healthcheck_period: Option<u64>,

    /// Health-check route on every backend
    #[arg(long = "hroute", env = "DISPATCHER_HEALTHCHECK_ROUTE", value_name = "PATH")]
    healthcheck_route: Option<String>,

    /// Timeout of one health probe in seconds
    #[arg(long = "htimeout", env = "DISPATCHER_HEALTHCHECK_TIMEOUT", value_name = "SECS")]
    healthcheck_timeout: Option<u64>,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "DISPATCHER_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Backend addresses (host:port), in round-robin order
    backends: Vec<String>,
}

impl Cli {
    fn has_overrides(&self) -> bool {
        self.port.is_some()
            || self.healthcheck_period.is_some()
            || self.healthcheck_route.is_some()
            || self.healthcheck_timeout.is_some()
            || self.metrics_port.is_some()
            || !self.backends.is_empty()
    }

    /// File as-is when no flag overrides it; otherwise file or defaults,
    /// then flags, then validation.
    async fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) if !self.has_overrides() => {
                info!("Loading configuration from: {}", path.display());
                return config::load_config(path).await;
            }
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                config::read_config(path).await?
            }
            None => Config::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.listen_port = port;
        }
        if let Some(secs) = self.healthcheck_period {
            config.health_check.interval_secs = secs;
        }
        if let Some(route) = self.healthcheck_route {
            config.health_check.path = route;
        }
        if let Some(secs) = self.healthcheck_timeout {
            config.health_check.timeout_secs = secs;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.enabled = true;
            config.metrics.port = port;
        }
        if !self.backends.is_empty() {
            config.backends = self.backends.into_iter().map(Into::into).collect();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("round_robin_dispatcher=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config = Cli::parse().into_config().await?;

    // Initialize metrics
    let metrics_registry = if config.metrics.enabled {
        Some(MetricsRegistry::new()?)
    } else {
        None
    };
    let metrics = metrics_registry.as_ref().map(MetricsRegistry::collector);

    let dispatcher = Dispatcher::new(&config, metrics)?;

    if let Some(registry) = metrics_registry {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, registry, config.metrics.path.clone());
    }

    let addr: SocketAddr = ([0, 0, 0, 0], config.listen_port).into();
    info!("Starting dispatcher on {}", addr);

    ServerBuilder::new(addr)
        .with_handler(dispatcher.handler())
        .serve_with_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown().await;
    Ok(())
}

fn start_metrics_server(addr: SocketAddr, registry: MetricsRegistry, path: String) {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    let mut response = if req.uri().path() != path.as_str() {
                        let mut response = Response::new(Body::from("Not Found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    } else {
                        match registry.gather() {
                            Ok(metrics) => Response::new(Body::from(metrics)),
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                let mut response = Response::new(Body::empty());
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                response
                            }
                        }
                    };
                    if response.status() == StatusCode::OK {
                        response.headers_mut().insert(
                            hyper::header::CONTENT_TYPE,
                            hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                        );
                    }
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        match Server::try_bind(&addr) {
            Ok(builder) => {
                if let Err(e) = builder.serve(make_service).await {
                    error!("Metrics server error: {}", e);
                }
            }
            Err(e) => error!("Metrics server failed to bind {}: {}", addr, e),
        }
    });
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
