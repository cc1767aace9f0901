// src/config/models.rs
use crate::proxy::BackendAddress;
use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_port: u16,
    pub backends: Vec<BackendAddress>,
    pub health_check: HealthCheckConfig,
    pub proxy: ProxyConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 5000,
            backends: Vec::new(),
            health_check: HealthCheckConfig::default(),
            proxy: ProxyConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("at least one backend address is required");
        }
        if let Some(blank) = self.backends.iter().position(|b| b.as_str().trim().is_empty()) {
            bail!("backend #{} has an empty address", blank);
        }
        self.health_check.validate()?;
        self.proxy.validate()?;
        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            bail!("metrics path must start with '/': {:?}", self.metrics.path);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 30,
            path: "/healthcheck".to_string(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("health_check.interval_secs must be greater than zero");
        }
        if self.timeout_secs == 0 {
            bail!("health_check.timeout_secs must be greater than zero");
        }
        if !self.path.starts_with('/') {
            bail!("health_check.path must start with '/': {:?}", self.path);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            bail!("proxy.timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}
