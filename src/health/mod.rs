// src/health/mod.rs
mod checker;
mod probe;
mod status;

pub use checker::{HealthCheckHandle, HealthChecker, ProbeOutcome};
pub use probe::{HttpProber, Prober};
pub use status::HealthStatus;
