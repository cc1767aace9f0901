//
// src/proxy/mod.rs
//
mod backend;
mod pool;
mod proxy;

pub use backend::BackendAddress;
pub use pool::{BackendPool, PoolError};
pub use proxy::{Proxy, ProxyError, ProxyResult, FAILURE_BODY};
