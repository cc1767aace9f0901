// src/proxy/backend.rs
use serde::Deserialize;
use std::fmt;

/// `host:port` of one backend. Carries no structure beyond being a dial target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct BackendAddress(String);

impl BackendAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Absolute `http://` URL for `path_and_query` on this backend.
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.0, path_and_query)
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BackendAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl From<&str> for BackendAddress {
    fn from(address: &str) -> Self {
        Self(address.to_owned())
    }
}
