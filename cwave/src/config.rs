//! Client configuration.
//!
//! Stored as JSON, e.g.:
//!
//! ```json
//! {
//!   "address": "192.168.202.22",
//!   "port": 10001,
//!   "flush_timeout_ms": 1,
//!   "response_timeout_ms": 10000
//! }
//! ```
//!
//! Missing fields take their defaults, so `{"address": "localhost"}` is a
//! complete file for talking through C-WAVE Control's multiplexer.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::{DEFAULT_FLUSH_TIMEOUT, DEFAULT_PORT, DEFAULT_RESPONSE_TIMEOUT};

/// Where the device lives and how patient to be with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host name or IP address of the C-WAVE (or of C-WAVE Control)
    pub address: String,
    pub port: u16,
    /// Read timeout while draining stale input
    pub flush_timeout_ms: u64,
    /// Time allowed for a reply line
    pub response_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: DEFAULT_PORT,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT.as_millis() as u64,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    /// Configuration for `address` with all other fields defaulted.
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// `host:port` string suitable for [`std::net::ToSocketAddrs`].
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
