//! Server configuration, loadable from TOML.
//!
//! ```toml
//! bind_addr = "0.0.0.0:7777"
//! protocol_version = 1
//! read_timeout_ms = 60000
//! log_filter = "info,emberlink=debug"
//!
//! [session]
//! queue_capacity = 512
//! write_timeout_ms = 10000
//! max_batch_bytes = 65536
//!
//! [pool]
//! min_class = 64
//! max_class = 65536
//! max_retained_per_class = 256
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use emberlink_pool::PoolConfig;
use emberlink_session::{SessionConfig, duration_ms};
use serde::{Deserialize, Serialize};

use crate::EmberlinkError;

/// Top-level server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_addr: String,

    /// Version byte sent to clients in the key packet.
    pub protocol_version: u8,

    /// A connection that sends nothing for this long is disconnected.
    #[serde(rename = "read_timeout_ms", with = "duration_ms")]
    pub read_timeout: Duration,

    /// Tracing directive used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Per-session queue and write settings.
    pub session: SessionConfig,

    /// Shared buffer pool sizing.
    pub pool: PoolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7777".to_string(),
            protocol_version: 1,
            read_timeout: Duration::from_secs(60),
            log_filter: "info".to_string(),
            session: SessionConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EmberlinkError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EmberlinkError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, EmberlinkError> {
        toml::from_str::<Self>(content)
            .map_err(|e| EmberlinkError::Config(format!("failed to parse TOML: {e}")))
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, EmberlinkError> {
        toml::to_string_pretty(self)
            .map_err(|e| EmberlinkError::Config(format!("failed to serialize config: {e}")))
    }

    /// Returns configuration problems, if any. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_addr.parse::<SocketAddr>().is_err() {
            errors.push(format!("bind_addr {:?} is not a socket address", self.bind_addr));
        }
        if self.read_timeout.is_zero() {
            errors.push("read_timeout_ms must be greater than 0".to_string());
        }
        if self.log_filter.trim().is_empty() {
            errors.push("log_filter must not be empty".to_string());
        }

        errors.extend(self.session.validate());
        errors.extend(self.pool.validate());
        errors
    }

    /// [`validate`](Self::validate), folded into a single error.
    pub fn validate_strict(&self) -> Result<(), EmberlinkError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EmberlinkError::Config(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}
