// src/config.rs

//! Manages bridge configuration: loading, defaults, and validation.

use crate::core::pubsub::redis::DEFAULT_BACKEND_TIMEOUT;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// The keepalive and framing settings handed to every connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How often a keepalive ping is written to the client.
    #[serde(with = "humantime_serde", default = "default_ping_period")]
    pub ping_period: Duration,
    /// How long to wait for a pong before the read deadline expires.
    #[serde(with = "humantime_serde", default = "default_pong_wait")]
    pub pong_wait: Duration,
    /// The time allowed for a single write.
    #[serde(with = "humantime_serde", default = "default_write_wait")]
    pub write_wait: Duration,
    /// The largest inbound frame accepted, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ping_period: default_ping_period(),
            pong_wait: default_pong_wait(),
            write_wait: default_write_wait(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

fn default_ping_period() -> Duration {
    Duration::from_secs(50)
}
fn default_pong_wait() -> Duration {
    Duration::from_secs(60)
}
fn default_write_wait() -> Duration {
    Duration::from_secs(10)
}
fn default_max_frame_size() -> usize {
    8192
}

/// Selects the publish/subscribe backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// A Redis-compatible server.
    Redis {
        #[serde(default = "default_backend_host")]
        host: String,
        #[serde(default = "default_backend_port")]
        port: u16,
        #[serde(default)]
        password: Option<String>,
        /// Bounds connecting to the server and every command exchange with it.
        #[serde(with = "humantime_serde", default = "default_backend_timeout")]
        timeout: Duration,
    },
    /// An in-process broker. Only connections to this bridge see each other.
    Memory,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Redis {
            host: default_backend_host(),
            port: default_backend_port(),
            password: None,
            timeout: default_backend_timeout(),
        }
    }
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}
fn default_backend_port() -> u16 {
    6379
}
fn default_backend_timeout() -> Duration {
    DEFAULT_BACKEND_TIMEOUT
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9878
}

/// The complete configuration of the bridge.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            bridge: BridgeConfig::default(),
            backend: BackendConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file '{path}'"))
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// The address the WebSocket listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }

        let bridge = &self.bridge;
        for (name, value) in [
            ("ping_period", bridge.ping_period),
            ("pong_wait", bridge.pong_wait),
            ("write_wait", bridge.write_wait),
        ] {
            if value.is_zero() {
                return Err(anyhow!("bridge.{name} cannot be 0"));
            }
        }
        if bridge.max_frame_size == 0 {
            return Err(anyhow!("bridge.max_frame_size cannot be 0"));
        }
        // A ping must reach the client before the read deadline runs out.
        if bridge.ping_period >= bridge.pong_wait {
            return Err(anyhow!(
                "bridge.ping_period ({:?}) must be shorter than bridge.pong_wait ({:?})",
                bridge.ping_period,
                bridge.pong_wait
            ));
        }
        if bridge.write_wait >= bridge.pong_wait {
            warn!(
                "bridge.write_wait ({:?}) is not shorter than bridge.pong_wait ({:?}); a slow write can outlast the read deadline.",
                bridge.write_wait, bridge.pong_wait
            );
        }

        match &self.backend {
            BackendConfig::Redis {
                host,
                port,
                timeout,
                ..
            } => {
                if *port == 0 {
                    return Err(anyhow!("backend.port cannot be 0"));
                }
                if timeout.is_zero() {
                    return Err(anyhow!("backend.timeout cannot be 0"));
                }
                if host.trim().is_empty() {
                    return Err(anyhow!("backend.host cannot be empty"));
                }
            }
            BackendConfig::Memory => {}
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}
