//! Configuration types

use crate::runtime::Settings;
use crate::telemetry::LogConfig;
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration (flowpath.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    pub dataplane: Option<DataplaneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub pool_capacity: usize,
    pub buffer_size: usize,
    pub metadata_size: usize,
    pub max_goto_depth: u8,
    pub tx_ring_depth: usize,
    pub recv_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let defaults = Settings::default();
        Self {
            pool_capacity: defaults.pool_capacity,
            buffer_size: defaults.buffer_size,
            metadata_size: defaults.metadata_size,
            max_goto_depth: defaults.max_goto_depth,
            tx_ring_depth: defaults.tx_ring_depth,
            recv_timeout_ms: defaults.recv_timeout.as_millis() as u64,
        }
    }
}

impl RuntimeConfig {
    pub fn settings(&self) -> Settings {
        Settings {
            pool_capacity: self.pool_capacity,
            buffer_size: self.buffer_size,
            metadata_size: self.metadata_size,
            max_goto_depth: self.max_goto_depth,
            tx_ring_depth: self.tx_ring_depth,
            recv_timeout: Duration::from_millis(self.recv_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        let defaults = LogConfig::default();
        Self {
            level: defaults.level,
            format: defaults.format,
        }
    }
}

impl LogSection {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.level.clone(),
            format: self.format.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    pub name: String,
    /// udp or tcp
    pub kind: String,
    /// Transport args: "src,dst" for udp, a bind address for tcp
    pub args: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataplaneConfig {
    pub name: String,
    /// Built-in application name: wire, hub, sink
    pub application: String,
    /// Ports bound to the dataplane, by name
    pub ports: Vec<String>,
}
