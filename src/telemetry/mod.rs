//! Telemetry: logging setup and packet-processing metrics.

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig};
pub use metrics::{Counter, DataplaneStats};
