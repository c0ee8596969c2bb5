//! Logging initialization.
//!
//! `RUST_LOG` always wins; otherwise the configured level applies. Output is
//! pretty by default, with compact and JSON variants for machines.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Logging settings, usually taken from the config file.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// error, warn, info, debug, trace
    pub level: String,
    /// pretty, compact, json
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Installs the global tracing subscriber. Safe to call more than once; only
/// the first installation sticks.
pub fn init_logging(config: Option<&LogConfig>) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = config.map(|c| c.level.as_str()).unwrap_or("info");
        EnvFilter::new(level)
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.map(|c| c.format.as_str()).unwrap_or("pretty") {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    // Already-set subscriber is fine, e.g. in tests.
    let _ = result;
}
