//! Configuration management
//!
//! Loads the TOML config the host binary runs from, with a validation pass
//! that reports warnings and errors before anything is built.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::error::{Error, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Config(e.to_string()))?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}
