//! Configuration validation

use super::Config;
use crate::port::PortKind;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            eprintln!("[WARN] {}", warning);
        }
        for error in &self.errors {
            eprintln!("[ERROR] {}", error);
        }
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_runtime(config, &mut result);
    validate_ports(config, &mut result);
    validate_dataplane(config, &mut result);

    result
}

fn validate_runtime(config: &Config, result: &mut ValidationResult) {
    let rt = &config.runtime;
    if rt.pool_capacity == 0 {
        result.error("runtime.pool_capacity must be at least 1");
    }
    if rt.buffer_size == 0 {
        result.error("runtime.buffer_size must be at least 1");
    }
    if rt.max_goto_depth == 0 {
        result.error("runtime.max_goto_depth must be at least 1");
    }
    if rt.tx_ring_depth == 0 {
        result.error("runtime.tx_ring_depth must be at least 1");
    }
    if rt.recv_timeout_ms == 0 {
        result.warn("runtime.recv_timeout_ms is 0: workers will spin on receive");
    }
}

fn validate_ports(config: &Config, result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    for port in &config.ports {
        if port.name == "drop" || port.name == "flood" {
            result.error(format!("ports.{}: name is reserved", port.name));
        }
        if !seen.insert(port.name.as_str()) {
            result.error(format!("ports.{}: duplicate name", port.name));
        }
        if port.kind.parse::<PortKind>().is_err() {
            result.error(format!(
                "ports.{}: unknown kind \"{}\" (expected udp or tcp)",
                port.name, port.kind
            ));
        }
        if port.args.is_empty() {
            result.error(format!("ports.{}: args missing", port.name));
        }
    }
}

fn validate_dataplane(config: &Config, result: &mut ValidationResult) {
    let dp = match &config.dataplane {
        Some(dp) => dp,
        None => {
            result.warn("no [dataplane] section: nothing will run");
            return;
        }
    };
    let declared: HashSet<&str> = config.ports.iter().map(|p| p.name.as_str()).collect();
    for name in &dp.ports {
        if !declared.contains(name.as_str()) {
            result.error(format!("dataplane.ports: \"{}\" is not a declared port", name));
        }
    }
    match dp.application.as_str() {
        "wire" => {
            if dp.ports.len() != 2 {
                result.error("application \"wire\" needs exactly two ports");
            }
        }
        "hub" | "sink" => {}
        other => result.error(format!("unknown application \"{}\"", other)),
    }
    if dp.ports.is_empty() {
        result.warn("dataplane has no ports: no packets will arrive");
    }
}
