use clap::{Parser, Subcommand};
use flowpath::config;
use flowpath::port::{Port, PortKind};
use flowpath::runtime::Runtime;
use flowpath::telemetry::init_logging;
use flowpath::{apps, Error};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Exit codes: 0 normal, 1 configuration error, 2 runtime error during
/// start, 3 application load failure.
const EXIT_CONFIG: i32 = 1;
const EXIT_START: i32 = 2;
const EXIT_LOAD: i32 = 3;

#[derive(Parser)]
#[command(name = "flowpath")]
#[command(about = "A programmable software dataplane")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a config file without running it
    Validate {
        /// Path to flowpath.toml
        #[arg(short, long, default_value = "flowpath.toml")]
        config: PathBuf,
    },
    /// Run the dataplane daemon
    Run {
        /// Path to flowpath.toml
        #[arg(short, long, default_value = "flowpath.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Some(Commands::Validate { config }) => cmd_validate(&config),
        Some(Commands::Run { config }) => cmd_run(&config),
        None => cmd_run(Path::new("flowpath.toml")),
    };
    if code != 0 {
        std::process::exit(code);
    }
}

fn load_and_validate(path: &Path) -> Result<config::Config, i32> {
    let cfg = match config::load(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("[ERROR] {}: {}", path.display(), e);
            return Err(EXIT_CONFIG);
        }
    };
    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err(EXIT_CONFIG);
    }
    Ok(cfg)
}

fn cmd_validate(path: &Path) -> i32 {
    match load_and_validate(path) {
        Ok(_) => {
            println!("[INFO] Configuration is valid");
            0
        }
        Err(code) => code,
    }
}

fn cmd_run(path: &Path) -> i32 {
    let cfg = match load_and_validate(path) {
        Ok(cfg) => cfg,
        Err(code) => return code,
    };
    init_logging(Some(&cfg.log.log_config()));

    let rt = Runtime::new(cfg.runtime.settings());

    for port_cfg in &cfg.ports {
        let kind: PortKind = match port_cfg.kind.parse() {
            Ok(kind) => kind,
            Err(e) => {
                eprintln!("[ERROR] ports.{}: {}", port_cfg.name, e);
                return EXIT_CONFIG;
            }
        };
        if let Err(e) = rt.create_port(kind, &port_cfg.name, &port_cfg.args) {
            eprintln!("[ERROR] ports.{}: {}", port_cfg.name, e);
            return EXIT_CONFIG;
        }
        info!(port = %port_cfg.name, kind = %port_cfg.kind, "port created");
    }

    let dp_cfg = match &cfg.dataplane {
        Some(dp_cfg) => dp_cfg,
        None => {
            eprintln!("[ERROR] no [dataplane] section, nothing to run");
            return EXIT_CONFIG;
        }
    };
    let library = match apps::by_name(&dp_cfg.application, &dp_cfg.ports) {
        Some(library) => library,
        None => {
            eprintln!("[ERROR] unknown application \"{}\"", dp_cfg.application);
            return EXIT_CONFIG;
        }
    };

    let dp = match rt.create_dataplane(&dp_cfg.name, library) {
        Ok(dp) => dp,
        Err(e) => {
            eprintln!("[ERROR] create dataplane: {}", e);
            return EXIT_START;
        }
    };
    for port_name in &dp_cfg.ports {
        let port = match rt.get_port(port_name) {
            Some(port) => port,
            None => {
                eprintln!("[ERROR] dataplane port \"{}\" not found", port_name);
                return EXIT_CONFIG;
            }
        };
        if let Err(e) = dp.add_port(port.id()) {
            eprintln!("[ERROR] bind port \"{}\": {}", port_name, e);
            return EXIT_START;
        }
    }

    if let Err(e) = dp.load() {
        eprintln!("[ERROR] application load: {}", e);
        return match e {
            Error::AppFault(_) => EXIT_LOAD,
            _ => EXIT_START,
        };
    }
    if let Err(e) = dp.start() {
        eprintln!("[ERROR] start: {}", e);
        return EXIT_START;
    }
    info!(
        dataplane = %dp_cfg.name,
        application = %dp_cfg.application,
        "flowpath running"
    );

    // Workers own the packet path from here; this thread just reports.
    loop {
        std::thread::sleep(Duration::from_secs(10));
        for (key, value) in dp.stats().export() {
            info!(counter = key, value, "dataplane");
        }
        for port_name in &dp_cfg.ports {
            if let Some(port) = rt.get_port(port_name) {
                let stats = port.stats();
                info!(
                    port = %port_name,
                    rx_pkts = stats.rx_pkts.get(),
                    tx_pkts = stats.tx_pkts.get(),
                    rx_drops = stats.rx_drops.get(),
                    tx_drops = stats.tx_drops.get(),
                    "port"
                );
            }
        }
    }
}
