//! `ensemble-cli` – interactive shell for a simulated node tree.
//!
//! The binary:
//!
//! 1. Initialises tracing (`RUST_LOG`, `ENSEMBLE_LOG_FORMAT`,
//!    `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 2. Loads `~/.ensemble/config.toml`, writing the default topology when the
//!    file is absent.
//! 3. Starts every configured service node and controller on an in-process
//!    transport.
//! 4. Drops the user into a REPL for sending goals and signalling events.
//! 5. Intercepts **Ctrl-C** to cancel outstanding goals and exit.

mod config;
mod repl;
mod topology;

use colored::Colorize;
use tracing::{error, warn};

use crate::topology::Topology;

fn main() {
    let _telemetry = ensemble_runtime::init_tracing("ensemble");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default topology written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default topology.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    if let Err(e) = config::validate(&cfg) {
        println!("{}: {}", "Invalid topology".red(), e);
        std::process::exit(2);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            std::process::exit(1);
        }
    };

    let topology = match runtime.block_on(Topology::launch(&cfg)) {
        Ok(topology) => topology,
        Err(e) => {
            println!("{}: {}", "Launch failed".red(), e);
            std::process::exit(1);
        }
    };
    print_topology(&cfg);

    let clients = topology.client_handles();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – cancelling goals …".yellow().bold());
        for client in &clients {
            client.cancel_all_goals();
        }
        println!("{}", "  ✓ Cancel sent to every controller.".green());
        println!("{}", "  ✓ Exiting ensemble.".green());
        std::process::exit(130);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&runtime, &topology);

    drop(topology);
    runtime.shutdown_timeout(std::time::Duration::from_millis(500));
}

fn print_banner() {
    println!();
    println!("{}", "  ┌─┐┌┐┌┌─┐┌─┐┌┬┐┌┐ ┬  ┌─┐".bold().cyan());
    println!("{}", "  ├┤ │││└─┐├┤ │││├┴┐│  ├┤ ".bold().cyan());
    println!("{}", "  └─┘┘└┘└─┘└─┘┴ ┴└─┘┴─┘└─┘".bold().cyan());
    println!();
    println!(
        "  {} {}",
        "ensemble".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Hierarchical action-node runtime");
    println!();
}

fn print_topology(cfg: &config::Config) {
    println!("{}", "  Services".bold().underline());
    for service in &cfg.services {
        println!("    • {} ({})", service.name.bold(), service.kind.to_string().dimmed());
    }
    println!("{}", "  Controllers".bold().underline());
    for (name, controller) in &cfg.controllers {
        let children: Vec<&str> = controller.children.keys().map(String::as_str).collect();
        println!("    • {} → {}", name.bold(), children.join(", ").cyan());
    }
}
