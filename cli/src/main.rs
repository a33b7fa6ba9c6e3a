// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Fleet Orchestrator CLI
//!
//! The `fleet` binary hosts fleet agents and the tooling around them.
//!
//! ## Commands
//!
//! - `fleet simulate [--duration-secs N] [--graph FILE]` - Run the manifest's agents in one process
//! - `fleet graph inspect FILE --start NS=LABEL...` - Partition a route graph and print circuits
//! - `fleet config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use fleet_core::domain::fleet_config::FleetConfigManifest;
use fleet_orchestrator::commands::{self, simulate::SimulationOptions, ConfigCommand, GraphCommand};

/// Fleet Orchestrator - leaderless coordination for waypoint-patrolling robots
#[derive(Parser)]
#[command(name = "fleet")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "FLEET_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FLEET_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured agent on an in-process bus
    #[command(name = "simulate")]
    Simulate {
        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(long, value_name = "SECONDS")]
        duration_secs: Option<u64>,

        /// Route graph JSON file (overrides spec.graph_path)
        #[arg(long, value_name = "FILE")]
        graph: Option<PathBuf>,
    },

    /// Route graph tooling
    #[command(name = "graph")]
    Graph {
        #[command(subcommand)]
        command: GraphCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Simulate {
            duration_secs,
            graph,
        }) => {
            let config = FleetConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            let level = cli
                .log_level
                .clone()
                .or_else(|| {
                    config
                        .spec
                        .observability
                        .as_ref()
                        .and_then(|o| o.logging.as_ref())
                        .map(|l| l.level.clone())
                })
                .unwrap_or_else(|| "info".to_string());
            init_logging(&level, config.log_format())?;

            let options = SimulationOptions {
                duration: duration_secs.map(Duration::from_secs),
                graph,
            };
            commands::simulate::run(config, options).await
        }
        Some(Commands::Graph { command }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), None)?;
            commands::graph::handle_command(command).await
        }
        Some(Commands::Config { command }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), None)?;
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: Option<&str>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        Some("json") => builder.json().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}
