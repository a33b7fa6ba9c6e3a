// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use fleet_core::domain::fleet_config::{FleetConfigManifest, StartSpec};

const CONFIG_TEMPLATE: &str = include_str!("../../templates/fleet-config.yaml");
const GRAPH_TEMPLATE: &str = include_str!("../../templates/route-graph.json");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./fleet-config.yaml)
        #[arg(short, long, default_value = "./fleet-config.yaml")]
        output: PathBuf,

        /// Also write the sample route graph next to the manifest
        #[arg(long)]
        with_graph: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, with_graph } => generate(&output, with_graph).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = FleetConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. FLEET_CONFIG_PATH: {}",
            std::env::var("FLEET_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./fleet-config.yaml");
        println!("  4. ~/.fleet/config.yaml");
        println!("  5. /etc/fleet/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Agents:".bold());
    for agent in &config.spec.agents {
        let start = match &agent.start {
            StartSpec::Node { node } => format!("node {}", node),
            StartSpec::Point { x, y } => format!("({}, {})", x, y),
        };
        println!("  {} starts at {}", agent.namespace.bold(), start);
    }
    println!();

    let timing = &config.spec.timing;
    println!("{}", "Timing:".bold());
    println!("  Heartbeat: every {:?}, timeout {:?}", timing.heartbeat_period, timing.heartbeat_timeout);
    println!("  Registration: every {:?}", timing.registration_period);
    println!("  Initial position: every {:?}", timing.initial_position_period);
    println!(
        "  Leader check: every {:?} (re-elect after {} checks)",
        timing.leader_check_period, timing.election_rerun_checks
    );
    println!("  Peer check: every {:?}", timing.peer_check_period);
    println!("  Control tick: every {:?}", timing.control_tick);
    println!();

    println!("{}", "Motion:".bold());
    println!("  Mode: {:?}", config.spec.motion.mode);
    println!("  Simulated duration: {:?}", config.spec.motion.simulated_duration);
    println!();

    match &config.spec.graph_path {
        Some(path) => println!("Route graph: {}", path.display()),
        None => println!("Route graph: {}", "(not set)".dimmed()),
    }
    for crash in &config.spec.crashes {
        println!("Scripted crash: {} after {:?}", crash.namespace, crash.after);
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = FleetConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, with_graph: bool) -> Result<()> {
    std::fs::write(output, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    if with_graph {
        let graph_path = output
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("route-graph.json");
        std::fs::write(&graph_path, GRAPH_TEMPLATE)
            .with_context(|| format!("Failed to write route graph to {:?}", graph_path))?;
        println!(
            "{}",
            format!("✓ Route graph generated: {}", graph_path.display()).green()
        );
    }

    Ok(())
}
