// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Route graph commands
//!
//! Commands: inspect

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use fleet_core::domain::graph::{Point, RouteGraph};
use fleet_core::domain::messages::RouteGraphMessage;
use fleet_swarm::application::{plan_routes, RoutePlan};

#[derive(Subcommand)]
pub enum GraphCommand {
    /// Partition a route graph and print each agent's circuit
    Inspect {
        /// Route graph JSON file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Agent start as NAMESPACE=LABEL (repeatable)
        #[arg(short, long = "start", value_name = "NAMESPACE=LABEL", required = true)]
        starts: Vec<String>,
    },
}

pub async fn handle_command(command: GraphCommand) -> Result<()> {
    match command {
        GraphCommand::Inspect { file, starts } => inspect(&file, &starts),
    }
}

/// Read a route graph in the wire format of the `route_graph` channel.
pub fn load_route_graph(path: &Path) -> Result<RouteGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read route graph {:?}", path))?;
    let message: RouteGraphMessage = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse route graph {:?}", path))?;
    RouteGraph::from_message(message).with_context(|| format!("Invalid route graph {:?}", path))
}

fn parse_start(raw: &str) -> Result<(String, String)> {
    let (namespace, label) = raw
        .split_once('=')
        .with_context(|| format!("Expected NAMESPACE=LABEL, got '{}'", raw))?;
    let (namespace, label) = (namespace.trim(), label.trim());
    if namespace.is_empty() || label.is_empty() {
        anyhow::bail!("Expected NAMESPACE=LABEL, got '{}'", raw);
    }
    Ok((namespace.to_string(), label.to_string()))
}

/// Resolve `NAMESPACE=LABEL` pairs against `graph` and plan.
pub fn plan_for_starts(graph: &RouteGraph, starts: &[String]) -> Result<RoutePlan> {
    let mut agents: Vec<(String, Option<Point>)> = Vec::with_capacity(starts.len());
    for raw in starts {
        let (namespace, label) = parse_start(raw)?;
        let waypoint = graph
            .node(&label)
            .with_context(|| format!("Start waypoint '{}' is not in the graph", label))?;
        if agents.iter().any(|(ns, _)| *ns == namespace) {
            anyhow::bail!("Duplicate agent namespace: {}", namespace);
        }
        agents.push((namespace, Some(waypoint.position())));
    }
    plan_routes(graph, &agents).context("Partitioning failed")
}

fn inspect(file: &Path, starts: &[String]) -> Result<()> {
    let graph = load_route_graph(file)?;
    let plan = plan_for_starts(&graph, starts)?;

    println!("{}", "Route graph:".bold());
    println!("  Version: {}", graph.version().short());
    println!("  Waypoints: {}", graph.node_count());
    println!("  Edges: {}", graph.edge_count());
    println!();

    println!("{}", "Routes:".bold());
    for (namespace, route) in &plan.routes {
        if route.is_empty() {
            println!("  {}: {}", namespace.bold(), "(no route)".dimmed());
            continue;
        }
        let labels: Vec<&str> = route.iter().map(|w| w.label.as_str()).collect();
        println!(
            "  {}: {} ({} waypoints)",
            namespace.bold(),
            labels.join(" -> "),
            labels.len()
        );
    }

    if !plan.skipped.is_empty() {
        println!();
        for (namespace, reason) in &plan.skipped {
            println!("  {} {}: {}", "⚠".yellow(), namespace, reason);
        }
    }

    Ok(())
}
