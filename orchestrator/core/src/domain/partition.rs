// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Graph Partitioner
//!
//! Splits a [`RouteGraph`] into one node-disjoint subgraph per active agent.
//!
//! The heuristic runs in three deterministic phases:
//!
//! 1. **Voronoi assignment**: every waypoint joins the group of the nearest
//!    start position (ties to the lower seed index).
//! 2. **Empty-group filling**: a seed that attracted nothing takes the closest
//!    waypoint from a group that can spare one.
//! 3. **Connectivity repair**: detached fragments of a group move to the
//!    neighbouring group they share the most edges with. Fragments with no
//!    outside neighbour stay where they are (best effort).
//!
//! Edges crossing group boundaries are dropped from the output.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

use crate::domain::graph::{Point, RouteGraph};

#[derive(Debug, Error, PartialEq)]
pub enum PartitionError {
    #[error("cannot partition for zero agents")]
    NoAgents,

    #[error("{agents} agents but only {nodes} waypoints")]
    TooManyAgents { agents: usize, nodes: usize },

    #[error("no start position known for agent '{0}'")]
    MissingStartPosition(String),

    #[error("expected {expected} subgraphs, produced {produced}")]
    SubgraphCountMismatch { expected: usize, produced: usize },
}

/// One agent's entry in a partition request.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSeed {
    pub namespace: String,
    pub start: Option<Point>,
}

impl PartitionSeed {
    pub fn new(namespace: impl Into<String>, start: Option<Point>) -> Self {
        Self {
            namespace: namespace.into(),
            start,
        }
    }
}

/// Partition `graph` into `seeds.len()` subgraphs, returned in seed order.
pub fn partition_graph(
    graph: &RouteGraph,
    seeds: &[PartitionSeed],
) -> Result<Vec<RouteGraph>, PartitionError> {
    if seeds.is_empty() {
        return Err(PartitionError::NoAgents);
    }
    if seeds.len() > graph.node_count() {
        return Err(PartitionError::TooManyAgents {
            agents: seeds.len(),
            nodes: graph.node_count(),
        });
    }
    let starts = seeds
        .iter()
        .map(|s| {
            s.start
                .ok_or_else(|| PartitionError::MissingStartPosition(s.namespace.clone()))
        })
        .collect::<Result<Vec<Point>, _>>()?;

    let mut groups = voronoi_groups(graph, &starts);
    fill_empty_groups(graph, &starts, &mut groups);
    repair_connectivity(graph, &starts, &mut groups);

    let subgraphs: Vec<RouteGraph> = groups
        .iter()
        .map(|labels| graph.induced_subgraph(labels))
        .collect();

    let kept: usize = subgraphs.iter().map(RouteGraph::edge_count).sum();
    if kept < graph.edge_count() {
        debug!(
            dropped = graph.edge_count() - kept,
            "Dropped cross-group edges while partitioning"
        );
    }

    if subgraphs.len() != seeds.len() {
        return Err(PartitionError::SubgraphCountMismatch {
            expected: seeds.len(),
            produced: subgraphs.len(),
        });
    }
    Ok(subgraphs)
}

fn nearest_seed(point: &Point, starts: &[Point]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, start) in starts.iter().enumerate() {
        let d = start.distance(point);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

fn voronoi_groups(graph: &RouteGraph, starts: &[Point]) -> Vec<BTreeSet<String>> {
    let mut groups = vec![BTreeSet::new(); starts.len()];
    for node in graph.nodes() {
        groups[nearest_seed(&node.position(), starts)].insert(node.label.clone());
    }
    groups
}

fn fill_empty_groups(graph: &RouteGraph, starts: &[Point], groups: &mut [BTreeSet<String>]) {
    for target in 0..groups.len() {
        if !groups[target].is_empty() {
            continue;
        }
        let mut best: Option<(usize, String, f64)> = None;
        for (donor, labels) in groups.iter().enumerate() {
            if labels.len() < 2 {
                continue;
            }
            for label in labels {
                let Some(node) = graph.node(label) else {
                    continue;
                };
                let d = node.position().distance(&starts[target]);
                let better = match &best {
                    None => true,
                    Some((_, best_label, best_d)) => {
                        d < *best_d || (d == *best_d && label < best_label)
                    }
                };
                if better {
                    best = Some((donor, label.clone(), d));
                }
            }
        }
        if let Some((donor, label, _)) = best {
            groups[donor].remove(&label);
            groups[target].insert(label);
        }
    }
}

/// Weakly connected components of the subgraph induced by `labels`,
/// each sorted, ordered by their smallest label.
fn components(
    adjacency: &BTreeMap<&str, BTreeSet<&str>>,
    labels: &BTreeSet<String>,
) -> Vec<BTreeSet<String>> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut out = Vec::new();
    for root in labels {
        if seen.contains(root.as_str()) {
            continue;
        }
        let mut component = BTreeSet::new();
        let mut stack = vec![root.as_str()];
        seen.insert(root.as_str());
        while let Some(current) = stack.pop() {
            component.insert(current.to_string());
            if let Some(neighbours) = adjacency.get(current) {
                for next in neighbours {
                    if labels.contains(*next) && seen.insert(*next) {
                        stack.push(*next);
                    }
                }
            }
        }
        out.push(component);
    }
    out
}

fn repair_connectivity(graph: &RouteGraph, starts: &[Point], groups: &mut [BTreeSet<String>]) {
    let adjacency = graph.undirected_neighbours();
    for _ in 0..graph.node_count() {
        let mut changed = false;
        for g in 0..groups.len() {
            let parts = components(&adjacency, &groups[g]);
            if parts.len() < 2 {
                continue;
            }
            let anchor_label = groups[g]
                .iter()
                .filter_map(|l| graph.node(l))
                .fold(None::<(&str, f64)>, |best, node| {
                    let d = node.position().distance(&starts[g]);
                    match best {
                        Some((_, best_d)) if d >= best_d => best,
                        _ => Some((node.label.as_str(), d)),
                    }
                })
                .map(|(label, _)| label.to_string());
            let Some(anchor_label) = anchor_label else {
                continue;
            };

            for part in parts {
                if part.contains(&anchor_label) {
                    continue;
                }
                let mut shared: BTreeMap<usize, usize> = BTreeMap::new();
                for label in &part {
                    let Some(neighbours) = adjacency.get(label.as_str()) else {
                        continue;
                    };
                    for next in neighbours {
                        if let Some(h) = groups.iter().position(|grp| grp.contains(*next)) {
                            if h != g {
                                *shared.entry(h).or_default() += 1;
                            }
                        }
                    }
                }
                // Highest shared edge count, lowest group index on ties.
                let destination = shared
                    .iter()
                    .fold(None::<(usize, usize)>, |best, (&h, &count)| match best {
                        Some((_, best_count)) if count <= best_count => best,
                        _ => Some((h, count)),
                    })
                    .map(|(h, _)| h);
                if let Some(h) = destination {
                    for label in part {
                        groups[g].remove(&label);
                        groups[h].insert(label);
                    }
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}
