// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Partition-and-route: one circuit per agent from the current route graph.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use fleet_core::domain::circuit::{solve_circuit, RouteError};
use fleet_core::domain::graph::{Point, RouteGraph, Waypoint};
use fleet_core::domain::partition::{partition_graph, PartitionError, PartitionSeed};

#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    /// Cyclic route per agent; empty when the circuit could not be built.
    pub routes: BTreeMap<String, Vec<Waypoint>>,
    pub skipped: Vec<(String, RouteError)>,
}

/// Partition `graph` across `agents` (sorted by namespace here) and solve a
/// circuit for each part. A partition failure aborts the whole plan; a circuit
/// failure only empties that agent's route.
pub fn plan_routes(
    graph: &RouteGraph,
    agents: &[(String, Option<Point>)],
) -> Result<RoutePlan, PartitionError> {
    let mut seeds: Vec<PartitionSeed> = agents
        .iter()
        .map(|(ns, start)| PartitionSeed::new(ns.clone(), *start))
        .collect();
    seeds.sort_by(|a, b| a.namespace.cmp(&b.namespace));

    let subgraphs = partition_graph(graph, &seeds)?;

    let mut routes = BTreeMap::new();
    let mut skipped = Vec::new();
    for (seed, subgraph) in seeds.iter().zip(&subgraphs) {
        debug!(
            agent = %seed.namespace,
            nodes = ?subgraph.labels().collect::<Vec<_>>(),
            edges = ?subgraph
                .edges()
                .iter()
                .map(|e| format!("{}->{}", e.from, e.to))
                .collect::<Vec<_>>(),
            "Subgraph assigned"
        );

        // Seeds were validated by the partitioner.
        let start = seed.start.unwrap_or(Point::new(0.0, 0.0));
        match solve_circuit(subgraph, start) {
            Ok(circuit) => {
                info!(
                    agent = %seed.namespace,
                    route = ?circuit.labels(),
                    duplicated_edges = circuit.duplicated_edges,
                    cost = circuit.cost,
                    "Route computed"
                );
                routes.insert(seed.namespace.clone(), circuit.cycle().to_vec());
            }
            Err(e) => {
                warn!(agent = %seed.namespace, error = %e, "No route for agent this cycle");
                routes.insert(seed.namespace.clone(), Vec::new());
                skipped.push((seed.namespace.clone(), e));
            }
        }
    }

    Ok(RoutePlan { routes, skipped })
}
