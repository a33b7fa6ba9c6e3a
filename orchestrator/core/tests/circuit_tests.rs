// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Circuit solver properties and scenarios.
//!
//! - every original edge appears as a consecutive pair of the route
//! - the route starts at the node nearest the start position
//! - partition + circuit is deterministic for unchanged input

use fleet_core::domain::circuit::{solve_circuit, Circuit, RouteError};
use fleet_core::domain::graph::{Edge, Point, RouteGraph, Waypoint};
use fleet_core::domain::partition::{partition_graph, PartitionSeed};
use std::collections::BTreeSet;

fn build(nodes: &[(&str, f64, f64)], edges: &[(&str, &str)]) -> RouteGraph {
    RouteGraph::new(
        nodes
            .iter()
            .map(|(l, x, y)| Waypoint::new(*l, *x, *y, 0.0))
            .collect(),
        edges.iter().map(|(f, t)| Edge::new(*f, *t, 1.0)).collect(),
    )
    .unwrap()
}

fn traversed(circuit: &Circuit) -> BTreeSet<(String, String)> {
    circuit
        .route
        .windows(2)
        .map(|w| (w[0].label.clone(), w[1].label.clone()))
        .collect()
}

fn assert_covers(graph: &RouteGraph, circuit: &Circuit) {
    let walked = traversed(circuit);
    for edge in graph.edges() {
        assert!(
            walked.contains(&(edge.from.clone(), edge.to.clone())),
            "edge {} -> {} not traversed in {:?}",
            edge.from,
            edge.to,
            circuit.labels()
        );
    }
    assert_eq!(circuit.route.first(), circuit.route.last());
}

#[test]
fn test_triangle_scenario() {
    let graph = build(
        &[("A", 0.0, 0.0), ("B", 2.0, 0.0), ("C", 1.0, 2.0)],
        &[("A", "B"), ("B", "C"), ("C", "A")],
    );
    let circuit = solve_circuit(&graph, Point::new(-0.5, 0.2)).unwrap();
    assert_eq!(circuit.labels(), vec!["A", "B", "C", "A"]);
}

#[test]
fn test_start_tie_goes_to_lowest_label() {
    let graph = build(
        &[("A", 0.0, 0.0), ("B", 2.0, 0.0), ("C", 1.0, 2.0)],
        &[("A", "B"), ("B", "C"), ("C", "A")],
    );
    // Equidistant from A and B.
    let circuit = solve_circuit(&graph, Point::new(1.0, 0.0)).unwrap();
    assert_eq!(circuit.route[0].label, "A");
}

#[test]
fn test_unbalanced_graph_is_covered_with_minimal_duplicates() {
    // Square with one diagonal: B has two outgoing edges, D two incoming.
    let graph = build(
        &[("A", 0.0, 0.0), ("B", 1.0, 0.0), ("C", 1.0, 1.0), ("D", 0.0, 1.0)],
        &[("A", "B"), ("B", "C"), ("C", "D"), ("D", "A"), ("B", "D")],
    );
    let circuit = solve_circuit(&graph, Point::new(1.0, 1.0)).unwrap();
    assert_covers(&graph, &circuit);
    assert_eq!(circuit.route[0].label, "C");
    // D -> A -> B rebalances the diagonal.
    assert_eq!(circuit.duplicated_edges, 2);
    assert_eq!(circuit.route.len(), 5 + 2 + 1);
}

#[test]
fn test_dead_end_reports_node() {
    let graph = build(
        &[("A", 0.0, 0.0), ("B", 1.0, 0.0), ("C", 2.0, 0.0)],
        &[("A", "B"), ("B", "A"), ("B", "C")],
    );
    assert_eq!(
        solve_circuit(&graph, Point::new(0.0, 0.0)),
        Err(RouteError::NotEulerizable {
            node: "C".to_string()
        })
    );
}

#[test]
fn test_partitioned_grid_routes_cover_and_repeat() {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let labels: Vec<String> = (0..12).map(|i| format!("W{i:02}")).collect();
    for (i, label) in labels.iter().enumerate() {
        let (x, y) = ((i % 4) as f64, (i / 4) as f64);
        nodes.push(Waypoint::new(label.clone(), x, y, 0.0));
        if i % 4 < 3 {
            edges.push(Edge::new(label.clone(), labels[i + 1].clone(), 1.0));
            edges.push(Edge::new(labels[i + 1].clone(), label.clone(), 1.0));
        }
        if i + 4 < 12 {
            edges.push(Edge::new(label.clone(), labels[i + 4].clone(), 1.5));
        }
    }
    // Vertical edges only go "up"; add one return lane per column pair.
    for col in 0..4 {
        edges.push(Edge::new(labels[8 + col].clone(), labels[col].clone(), 2.0));
    }
    let graph = RouteGraph::new(nodes, edges).unwrap();

    let seeds = vec![
        PartitionSeed::new("robotA", Some(Point::new(0.0, 0.0))),
        PartitionSeed::new("robotB", Some(Point::new(3.0, 2.0))),
    ];

    let plan = || -> Vec<Result<Circuit, RouteError>> {
        partition_graph(&graph, &seeds)
            .unwrap()
            .iter()
            .zip(&seeds)
            .map(|(sub, seed)| solve_circuit(sub, seed.start.unwrap()))
            .collect()
    };

    let first = plan();
    let second = plan();
    assert_eq!(first, second);

    let parts = partition_graph(&graph, &seeds).unwrap();
    for (part, result) in parts.iter().zip(&first) {
        if let Ok(circuit) = result {
            assert_covers(part, circuit);
        }
    }
}
