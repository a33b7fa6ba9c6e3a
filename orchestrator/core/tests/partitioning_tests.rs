// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Partitioning properties over grid-shaped warehouses.
//!
//! For every agent count from 1 to the node count the partitioner must
//! return exactly that many non-empty, node-disjoint subgraphs covering the
//! whole graph, and it must do so repeatably.

use fleet_core::domain::graph::{Edge, Point, RouteGraph, Waypoint};
use fleet_core::domain::partition::{partition_graph, PartitionError, PartitionSeed};
use std::collections::BTreeSet;

fn grid(width: usize, height: usize) -> RouteGraph {
    let label = |x: usize, y: usize| format!("R{y}C{x}");
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for y in 0..height {
        for x in 0..width {
            nodes.push(Waypoint::new(label(x, y), x as f64, y as f64, 0.0));
            if x + 1 < width {
                edges.push(Edge::new(label(x, y), label(x + 1, y), 1.0));
                edges.push(Edge::new(label(x + 1, y), label(x, y), 1.0));
            }
            if y + 1 < height {
                edges.push(Edge::new(label(x, y), label(x, y + 1), 1.0));
                edges.push(Edge::new(label(x, y + 1), label(x, y), 1.0));
            }
        }
    }
    RouteGraph::new(nodes, edges).unwrap()
}

/// Seeds spread along the diagonal, some of them sharing a spot.
fn seeds(k: usize, width: usize, height: usize) -> Vec<PartitionSeed> {
    (0..k)
        .map(|i| {
            let t = (i / 2) as f64 / k.max(1) as f64;
            PartitionSeed::new(
                format!("robot{i:02}"),
                Some(Point::new(t * width as f64, t * height as f64)),
            )
        })
        .collect()
}

#[test]
fn test_partition_covers_graph_for_every_k() {
    let graph = grid(4, 3);
    let all: BTreeSet<String> = graph.labels().map(str::to_string).collect();

    for k in 1..=graph.node_count() {
        let parts = partition_graph(&graph, &seeds(k, 4, 3)).unwrap();
        assert_eq!(parts.len(), k, "k = {k}");

        let mut union = BTreeSet::new();
        for part in &parts {
            assert!(part.node_count() > 0, "empty subgraph for k = {k}");
            for label in part.labels() {
                assert!(union.insert(label.to_string()), "{label} assigned twice for k = {k}");
            }
            for edge in part.edges() {
                assert!(part.contains(&edge.from) && part.contains(&edge.to));
            }
        }
        assert_eq!(union, all, "k = {k}");
    }
}

#[test]
fn test_partition_is_repeatable() {
    let graph = grid(5, 5);
    let seeds = seeds(4, 5, 5);
    let first = partition_graph(&graph, &seeds).unwrap();
    let second = partition_graph(&graph, &seeds).unwrap();
    assert_eq!(first, second);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.version(), b.version());
    }
}

#[test]
fn test_corner_seeds_produce_connected_quadrants() {
    let graph = grid(4, 4);
    let corners = [
        PartitionSeed::new("robotA", Some(Point::new(0.0, 0.0))),
        PartitionSeed::new("robotB", Some(Point::new(3.0, 0.0))),
        PartitionSeed::new("robotC", Some(Point::new(0.0, 3.0))),
        PartitionSeed::new("robotD", Some(Point::new(3.0, 3.0))),
    ];
    let parts = partition_graph(&graph, &corners).unwrap();
    for part in &parts {
        assert_eq!(part.node_count(), 4);
        // A 2x2 block keeps its 8 directed edges.
        assert_eq!(part.edge_count(), 8);
    }
    assert!(parts[0].contains("R0C0"));
    assert!(parts[3].contains("R3C3"));
}

#[test]
fn test_partition_errors() {
    let graph = grid(2, 1);
    assert_eq!(
        partition_graph(&graph, &seeds(3, 2, 1)),
        Err(PartitionError::TooManyAgents {
            agents: 3,
            nodes: 2
        })
    );
    let missing = vec![
        PartitionSeed::new("robotA", Some(Point::new(0.0, 0.0))),
        PartitionSeed::new("robotB", None),
    ];
    assert_eq!(
        partition_graph(&graph, &missing),
        Err(PartitionError::MissingStartPosition("robotB".to_string()))
    );
}
