// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Route Graph Model
//!
//! Directed weighted graph of labeled waypoints shared by every agent in the
//! fleet. A [`RouteGraph`] is an immutable value object: it is built once from a
//! route-graph wire message, validated, fingerprinted, and then only ever
//! replaced wholesale by a newer version.
//!
//! - [`Waypoint`]: labeled node with planar position and heading (radians).
//! - [`Edge`]: directed, weighted connection between two waypoint labels.
//! - [`GraphVersion`]: SHA-256 fingerprint of the canonical wire form.
//! - [`Compass`]: wire encoding of headings (`NORTH`, `EAST`, `SOUTH`, `WEST`).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;
use thiserror::Error;

use crate::domain::messages::{RouteGraphMessage, WireEdge, WireNode, WireOrientation};

/// Default traversal cost of an edge whose weight is omitted on the wire.
pub const DEFAULT_EDGE_WEIGHT: f64 = 1.0;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("duplicate waypoint label '{0}'")]
    DuplicateLabel(String),

    #[error("edge {from} -> {to} references unknown waypoint '{missing}'")]
    UnknownEndpoint {
        from: String,
        to: String,
        missing: String,
    },

    #[error("edge {from} -> {to} has invalid weight {weight}")]
    InvalidWeight { from: String, to: String, weight: f64 },

    #[error("waypoint '{0}' has non-finite coordinates")]
    InvalidCoordinates(String),
}

/// Planar position in map coordinates (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Position plus heading in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, orientation: f64) -> Self {
        Self {
            position: Point::new(x, y),
            orientation,
        }
    }
}

/// Compass headings used on the wire.
///
/// `NORTH = 0`, `EAST = -π/2`, `SOUTH = π`, `WEST = π/2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compass {
    North,
    East,
    South,
    West,
}

impl Compass {
    const ALL: [Compass; 4] = [Compass::North, Compass::West, Compass::South, Compass::East];

    pub fn radians(self) -> f64 {
        match self {
            Compass::North => 0.0,
            Compass::East => -FRAC_PI_2,
            Compass::South => PI,
            Compass::West => FRAC_PI_2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compass::North => "NORTH",
            Compass::East => "EAST",
            Compass::South => "SOUTH",
            Compass::West => "WEST",
        }
    }

    /// Case-insensitive parse of a compass string.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NORTH" => Some(Compass::North),
            "EAST" => Some(Compass::East),
            "SOUTH" => Some(Compass::South),
            "WEST" => Some(Compass::West),
            _ => None,
        }
    }

    /// Nearest compass heading to an arbitrary angle.
    pub fn from_radians(angle: f64) -> Self {
        if !angle.is_finite() {
            return Compass::North;
        }
        let mut best = Compass::North;
        let mut best_gap = f64::INFINITY;
        for candidate in Self::ALL {
            let gap = angular_distance(angle, candidate.radians());
            if gap < best_gap {
                best = candidate;
                best_gap = gap;
            }
        }
        best
    }
}

impl fmt::Display for Compass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn angular_distance(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(2.0 * PI);
    diff.min(2.0 * PI - diff)
}

/// Unknown compass strings map to `NORTH`, matching what agents in the field send.
pub fn compass_to_radians(value: &str) -> f64 {
    Compass::parse(value).map(Compass::radians).unwrap_or(0.0)
}

/// A labeled waypoint of the route graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub label: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub orientation: f64,
}

impl Waypoint {
    pub fn new(label: impl Into<String>, x: f64, y: f64, orientation: f64) -> Self {
        Self {
            label: label.into(),
            x,
            y,
            orientation,
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.orientation)
    }
}

/// Directed, weighted edge between two waypoint labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, weight: f64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            weight,
        }
    }
}

/// Content fingerprint of a [`RouteGraph`] (hex-encoded SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphVersion(pub String);

impl GraphVersion {
    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for GraphVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable directed route graph.
///
/// # Invariants
///
/// - Waypoint labels are unique.
/// - Every edge endpoint references an existing waypoint.
/// - Edge weights are finite and non-negative.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteGraph {
    nodes: BTreeMap<String, Waypoint>,
    edges: Vec<Edge>,
    version: GraphVersion,
}

impl RouteGraph {
    /// Build and validate a graph. Edge order is preserved.
    pub fn new(nodes: Vec<Waypoint>, edges: Vec<Edge>) -> Result<Self, GraphError> {
        let mut by_label = BTreeMap::new();
        for node in nodes {
            if !node.x.is_finite() || !node.y.is_finite() {
                return Err(GraphError::InvalidCoordinates(node.label));
            }
            if by_label.contains_key(&node.label) {
                return Err(GraphError::DuplicateLabel(node.label));
            }
            by_label.insert(node.label.clone(), node);
        }

        for edge in &edges {
            for endpoint in [&edge.from, &edge.to] {
                if !by_label.contains_key(endpoint) {
                    return Err(GraphError::UnknownEndpoint {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
            if !edge.weight.is_finite() || edge.weight < 0.0 {
                return Err(GraphError::InvalidWeight {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    weight: edge.weight,
                });
            }
        }

        Ok(Self::from_parts(by_label, edges))
    }

    fn from_parts(nodes: BTreeMap<String, Waypoint>, edges: Vec<Edge>) -> Self {
        let mut graph = Self {
            nodes,
            edges,
            version: GraphVersion(String::new()),
        };
        graph.version = graph.fingerprint();
        graph
    }

    pub fn from_message(message: RouteGraphMessage) -> Result<Self, GraphError> {
        let nodes = message
            .nodes
            .into_iter()
            .map(|n| Waypoint::new(n.label, n.x, n.y, n.orientation.to_radians()))
            .collect();
        let edges = message
            .edges
            .into_iter()
            .map(|e| Edge::new(e.from, e.to, e.weight))
            .collect();
        Self::new(nodes, edges)
    }

    /// Canonical wire form: nodes sorted by label, edges in construction order.
    pub fn to_message(&self) -> RouteGraphMessage {
        RouteGraphMessage {
            nodes: self
                .nodes
                .values()
                .map(|n| WireNode {
                    label: n.label.clone(),
                    x: n.x,
                    y: n.y,
                    orientation: WireOrientation::Radians(n.orientation),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| WireEdge {
                    from: e.from.clone(),
                    to: e.to.clone(),
                    weight: e.weight,
                })
                .collect(),
        }
    }

    fn fingerprint(&self) -> GraphVersion {
        let mut hasher = Sha256::new();
        for node in self.nodes.values() {
            hasher.update(node.label.as_bytes());
            hasher.update([0u8]);
            hasher.update(node.x.to_le_bytes());
            hasher.update(node.y.to_le_bytes());
            hasher.update(node.orientation.to_le_bytes());
        }
        hasher.update([0xffu8]);
        for edge in &self.edges {
            hasher.update(edge.from.as_bytes());
            hasher.update([0u8]);
            hasher.update(edge.to.as_bytes());
            hasher.update([0u8]);
            hasher.update(edge.weight.to_le_bytes());
        }
        GraphVersion(hex::encode(hasher.finalize()))
    }

    pub fn version(&self) -> &GraphVersion {
        &self.version
    }

    /// Waypoints in ascending label order.
    pub fn nodes(&self) -> impl Iterator<Item = &Waypoint> {
        self.nodes.values()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, label: &str) -> Option<&Waypoint> {
        self.nodes.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.nodes.contains_key(label)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Waypoint closest to `point`; ties go to the lowest label.
    pub fn nearest_node(&self, point: &Point) -> Option<&Waypoint> {
        let mut best: Option<(&Waypoint, f64)> = None;
        for node in self.nodes.values() {
            let distance = node.position().distance(point);
            match best {
                Some((_, d)) if distance >= d => {}
                _ => best = Some((node, distance)),
            }
        }
        best.map(|(node, _)| node)
    }

    /// Undirected adjacency between labels, ignoring edge direction and self-loops.
    pub fn undirected_neighbours(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut adjacency: BTreeMap<&str, BTreeSet<&str>> =
            self.nodes.keys().map(|l| (l.as_str(), BTreeSet::new())).collect();
        for edge in &self.edges {
            if edge.from == edge.to {
                continue;
            }
            if let Some(set) = adjacency.get_mut(edge.from.as_str()) {
                set.insert(edge.to.as_str());
            }
            if let Some(set) = adjacency.get_mut(edge.to.as_str()) {
                set.insert(edge.from.as_str());
            }
        }
        adjacency
    }

    /// Edge-induced subgraph over `labels`: keeps edges whose endpoints are both inside.
    pub fn induced_subgraph(&self, labels: &BTreeSet<String>) -> RouteGraph {
        let nodes = self
            .nodes
            .iter()
            .filter(|(label, _)| labels.contains(*label))
            .map(|(label, node)| (label.clone(), node.clone()))
            .collect();
        let edges = self
            .edges
            .iter()
            .filter(|e| labels.contains(&e.from) && labels.contains(&e.to))
            .cloned()
            .collect();
        Self::from_parts(nodes, edges)
    }
}
