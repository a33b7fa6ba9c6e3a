// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Circuit Solver
//!
//! Produces a closed walk that traverses every edge of a directed subgraph at
//! least once (directed Chinese-postman heuristic):
//!
//! 1. per-node imbalance `out - in`;
//! 2. Eulerization: nodes short on out-edges are paired with nodes short on
//!    in-edges through a min-cost flow over shortest-path distances, and the
//!    chosen shortest paths are duplicated;
//! 3. Hierholzer traversal of the balanced multigraph;
//! 4. rotation to the node nearest the agent's start position.
//!
//! Every step is deterministic: ties are broken by label order and edge order.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};
use thiserror::Error;

use crate::domain::graph::{Point, RouteGraph, Waypoint};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouteError {
    #[error("subgraph has no edges")]
    NoEdges,

    #[error("subgraph edges are not connected")]
    Disconnected,

    #[error("subgraph cannot be balanced: no path out of '{node}'")]
    NotEulerizable { node: String },

    #[error("circuit covers {covered} of {expected} edges")]
    IncompleteCircuit { covered: usize, expected: usize },
}

/// A closed edge-covering route.
#[derive(Debug, Clone, PartialEq)]
pub struct Circuit {
    /// Visiting order; the first waypoint is repeated at the end.
    pub route: Vec<Waypoint>,
    /// Number of edges added to balance the subgraph.
    pub duplicated_edges: usize,
    /// Total weight of the walk, duplicates included.
    pub cost: f64,
}

impl Circuit {
    /// The route without its closing repetition, for cyclic traversal.
    pub fn cycle(&self) -> &[Waypoint] {
        match self.route.len() {
            0 => &self.route,
            n => &self.route[..n - 1],
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        self.route.iter().map(|w| w.label.as_str()).collect()
    }
}

/// Multigraph link; `origin` is the index of the graph edge it copies.
#[derive(Debug, Clone, Copy)]
struct Link {
    from: usize,
    to: usize,
    weight: f64,
    origin: usize,
}

pub fn solve_circuit(graph: &RouteGraph, start: Point) -> Result<Circuit, RouteError> {
    if graph.edge_count() == 0 {
        return Err(RouteError::NoEdges);
    }

    let nodes: Vec<&Waypoint> = graph.nodes().collect();
    let index_of = |label: &str| nodes.binary_search_by(|n| n.label.as_str().cmp(label)).ok();

    let mut arcs = Vec::with_capacity(graph.edge_count());
    for (origin, edge) in graph.edges().iter().enumerate() {
        if let (Some(from), Some(to)) = (index_of(&edge.from), index_of(&edge.to)) {
            arcs.push(Link {
                from,
                to,
                weight: edge.weight,
                origin,
            });
        }
    }

    if !weakly_connected(nodes.len(), &arcs) {
        return Err(RouteError::Disconnected);
    }

    let duplicates = balancing_arcs(&nodes, &arcs)?;
    let duplicated_edges = duplicates.len();
    arcs.extend(duplicates);

    let (walk, used) = hierholzer(nodes.len(), &arcs);
    if used.iter().filter(|u| **u).count() != arcs.len() {
        let covered: BTreeSet<usize> = arcs
            .iter()
            .zip(&used)
            .filter(|(_, u)| **u)
            .map(|(a, _)| a.origin)
            .collect();
        return Err(RouteError::IncompleteCircuit {
            covered: covered.len(),
            expected: graph.edge_count(),
        });
    }

    let rotated = rotate_to_nearest(&nodes, walk, &start);
    Ok(Circuit {
        route: rotated.into_iter().map(|i| nodes[i].clone()).collect(),
        duplicated_edges,
        cost: arcs.iter().map(|a| a.weight).sum(),
    })
}

fn weakly_connected(node_count: usize, arcs: &[Link]) -> bool {
    let mut parent: Vec<usize> = (0..node_count).collect();
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }
    for arc in arcs {
        let (a, b) = (find(&mut parent, arc.from), find(&mut parent, arc.to));
        if a != b {
            parent[a.max(b)] = a.min(b);
        }
    }
    let mut roots = BTreeSet::new();
    for arc in arcs {
        roots.insert(find(&mut parent, arc.from));
    }
    roots.len() <= 1
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frontier {
    cost: f64,
    node: usize,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on cost, then on node index.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-source shortest paths; returns distances and the arc used to reach each node.
fn dijkstra(node_count: usize, arcs: &[Link], source: usize) -> (Vec<f64>, Vec<Option<usize>>) {
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for (i, arc) in arcs.iter().enumerate() {
        outgoing[arc.from].push(i);
    }
    let mut dist = vec![f64::INFINITY; node_count];
    let mut via = vec![None; node_count];
    let mut heap = BinaryHeap::new();
    dist[source] = 0.0;
    heap.push(Frontier {
        cost: 0.0,
        node: source,
    });
    while let Some(Frontier { cost, node }) = heap.pop() {
        if cost > dist[node] {
            continue;
        }
        for &i in &outgoing[node] {
            let next = arcs[i].to;
            let candidate = cost + arcs[i].weight;
            if candidate < dist[next] {
                dist[next] = candidate;
                via[next] = Some(i);
                heap.push(Frontier {
                    cost: candidate,
                    node: next,
                });
            }
        }
    }
    (dist, via)
}

/// Duplicate arcs that make every node's in-degree equal its out-degree.
fn balancing_arcs(nodes: &[&Waypoint], arcs: &[Link]) -> Result<Vec<Link>, RouteError> {
    let mut imbalance = vec![0i64; nodes.len()];
    for arc in arcs {
        imbalance[arc.from] += 1;
        imbalance[arc.to] -= 1;
    }
    // Nodes with more in- than out-edges need extra paths leaving them.
    let sources: Vec<usize> = (0..nodes.len()).filter(|&i| imbalance[i] < 0).collect();
    let sinks: Vec<usize> = (0..nodes.len()).filter(|&i| imbalance[i] > 0).collect();
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let paths: Vec<(Vec<f64>, Vec<Option<usize>>)> = sources
        .iter()
        .map(|&s| dijkstra(nodes.len(), arcs, s))
        .collect();

    // Flow network: 0 = super source, 1..=S sources, S+1..=S+T sinks, last = super sink.
    let s_count = sources.len();
    let t_count = sinks.len();
    let super_sink = s_count + t_count + 1;
    let mut network = FlowNetwork::new(super_sink + 1);
    let mut pair_arcs = Vec::new();
    let mut supply_arcs = Vec::new();
    for (si, &s) in sources.iter().enumerate() {
        supply_arcs.push(network.add(0, 1 + si, -imbalance[s], 0.0));
        for (ti, &t) in sinks.iter().enumerate() {
            let d = paths[si].0[t];
            if d.is_finite() {
                let id = network.add(1 + si, 1 + s_count + ti, i64::MAX / 4, d);
                pair_arcs.push((si, ti, id));
            }
        }
    }
    for (ti, &t) in sinks.iter().enumerate() {
        network.add(1 + s_count + ti, super_sink, imbalance[t], 0.0);
    }

    let required: i64 = sources.iter().map(|&s| -imbalance[s]).sum();
    let pushed = network.min_cost_flow(0, super_sink, required);
    if pushed < required {
        let stranded = sources
            .iter()
            .zip(&supply_arcs)
            .find(|&(&s, &id)| network.flow_on(id) < -imbalance[s])
            .map(|(&s, _)| s)
            .unwrap_or(sources[0]);
        return Err(RouteError::NotEulerizable {
            node: nodes[stranded].label.clone(),
        });
    }

    let mut duplicates = Vec::new();
    for (si, ti, id) in pair_arcs {
        let flow = network.flow_on(id);
        if flow == 0 {
            continue;
        }
        let path = trace_path(arcs, &paths[si].1, sources[si], sinks[ti]);
        for _ in 0..flow {
            duplicates.extend(path.iter().map(|&i| arcs[i]));
        }
    }
    Ok(duplicates)
}

fn trace_path(arcs: &[Link], via: &[Option<usize>], source: usize, target: usize) -> Vec<usize> {
    let mut path = Vec::new();
    let mut current = target;
    while current != source {
        match via[current] {
            Some(i) => {
                path.push(i);
                current = arcs[i].from;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

#[derive(Debug, Clone)]
struct FlowArc {
    to: usize,
    capacity: i64,
    cost: f64,
    reverse: usize,
}

/// Successive-shortest-path min-cost flow with Bellman-Ford.
#[derive(Debug)]
struct FlowNetwork {
    adjacency: Vec<Vec<FlowArc>>,
    /// (node, position) of every forward arc, by id.
    forward: Vec<(usize, usize)>,
    initial: Vec<i64>,
}

impl FlowNetwork {
    fn new(size: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); size],
            forward: Vec::new(),
            initial: Vec::new(),
        }
    }

    fn add(&mut self, from: usize, to: usize, capacity: i64, cost: f64) -> usize {
        let forward_pos = self.adjacency[from].len();
        let reverse_pos = self.adjacency[to].len();
        self.adjacency[from].push(FlowArc {
            to,
            capacity,
            cost,
            reverse: reverse_pos,
        });
        self.adjacency[to].push(FlowArc {
            to: from,
            capacity: 0,
            cost: -cost,
            reverse: forward_pos,
        });
        self.forward.push((from, forward_pos));
        self.initial.push(capacity);
        self.forward.len() - 1
    }

    fn flow_on(&self, id: usize) -> i64 {
        let (node, pos) = self.forward[id];
        self.initial[id] - self.adjacency[node][pos].capacity
    }

    fn min_cost_flow(&mut self, source: usize, sink: usize, limit: i64) -> i64 {
        let size = self.adjacency.len();
        let mut total = 0;
        while total < limit {
            let mut dist = vec![f64::INFINITY; size];
            let mut prev: Vec<Option<(usize, usize)>> = vec![None; size];
            dist[source] = 0.0;
            for _ in 0..size {
                let mut updated = false;
                for u in 0..size {
                    if !dist[u].is_finite() {
                        continue;
                    }
                    for (pos, arc) in self.adjacency[u].iter().enumerate() {
                        if arc.capacity > 0 && dist[u] + arc.cost < dist[arc.to] - 1e-12 {
                            dist[arc.to] = dist[u] + arc.cost;
                            prev[arc.to] = Some((u, pos));
                            updated = true;
                        }
                    }
                }
                if !updated {
                    break;
                }
            }
            if !dist[sink].is_finite() {
                break;
            }

            let mut push = limit - total;
            let mut v = sink;
            while let Some((u, pos)) = prev[v] {
                push = push.min(self.adjacency[u][pos].capacity);
                v = u;
            }
            let mut v = sink;
            while let Some((u, pos)) = prev[v] {
                let reverse = self.adjacency[u][pos].reverse;
                self.adjacency[u][pos].capacity -= push;
                self.adjacency[v][reverse].capacity += push;
                v = u;
            }
            total += push;
        }
        total
    }
}

/// Iterative Hierholzer from the lowest-label node with outgoing arcs.
/// Returns the closed node walk and which arcs it consumed.
fn hierholzer(node_count: usize, arcs: &[Link]) -> (Vec<usize>, Vec<bool>) {
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for (i, arc) in arcs.iter().enumerate() {
        outgoing[arc.from].push(i);
    }
    for list in &mut outgoing {
        list.sort_by_key(|&i| (arcs[i].to, i));
    }

    let mut used = vec![false; arcs.len()];
    let Some(start) = (0..node_count).find(|&n| !outgoing[n].is_empty()) else {
        return (Vec::new(), used);
    };

    let mut cursor = vec![0usize; node_count];
    let mut stack = vec![start];
    let mut walk = Vec::with_capacity(arcs.len() + 1);
    while let Some(&v) = stack.last() {
        if cursor[v] < outgoing[v].len() {
            let i = outgoing[v][cursor[v]];
            cursor[v] += 1;
            used[i] = true;
            stack.push(arcs[i].to);
        } else {
            walk.push(v);
            stack.pop();
        }
    }
    walk.reverse();
    (walk, used)
}

/// Rotate a closed walk so it starts (and ends) at the walk node nearest `start`.
fn rotate_to_nearest(nodes: &[&Waypoint], walk: Vec<usize>, start: &Point) -> Vec<usize> {
    if walk.len() < 2 {
        return walk;
    }
    let open = &walk[..walk.len() - 1];
    let visited: BTreeSet<usize> = open.iter().copied().collect();
    // Node indices follow label order, so the first strict minimum is the lowest label.
    let mut target = open[0];
    let mut best = f64::INFINITY;
    for &n in &visited {
        let d = nodes[n].position().distance(start);
        if d < best {
            best = d;
            target = n;
        }
    }
    let offset = open.iter().position(|&n| n == target).unwrap_or(0);
    let mut rotated: Vec<usize> = open[offset..].iter().chain(&open[..offset]).copied().collect();
    rotated.push(target);
    rotated
}
