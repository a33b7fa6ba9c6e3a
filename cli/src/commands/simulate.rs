// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Fleet simulator
//!
//! Runs every agent of the manifest in this process on the in-process message
//! bus, publishes the route graph the way the map digitizer would, and applies
//! the scripted crashes.

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fleet_core::domain::events::FleetEvent;
use fleet_core::domain::fleet_config::{CrashSpec, FleetConfigManifest};
use fleet_core::domain::graph::RouteGraph;
use fleet_core::domain::messages::OutboundMessage;
use fleet_core::domain::motion::MotionExecutor;
use fleet_core::infrastructure::event_bus::{EventBus, EventBusError};
use fleet_core::infrastructure::message_bus::MessageBus;
use fleet_core::infrastructure::motion::build_motion_executor;
use fleet_swarm::application::{AgentSnapshot, FleetAgent};

use super::graph::load_route_graph;

pub struct SimulationOptions {
    /// Stop after this long; run until Ctrl+C when `None`.
    pub duration: Option<Duration>,
    /// Overrides `spec.graph_path`.
    pub graph: Option<PathBuf>,
}

/// A set of agents sharing one in-process bus.
pub struct Fleet {
    bus: MessageBus,
    events: EventBus,
    agents: Vec<Arc<FleetAgent>>,
    tokens: BTreeMap<String, CancellationToken>,
    root: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Fleet {
    /// Spawn one agent task per configured agent. Must run inside a tokio runtime.
    pub fn launch(config: &FleetConfigManifest, motion: Arc<dyn MotionExecutor>) -> Self {
        let bus = MessageBus::with_default_capacity();
        let events = EventBus::with_default_capacity();
        let root = CancellationToken::new();
        let mut agents = Vec::with_capacity(config.spec.agents.len());
        let mut tokens = BTreeMap::new();
        let mut handles = Vec::with_capacity(config.spec.agents.len());

        for spec in &config.spec.agents {
            let agent = Arc::new(FleetAgent::new(
                spec.clone(),
                config.spec.timing.clone(),
                Arc::new(bus.clone()),
                Arc::clone(&motion),
                events.clone(),
            ));
            let inbound = bus.subscribe(agent.subscriptions());
            let token = root.child_token();
            handles.push(tokio::spawn(Arc::clone(&agent).run(inbound, token.clone())));
            tokens.insert(spec.namespace.clone(), token);
            agents.push(agent);
        }

        info!(agents = agents.len(), "Fleet launched");
        Self {
            bus,
            events,
            agents,
            tokens,
            root,
            handles,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn publish_graph(&self, graph: &RouteGraph) {
        info!(
            version = %graph.version().short(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Publishing route graph"
        );
        OutboundMessage::RouteGraph(graph.to_message()).publish_to(&self.bus);
    }

    /// Stop one agent abruptly. Returns `false` for an unknown namespace.
    pub fn crash(&self, namespace: &str) -> bool {
        match self.tokens.get(namespace) {
            Some(token) => {
                warn!(namespace = %namespace, "Crashing agent");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel each scripted agent once its delay has passed.
    pub fn schedule_crashes(&mut self, crashes: &[CrashSpec]) {
        for crash in crashes {
            let Some(token) = self.tokens.get(&crash.namespace).cloned() else {
                warn!(namespace = %crash.namespace, "Crash scripted for unknown agent");
                continue;
            };
            let root = self.root.clone();
            let namespace = crash.namespace.clone();
            let after = crash.after;
            self.handles.push(tokio::spawn(async move {
                tokio::select! {
                    _ = root.cancelled() => {}
                    _ = tokio::time::sleep(after) => {
                        warn!(namespace = %namespace, after = ?after, "Scripted crash");
                        token.cancel();
                    }
                }
            }));
        }
    }

    pub fn snapshots(&self) -> Vec<AgentSnapshot> {
        self.agents.iter().map(|agent| agent.snapshot()).collect()
    }

    pub async fn shutdown(self) {
        self.root.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Fleet task ended abnormally");
            }
        }
    }
}

/// One-line description of an event for the console.
pub fn render_event(event: &FleetEvent) -> String {
    match event {
        FleetEvent::PeerJoined { observer, peer, .. } => format!("[{}] peer {} joined", observer, peer),
        FleetEvent::PeerEvicted {
            observer,
            peer,
            silent_for_ms,
            ..
        } => format!("[{}] peer {} evicted after {} ms of silence", observer, peer, silent_for_ms),
        FleetEvent::LeaderLost { observer, leader, .. } => format!(
            "[{}] lost leader {}",
            observer,
            leader.as_deref().unwrap_or("(none)")
        ),
        FleetEvent::LeaderElected {
            observer,
            leader,
            candidates,
            ..
        } => format!(
            "[{}] elected {} from [{}]",
            observer,
            leader,
            candidates.join(", ")
        ),
        FleetEvent::SteppedDown {
            observer,
            in_favour_of,
            ..
        } => format!("[{}] stepped down for {}", observer, in_favour_of),
        FleetEvent::GraphUpdated {
            observer,
            version,
            nodes,
            edges,
            ..
        } => format!(
            "[{}] route graph {} ({} waypoints, {} edges)",
            observer,
            version.short(),
            nodes,
            edges
        ),
        FleetEvent::RoutesPlanned {
            observer,
            agents,
            skipped,
            ..
        } => {
            let mut line = format!("[{}] planned routes for {}", observer, agents.join(", "));
            if !skipped.is_empty() {
                line.push_str(&format!(" (no route: {})", skipped.join(", ")));
            }
            line
        }
        FleetEvent::WaypointAssigned {
            observer,
            agent,
            label,
            ..
        } => format!("[{}] {} -> {}", observer, agent, label),
        FleetEvent::AgentWaiting {
            observer,
            agent,
            label,
            held_by,
            ..
        } => format!("[{}] {} waits for {} (held by {})", observer, agent, label, held_by),
        FleetEvent::WaypointReached {
            observer,
            agent,
            label,
            time_taken_secs,
            ..
        } => format!(
            "[{}] {} reached {} in {:.1}s",
            observer, agent, label, time_taken_secs
        ),
        FleetEvent::NavigationFailed {
            observer,
            agent,
            label,
            reason,
            ..
        } => format!("[{}] {} failed at {}: {}", observer, agent, label, reason),
    }
}

fn print_event(event: &FleetEvent) {
    let line = render_event(event);
    match event {
        FleetEvent::LeaderElected { .. } | FleetEvent::SteppedDown { .. } => {
            println!("{}", line.green().bold())
        }
        FleetEvent::LeaderLost { .. } | FleetEvent::PeerEvicted { .. } => println!("{}", line.yellow()),
        FleetEvent::NavigationFailed { .. } => println!("{}", line.red()),
        FleetEvent::AgentWaiting { .. } => println!("{}", line.cyan()),
        _ => println!("{}", line),
    }
}

pub async fn run(config: FleetConfigManifest, options: SimulationOptions) -> Result<()> {
    config.validate().context("Configuration validation failed")?;

    let graph_path = options
        .graph
        .or_else(|| config.spec.graph_path.clone())
        .context("No route graph: set spec.graph_path or pass --graph")?;
    let graph = load_route_graph(&graph_path)?;
    // The binary has no robot motion stack to bind.
    let motion = build_motion_executor(&config.spec.motion, None)
        .context("Cannot build motion executor")?;

    println!(
        "{}",
        format!(
            "Simulating {} agents on {} ({} waypoints)",
            config.spec.agents.len(),
            graph_path.display(),
            graph.node_count()
        )
        .bold()
    );

    let mut fleet = Fleet::launch(&config, motion);
    let mut receiver = fleet.events().subscribe();
    let printer_stop = CancellationToken::new();
    let printer = {
        let stop = printer_stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    event = receiver.recv() => match event {
                        Ok(event) => print_event(&event),
                        Err(EventBusError::Lagged(_)) | Err(EventBusError::Empty) => continue,
                        Err(EventBusError::Closed) => break,
                    },
                }
            }
        })
    };

    fleet.publish_graph(&graph);
    fleet.schedule_crashes(&config.spec.crashes);

    let deadline = async {
        match options.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            println!();
            info!("Interrupted, stopping fleet");
        }
        _ = deadline => info!("Simulation time elapsed"),
    }

    let snapshots = fleet.snapshots();
    fleet.shutdown().await;
    printer_stop.cancel();
    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer ended abnormally");
    }

    println!();
    println!("{}", "Final state:".bold());
    for snapshot in snapshots {
        println!(
            "  {} {} (leader: {}, peers: {}, navigating: {})",
            snapshot.namespace.bold(),
            snapshot.role,
            snapshot.leader.as_deref().unwrap_or("-"),
            snapshot.peers.len(),
            snapshot.navigating.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_core::domain::fleet_config::{AgentSpec, StartSpec};
    use fleet_core::domain::graph::GraphVersion;
    use fleet_core::domain::messages::RouteGraphMessage;
    use fleet_core::infrastructure::motion::SimulatedMotion;
    use fleet_swarm::domain::Role;

    fn manifest(namespaces: &[(&str, &str)]) -> FleetConfigManifest {
        let mut config = FleetConfigManifest::default();
        config.spec.agents = namespaces
            .iter()
            .map(|(ns, node)| AgentSpec {
                namespace: ns.to_string(),
                start: StartSpec::Node {
                    node: node.to_string(),
                },
                orientation: None,
            })
            .collect();
        config
    }

    fn grid() -> RouteGraph {
        let message: RouteGraphMessage =
            serde_json::from_str(include_str!("../../templates/route-graph.json")).unwrap();
        RouteGraph::from_message(message).unwrap()
    }

    #[test]
    fn test_render_event_lines() {
        let elected = FleetEvent::LeaderElected {
            observer: "robot2".to_string(),
            leader: "robot1".to_string(),
            candidates: vec!["robot1".to_string(), "robot2".to_string()],
            elected_at: Utc::now(),
        };
        assert_eq!(render_event(&elected), "[robot2] elected robot1 from [robot1, robot2]");

        let planned = FleetEvent::RoutesPlanned {
            observer: "robot1".to_string(),
            version: GraphVersion("abc".to_string()),
            agents: vec!["robot1".to_string(), "robot2".to_string()],
            skipped: vec!["robot2".to_string()],
            planned_at: Utc::now(),
        };
        assert_eq!(
            render_event(&planned),
            "[robot1] planned routes for robot1, robot2 (no route: robot2)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_fleet_reelects_after_crash() {
        let config = manifest(&[("robot1", "A"), ("robot2", "I"), ("robot3", "E")]);
        let motion: Arc<dyn MotionExecutor> = Arc::new(SimulatedMotion::new(Duration::from_secs(3)));
        let mut fleet = Fleet::launch(&config, motion);
        fleet.publish_graph(&grid());
        fleet.schedule_crashes(&[CrashSpec {
            namespace: "robot1".to_string(),
            after: Duration::from_secs(20),
        }]);
        assert!(!fleet.crash("robot9"));

        tokio::time::sleep(Duration::from_secs(15)).await;
        let snapshots = fleet.snapshots();
        assert_eq!(snapshots[0].role, Role::Leader);
        assert!(snapshots[1..]
            .iter()
            .all(|s| s.leader.as_deref() == Some("robot1")));

        tokio::time::sleep(Duration::from_secs(30)).await;
        let snapshots = fleet.snapshots();
        assert_eq!(snapshots[1].role, Role::Leader);
        assert_eq!(snapshots[2].leader.as_deref(), Some("robot2"));

        fleet.shutdown().await;
    }
}
