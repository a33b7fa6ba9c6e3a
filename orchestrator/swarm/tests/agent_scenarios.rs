// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end agent scenarios.
//!
//! The first tests drive a single `FleetAgent` by hand with a recording
//! publisher. The last one runs a whole fleet on the in-process bus with the
//! tokio clock paused, crashes the leader and checks that the fleet converges
//! on the next smallest namespace.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fleet_core::domain::events::FleetEvent;
use fleet_core::domain::fleet_config::{AgentSpec, StartSpec, TimingConfig};
use fleet_core::domain::graph::{Edge, RouteGraph, Waypoint};
use fleet_core::domain::messages::{
    Channel, InitialPositionMessage, MessagePublisher, NavigationCommand, NavigationOutcome,
    NavigationStatus, OutboundMessage, WireOrientation,
};
use fleet_core::domain::motion::{MotionError, MotionExecutor, MotionReport};
use fleet_core::infrastructure::event_bus::EventBus;
use fleet_core::infrastructure::message_bus::{Envelope, MessageBus};
use fleet_core::infrastructure::motion::SimulatedMotion;
use fleet_swarm::application::FleetAgent;
use fleet_swarm::domain::{Role, SlotState};

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(Channel, String)>>,
}

impl RecordingPublisher {
    fn commands_for(&self, namespace: &str) -> Vec<String> {
        let channel = Channel::NavigationCommand(namespace.to_string());
        self.sent
            .lock()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, payload)| {
                let command: NavigationCommand = serde_json::from_str(payload).unwrap();
                command.label
            })
            .collect()
    }
}

impl MessagePublisher for RecordingPublisher {
    fn publish(&self, channel: Channel, payload: String) {
        self.sent.lock().push((channel, payload));
    }
}

/// Motion that never finishes, so reservations stay put until a test reports.
struct Parked;

#[async_trait]
impl MotionExecutor for Parked {
    async fn navigate(&self, _target: &Waypoint) -> Result<MotionReport, MotionError> {
        std::future::pending().await
    }
}

fn spec(namespace: &str, x: f64) -> AgentSpec {
    AgentSpec {
        namespace: namespace.to_string(),
        start: StartSpec::Point { x, y: 0.0 },
        orientation: None,
    }
}

/// A0 - B1 - C2 - D3 - E4 - F5, both directions.
fn line() -> RouteGraph {
    let labels = ["A", "B", "C", "D", "E", "F"];
    let nodes = labels
        .iter()
        .enumerate()
        .map(|(i, l)| Waypoint::new(*l, i as f64, 0.0, 0.0))
        .collect();
    let edges = labels
        .windows(2)
        .flat_map(|p| [Edge::new(p[0], p[1], 1.0), Edge::new(p[1], p[0], 1.0)])
        .collect();
    RouteGraph::new(nodes, edges).unwrap()
}

fn position(namespace: &str, x: f64) -> InitialPositionMessage {
    InitialPositionMessage {
        robot_namespace: namespace.to_string(),
        x,
        y: 0.0,
        orientation: WireOrientation::default(),
    }
}

fn reached(namespace: &str, label: &str) -> NavigationStatus {
    NavigationStatus {
        robot_namespace: namespace.to_string(),
        status: NavigationOutcome::Reached,
        error_message: String::new(),
        time_taken: 1.5,
        current_waypoint: label.to_string(),
    }
}

fn manual_agent(namespace: &str, x: f64) -> (FleetAgent, Arc<RecordingPublisher>, EventBus) {
    let publisher = Arc::new(RecordingPublisher::default());
    let events = EventBus::new(256);
    let agent = FleetAgent::new(
        spec(namespace, x),
        TimingConfig::default(),
        publisher.clone(),
        Arc::new(Parked),
        events.clone(),
    );
    (agent, publisher, events)
}

#[tokio::test]
async fn test_follower_elects_smallest_live_namespace() {
    let (agent, publisher, events) = manual_agent("robotC", 0.0);
    let mut receiver = events.subscribe();
    let start = Instant::now();

    agent.on_peer_seen("robotA", start + Duration::from_secs(5));
    agent.on_peer_seen("robotB", start + Duration::from_secs(5));
    agent.check_leader_at(start + Duration::from_secs(6));

    let mut elected = None;
    while let Ok(event) = receiver.try_recv() {
        if let FleetEvent::LeaderElected { leader, candidates, .. } = event {
            elected = Some((leader, candidates));
        }
    }
    let (leader, candidates) = elected.expect("an election must have run");
    assert_eq!(leader, "robotA");
    assert_eq!(candidates, vec!["robotA", "robotB", "robotC"]);
    assert_eq!(agent.role(), Role::Follower);
    assert!(publisher.sent.lock().is_empty());
}

fn two_agent_leader() -> (FleetAgent, Arc<RecordingPublisher>, EventBus) {
    let (leader, publisher, events) = manual_agent("robotA", 0.0);
    leader.on_route_graph(line());
    leader.on_peer_seen("robotB", Instant::now());
    leader.on_initial_position(&position("robotB", 5.0));
    leader.become_leader().unwrap();
    (leader, publisher, events)
}

#[tokio::test]
async fn test_arrivals_walk_the_circuit() {
    let (leader, publisher, _events) = two_agent_leader();

    // robotB owns {D, E, F} and walks F, E, D, E.
    assert_eq!(publisher.commands_for("robotB"), vec!["F"]);
    leader.on_navigation_status(&reached("robotB", "F"));
    leader.on_navigation_status(&reached("robotB", "E"));
    leader.on_navigation_status(&reached("robotB", "D"));
    assert_eq!(publisher.commands_for("robotB"), vec!["F", "E", "D", "E"]);

    let snapshot = leader.snapshot();
    assert_eq!(snapshot.occupied.get("E").map(String::as_str), Some("robotB"));
    assert!(!snapshot.occupied.contains_key("D"));
    assert_eq!(snapshot.slots["robotB"].cursor, 0);
}

#[tokio::test]
async fn test_control_tick_reissues_lost_command() {
    let (leader, publisher, _events) = two_agent_leader();
    assert_eq!(publisher.commands_for("robotB"), vec!["F"]);

    // The arrival at F never reaches the leader; the tick starts the circuit over.
    leader.control_tick();
    assert_eq!(publisher.commands_for("robotB"), vec!["F", "F"]);
    let snapshot = leader.snapshot();
    let slot = &snapshot.slots["robotB"];
    assert_eq!(slot.state, SlotState::Assigned);
    assert_eq!(slot.cursor, 1);
    assert_eq!(snapshot.occupied.get("F").map(String::as_str), Some("robotB"));
    // The leader is already heading to its own route head.
    assert_eq!(snapshot.navigating.as_deref(), Some("A"));
    assert_eq!(snapshot.occupied.get("A").map(String::as_str), Some("robotA"));

    leader.on_navigation_status(&reached("robotB", "F"));
    leader.on_navigation_status(&reached("robotB", "E"));
    assert_eq!(leader.snapshot().slots["robotB"].cursor, 3);

    leader.control_tick();
    let snapshot = leader.snapshot();
    assert_eq!(snapshot.slots["robotB"].cursor, 1);
    assert_eq!(snapshot.slots["robotB"].target.as_deref(), Some("F"));
    assert!(!snapshot.occupied.contains_key("D"));
    assert_eq!(publisher.commands_for("robotB").last().map(String::as_str), Some("F"));
}

#[tokio::test]
async fn test_new_peer_triggers_full_replan() {
    let (leader, publisher, events) = two_agent_leader();
    let mut receiver = events.subscribe();
    leader.on_navigation_status(&reached("robotB", "F"));
    assert_eq!(publisher.commands_for("robotB"), vec!["F", "E"]);

    // robotC takes over {D, E}; robotB is left with F alone and no circuit.
    leader.on_peer_seen("robotC", Instant::now());
    leader.on_initial_position(&position("robotC", 4.0));
    let snapshot = leader.snapshot();
    assert!(snapshot.slots["robotB"].route.is_empty());
    assert_eq!(snapshot.slots["robotB"].state, SlotState::Idle);
    assert_eq!(snapshot.slots["robotC"].route_labels(), vec!["E", "D"]);
    assert_eq!(snapshot.occupied.get("E").map(String::as_str), Some("robotC"));
    assert_eq!(publisher.commands_for("robotC"), vec!["E"]);

    // robotB's late arrival at E no longer matches anything.
    leader.on_navigation_status(&reached("robotB", "E"));
    assert_eq!(leader.snapshot().occupied, snapshot.occupied);

    let mut skipped = None;
    while let Ok(event) = receiver.try_recv() {
        if let FleetEvent::RoutesPlanned { skipped: s, .. } = event {
            skipped = Some(s);
        }
    }
    assert_eq!(skipped, Some(vec!["robotB".to_string()]));
}

#[tokio::test]
async fn test_malformed_and_unknown_status_leave_state_untouched() {
    let (leader, publisher, _events) = two_agent_leader();
    let before = leader.snapshot();
    let sent_before = publisher.sent.lock().len();

    leader.handle_envelope(&Envelope {
        channel: Channel::NavigationStatus,
        payload: "{\"robot_namespace\": \"robotB\", \"status\":".to_string(),
    });
    leader.on_navigation_status(&reached("robotZ", "F"));
    // Report for a label robotB does not hold.
    leader.on_navigation_status(&reached("robotB", "D"));

    let after = leader.snapshot();
    assert_eq!(before.slots, after.slots);
    assert_eq!(before.occupied, after.occupied);
    assert_eq!(publisher.sent.lock().len(), sent_before);
}

#[tokio::test]
async fn test_failure_releases_waypoint() {
    let (leader, publisher, _events) = two_agent_leader();

    leader.on_navigation_status(&NavigationStatus {
        robot_namespace: "robotB".to_string(),
        status: NavigationOutcome::Error,
        error_message: "blocked".to_string(),
        time_taken: 0.0,
        current_waypoint: "F".to_string(),
    });
    let snapshot = leader.snapshot();
    assert!(!snapshot.occupied.contains_key("F"));
    assert_eq!(snapshot.slots["robotB"].state, SlotState::Idle);
    // Failure only re-serves waiting agents; robotB gets its next target on the next pass.
    assert_eq!(publisher.commands_for("robotB"), vec!["F"]);
}

#[tokio::test(start_paused = true)]
async fn test_fleet_converges_and_survives_leader_crash() {
    let bus = MessageBus::with_default_capacity();
    let events = EventBus::with_default_capacity();
    let mut agents = Vec::new();
    let mut tokens = Vec::new();

    for (namespace, x) in [("robotA", 0.0), ("robotB", 2.5), ("robotC", 5.0)] {
        let agent = Arc::new(FleetAgent::new(
            spec(namespace, x),
            TimingConfig::default(),
            Arc::new(bus.clone()),
            Arc::new(SimulatedMotion::new(Duration::from_secs(2))),
            events.clone(),
        ));
        let inbound = bus.subscribe(agent.subscriptions());
        let token = CancellationToken::new();
        tokio::spawn(Arc::clone(&agent).run(inbound, token.clone()));
        agents.push(agent);
        tokens.push(token);
    }
    OutboundMessage::RouteGraph(line().to_message()).publish_to(&bus);

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(agents[0].role(), Role::Leader);
    for follower in &agents[1..] {
        let snapshot = follower.snapshot();
        assert_eq!(snapshot.role, Role::Follower);
        assert_eq!(snapshot.leader.as_deref(), Some("robotA"));
    }
    let leading = agents[0].snapshot();
    assert_eq!(leading.slots.len(), 3);
    assert!(leading.slots.values().all(|slot| !slot.route.is_empty()));

    tokens[0].cancel();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(agents[1].role(), Role::Leader);
    let survivor = agents[2].snapshot();
    assert_eq!(survivor.role, Role::Follower);
    assert_eq!(survivor.leader.as_deref(), Some("robotB"));
    assert!(!survivor.peers.contains(&"robotA".to_string()));

    let leading = agents[1].snapshot();
    assert_eq!(leading.slots.keys().collect::<Vec<_>>(), vec!["robotB", "robotC"]);

    for token in &tokens {
        token.cancel();
    }
}
