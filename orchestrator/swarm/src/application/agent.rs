// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Role State Machine
//!
//! One [`FleetAgent`] per robot. Every agent runs the same code and switches
//! between Follower and Leader at runtime.
//!
//! - **Follower**: publishes liveness, tracks the leader, executes the
//!   waypoints it is sent and reports each outcome.
//! - **Leader**: additionally partitions the route graph, solves one circuit
//!   per agent and arbitrates waypoint occupancy.
//!
//! ## Concurrency
//!
//! All coordination state sits behind one `parking_lot::Mutex`. Each handler
//! takes the lock for exactly one state transition, collects the resulting
//! [`Effect`]s, releases the lock and only then publishes messages, spawns
//! motion workers or emits events. Motion runs on its own task and reports back
//! through a local channel into the dispatch loop.

use chrono::Utc;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fleet_core::domain::events::FleetEvent;
use fleet_core::domain::fleet_config::{AgentSpec, TimingConfig};
use fleet_core::domain::graph::{GraphVersion, Pose, RouteGraph, Waypoint};
use fleet_core::domain::messages::{
    Channel, InboundMessage, InitialPositionMessage, MessagePublisher, NavigationCommand,
    NavigationOutcome, NavigationStatus, OutboundMessage, WireOrientation,
};
use fleet_core::domain::motion::{MotionError, MotionExecutor, MotionReport};
use fleet_core::infrastructure::event_bus::{EventBus, EventBusError};
use fleet_core::infrastructure::message_bus::{Envelope, MessageReceiver};

use crate::application::planner::plan_routes;
use crate::domain::election::{ElectionCoordinator, ElectionDecision};
use crate::domain::membership::{LeaderStatus, Membership, Role};
use crate::domain::occupancy::{AgentSlot, AttemptOutcome, OccupancyScheduler};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LeaderActivationError {
    #[error("agent '{0}' has no route graph yet")]
    NoRouteGraph(String),
}

/// Outcome of one motion worker.
#[derive(Debug)]
pub struct MotionCompletion {
    pub target: Waypoint,
    pub result: Result<MotionReport, MotionError>,
}

/// Side effects of a state transition, applied after the lock is released.
#[derive(Debug)]
enum Effect {
    Publish(OutboundMessage),
    StartMotion(Waypoint),
    Event(FleetEvent),
}

struct CoordinationState {
    role: Role,
    graph: Option<RouteGraph>,
    start: Option<Pose>,
    membership: Membership,
    election: ElectionCoordinator,
    scheduler: OccupancyScheduler,
    /// Own waypoint in flight, and the latest command received meanwhile.
    navigating: Option<Waypoint>,
    queued: Option<Waypoint>,
    activation_pending: bool,
}

/// Point-in-time view of an agent, for observers and tests.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub namespace: String,
    pub role: Role,
    pub leader: Option<String>,
    pub peers: Vec<String>,
    pub graph_version: Option<GraphVersion>,
    pub start: Option<Pose>,
    pub slots: BTreeMap<String, AgentSlot>,
    pub occupied: BTreeMap<String, String>,
    pub navigating: Option<String>,
    pub activation_pending: bool,
}

pub struct FleetAgent {
    spec: AgentSpec,
    timing: TimingConfig,
    publisher: Arc<dyn MessagePublisher>,
    motion: Arc<dyn MotionExecutor>,
    events: EventBus,
    state: Mutex<CoordinationState>,
    completions_tx: mpsc::UnboundedSender<MotionCompletion>,
    completions_rx: Mutex<Option<mpsc::UnboundedReceiver<MotionCompletion>>>,
}

impl FleetAgent {
    pub fn new(
        spec: AgentSpec,
        timing: TimingConfig,
        publisher: Arc<dyn MessagePublisher>,
        motion: Arc<dyn MotionExecutor>,
        events: EventBus,
    ) -> Self {
        let now = Instant::now();
        let start = spec.resolve_start(None);
        let mut membership = Membership::new(spec.namespace.clone(), timing.heartbeat_timeout, now);
        if let Some(pose) = start {
            membership.record_position(&spec.namespace, pose);
        }
        let election = ElectionCoordinator::new(spec.namespace.clone(), timing.election_rerun_checks);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Self {
            spec,
            timing,
            publisher,
            motion,
            events,
            state: Mutex::new(CoordinationState {
                role: Role::Follower,
                graph: None,
                start,
                membership,
                election,
                scheduler: OccupancyScheduler::new(),
                navigating: None,
                queued: None,
                activation_pending: false,
            }),
            completions_tx,
            completions_rx: Mutex::new(Some(completions_rx)),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.spec.namespace
    }

    /// Channels this agent must be subscribed to.
    pub fn subscriptions(&self) -> Vec<Channel> {
        Channel::agent_subscriptions(&self.spec.namespace)
    }

    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let state = self.state.lock();
        AgentSnapshot {
            namespace: self.spec.namespace.clone(),
            role: state.role,
            leader: state.membership.leader().map(str::to_string),
            peers: state.membership.peers().map(|p| p.namespace.clone()).collect(),
            graph_version: state.graph.as_ref().map(|g| g.version().clone()),
            start: state.start,
            slots: state.scheduler.slots().clone(),
            occupied: state.scheduler.occupied().clone(),
            navigating: state.navigating.as_ref().map(|w| w.label.clone()),
            activation_pending: state.activation_pending,
        }
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Publish(message) => message.publish_to(self.publisher.as_ref()),
                Effect::Event(event) => self.events.publish(event),
                Effect::StartMotion(target) => {
                    let motion = Arc::clone(&self.motion);
                    let completions = self.completions_tx.clone();
                    let namespace = self.spec.namespace.clone();
                    tokio::spawn(async move {
                        let result = motion.navigate(&target).await;
                        if completions.send(MotionCompletion { target, result }).is_err() {
                            debug!(namespace = %namespace, "Agent stopped before motion completed");
                        }
                    });
                }
            }
        }
    }

    fn with_state<F>(&self, transition: F)
    where
        F: FnOnce(&Self, &mut CoordinationState) -> Vec<Effect>,
    {
        let effects = {
            let mut state = self.state.lock();
            transition(self, &mut state)
        };
        self.apply(effects);
    }

    // ------------------------------------------------------------------
    // Inbound messages
    // ------------------------------------------------------------------

    /// Decode and dispatch one bus message. Malformed payloads are logged and dropped.
    pub fn handle_envelope(&self, envelope: &Envelope) {
        let message = match InboundMessage::decode(&envelope.channel, &envelope.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    namespace = %self.spec.namespace,
                    channel = %envelope.channel,
                    error = %e,
                    "Dropping malformed message"
                );
                counter!("fleet_messages_dropped_total").increment(1);
                return;
            }
        };

        let now = Instant::now();
        match message {
            InboundMessage::Registration(sender) | InboundMessage::PeerHeartbeat(sender) => {
                self.on_peer_seen(&sender, now)
            }
            InboundMessage::LeaderHeartbeat(sender) => self.on_leader_heartbeat(&sender, now),
            InboundMessage::InitialPosition(position) => self.on_initial_position(&position),
            InboundMessage::RouteGraph(graph) => self.on_route_graph(graph),
            InboundMessage::NavigationCommand { namespace, command } => {
                if namespace == self.spec.namespace {
                    self.on_navigation_command(&command);
                }
            }
            InboundMessage::NavigationStatus(status) => {
                // Own status is handled locally when it is produced.
                if status.robot_namespace != self.spec.namespace {
                    self.on_navigation_status(&status);
                }
            }
        }
    }

    pub fn on_peer_seen(&self, sender: &str, now: Instant) {
        self.with_state(|this, state| {
            if !state.membership.observe_peer(sender, now) {
                return Vec::new();
            }
            this.peer_joined(state, sender)
        });
    }

    fn peer_joined(&self, state: &mut CoordinationState, peer: &str) -> Vec<Effect> {
        info!(namespace = %self.spec.namespace, peer = %peer, "Peer joined");
        gauge!("fleet_live_peers").set(state.membership.peer_count() as f64);
        let mut effects = vec![Effect::Event(FleetEvent::PeerJoined {
            observer: self.spec.namespace.clone(),
            peer: peer.to_string(),
            joined_at: Utc::now(),
        })];
        if state.role == Role::Leader {
            effects.extend(self.replan(state));
        }
        effects
    }

    pub fn on_leader_heartbeat(&self, sender: &str, now: Instant) {
        if sender == self.spec.namespace {
            return;
        }
        self.with_state(|this, state| {
            let mut effects = Vec::new();
            if state.role == Role::Leader {
                if sender > this.spec.namespace.as_str() {
                    warn!(
                        namespace = %this.spec.namespace,
                        rival = %sender,
                        "Competing leader with larger namespace; keeping leadership"
                    );
                    if state.membership.observe_peer(sender, now) {
                        effects.extend(this.peer_joined(state, sender));
                    }
                    return effects;
                }
                info!(
                    namespace = %this.spec.namespace,
                    leader = %sender,
                    "Stepping down in favour of smaller namespace"
                );
                state.role = Role::Follower;
                state.scheduler.clear();
                effects.push(Effect::Event(FleetEvent::SteppedDown {
                    observer: this.spec.namespace.clone(),
                    in_favour_of: sender.to_string(),
                    stepped_down_at: Utc::now(),
                }));
            }

            let previous = state.membership.leader().map(str::to_string);
            let joined = state.membership.observe_leader(sender, now);
            state.election.on_leader_alive();
            state.activation_pending = false;
            if previous.as_deref() != Some(sender) {
                info!(namespace = %this.spec.namespace, leader = %sender, "Following leader");
            }
            if joined {
                effects.extend(this.peer_joined(state, sender));
            }
            effects
        });
    }

    pub fn on_initial_position(&self, position: &InitialPositionMessage) {
        self.with_state(|this, state| {
            let pose = position.pose();
            let first = state.membership.record_position(&position.robot_namespace, pose);
            if first {
                debug!(
                    namespace = %this.spec.namespace,
                    agent = %position.robot_namespace,
                    x = pose.position.x,
                    y = pose.position.y,
                    "Recorded start position"
                );
            }
            if first && state.role == Role::Leader && state.membership.is_known(&position.robot_namespace) {
                return this.replan(state);
            }
            Vec::new()
        });
    }

    pub fn on_route_graph(&self, graph: RouteGraph) {
        self.with_state(|this, state| {
            if state.graph.as_ref().map(RouteGraph::version) == Some(graph.version()) {
                return Vec::new();
            }
            info!(
                namespace = %this.spec.namespace,
                version = %graph.version().short(),
                nodes = graph.node_count(),
                edges = graph.edge_count(),
                "Route graph updated"
            );
            let mut effects = vec![Effect::Event(FleetEvent::GraphUpdated {
                observer: this.spec.namespace.clone(),
                version: graph.version().clone(),
                nodes: graph.node_count(),
                edges: graph.edge_count(),
                updated_at: Utc::now(),
            })];
            state.graph = Some(graph);

            if state.start.is_none() {
                state.start = this.spec.resolve_start(state.graph.as_ref());
                match state.start {
                    Some(pose) => {
                        state.membership.record_position(&this.spec.namespace, pose);
                        effects.push(Effect::Publish(this.initial_position_message(pose)));
                    }
                    None => warn!(
                        namespace = %this.spec.namespace,
                        "Configured start waypoint is not in the route graph"
                    ),
                }
            }

            if state.activation_pending {
                match this.activate(state) {
                    Ok(more) => effects.extend(more),
                    Err(e) => warn!(namespace = %this.spec.namespace, error = %e, "Leader activation failed"),
                }
            } else if state.role == Role::Leader {
                effects.extend(this.replan(state));
            }
            effects
        });
    }

    pub fn on_navigation_command(&self, command: &NavigationCommand) {
        let target = command.to_waypoint();
        self.with_state(|this, state| this.accept_target(state, target));
    }

    fn accept_target(&self, state: &mut CoordinationState, target: Waypoint) -> Vec<Effect> {
        let Some(current) = state.navigating.as_ref().map(|w| w.label.clone()) else {
            info!(
                namespace = %self.spec.namespace,
                label = %target.label,
                x = target.x,
                y = target.y,
                "Navigating to waypoint"
            );
            state.navigating = Some(target.clone());
            return vec![Effect::StartMotion(target)];
        };
        if current == target.label {
            debug!(namespace = %self.spec.namespace, label = %current, "Already navigating to target");
            return Vec::new();
        }

        info!(
            namespace = %self.spec.namespace,
            current = %current,
            next = %target.label,
            "Target queued behind current motion"
        );
        let next = target.label.clone();
        match state.queued.replace(target) {
            Some(displaced) if displaced.label != next => self.supersede(state, displaced, &next),
            _ => Vec::new(),
        }
    }

    /// A queued target replaced before it ran is reported as failed so the
    /// Leader does not keep it reserved.
    fn supersede(&self, state: &mut CoordinationState, displaced: Waypoint, next: &str) -> Vec<Effect> {
        warn!(
            namespace = %self.spec.namespace,
            dropped = %displaced.label,
            next = %next,
            "Queued target superseded"
        );
        let status = NavigationStatus {
            robot_namespace: self.spec.namespace.clone(),
            status: NavigationOutcome::Error,
            error_message: format!("superseded by '{}'", next),
            time_taken: 0.0,
            current_waypoint: displaced.label,
        };
        let mut effects = vec![Effect::Publish(OutboundMessage::NavigationStatus(status.clone()))];
        if state.role == Role::Leader {
            effects.extend(self.handle_status(state, &status));
        }
        effects
    }

    /// Leader-side handling of a status report from a follower.
    pub fn on_navigation_status(&self, status: &NavigationStatus) {
        self.with_state(|this, state| this.handle_status(state, status));
    }

    fn handle_status(&self, state: &mut CoordinationState, status: &NavigationStatus) -> Vec<Effect> {
        if state.role != Role::Leader {
            return Vec::new();
        }
        let agent = status.robot_namespace.as_str();
        let label = status.current_waypoint.as_str();
        if !state.scheduler.has_slot(agent) {
            warn!(
                namespace = %self.spec.namespace,
                agent = %agent,
                label = %label,
                "Status from unknown agent ignored"
            );
            return Vec::new();
        }

        let mut effects = Vec::new();
        match status.status {
            NavigationOutcome::Reached => {
                if let Err(e) = state.scheduler.report_reached(agent, label) {
                    warn!(namespace = %self.spec.namespace, error = %e, "Ignoring arrival report");
                    return effects;
                }
                info!(
                    namespace = %self.spec.namespace,
                    agent = %agent,
                    label = %label,
                    time_taken = status.time_taken,
                    "Waypoint reached"
                );
                effects.push(Effect::Event(FleetEvent::WaypointReached {
                    observer: self.spec.namespace.clone(),
                    agent: agent.to_string(),
                    label: label.to_string(),
                    time_taken_secs: status.time_taken,
                    reached_at: Utc::now(),
                }));
                let mut outcomes = state.scheduler.drain_waiting();
                if let Ok(outcome) = state.scheduler.attempt(agent) {
                    outcomes.push((agent.to_string(), outcome));
                }
                effects.extend(self.dispatch(state, outcomes));
            }
            NavigationOutcome::Error => {
                if let Err(e) = state.scheduler.report_failed(agent, label) {
                    warn!(namespace = %self.spec.namespace, error = %e, "Ignoring failure report");
                    return effects;
                }
                error!(
                    namespace = %self.spec.namespace,
                    agent = %agent,
                    label = %label,
                    reason = %status.error_message,
                    "Navigation failed; waypoint released"
                );
                counter!("fleet_navigation_failures_total").increment(1);
                effects.push(Effect::Event(FleetEvent::NavigationFailed {
                    observer: self.spec.namespace.clone(),
                    agent: agent.to_string(),
                    label: label.to_string(),
                    reason: status.error_message.clone(),
                    failed_at: Utc::now(),
                }));
                let outcomes = state.scheduler.drain_waiting();
                effects.extend(self.dispatch(state, outcomes));
            }
        }
        effects
    }

    /// Own motion finished: publish the status and, when leading, feed it to the scheduler.
    pub fn on_motion_completed(&self, completion: MotionCompletion) {
        self.with_state(|this, state| {
            let MotionCompletion { target, result } = completion;
            if state.navigating.as_ref().map(|w| &w.label) == Some(&target.label) {
                state.navigating = None;
            }

            let status = match &result {
                Ok(report) => NavigationStatus {
                    robot_namespace: this.spec.namespace.clone(),
                    status: NavigationOutcome::Reached,
                    error_message: String::new(),
                    time_taken: report.elapsed.as_secs_f64(),
                    current_waypoint: target.label.clone(),
                },
                Err(e) => {
                    warn!(namespace = %this.spec.namespace, label = %target.label, error = %e, "Motion failed");
                    NavigationStatus {
                        robot_namespace: this.spec.namespace.clone(),
                        status: NavigationOutcome::Error,
                        error_message: e.to_string(),
                        time_taken: 0.0,
                        current_waypoint: target.label.clone(),
                    }
                }
            };

            let mut effects = vec![Effect::Publish(OutboundMessage::NavigationStatus(status.clone()))];
            if state.role == Role::Leader {
                effects.extend(this.handle_status(state, &status));
            }
            if state.navigating.is_none() {
                if let Some(next) = state.queued.take() {
                    effects.extend(this.accept_target(state, next));
                }
            }
            effects
        });
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    pub fn publish_registration(&self) {
        OutboundMessage::Registration(self.spec.namespace.clone()).publish_to(self.publisher.as_ref());
    }

    pub fn publish_heartbeat(&self) {
        let message = match self.role() {
            Role::Leader => OutboundMessage::LeaderHeartbeat(self.spec.namespace.clone()),
            Role::Follower => OutboundMessage::PeerHeartbeat(self.spec.namespace.clone()),
        };
        message.publish_to(self.publisher.as_ref());
    }

    pub fn publish_initial_position(&self) {
        let start = self.state.lock().start;
        match start {
            Some(pose) => self.initial_position_message(pose).publish_to(self.publisher.as_ref()),
            None => debug!(namespace = %self.spec.namespace, "Start position not resolved yet"),
        }
    }

    fn initial_position_message(&self, pose: Pose) -> OutboundMessage {
        OutboundMessage::InitialPosition(InitialPositionMessage {
            robot_namespace: self.spec.namespace.clone(),
            x: pose.position.x,
            y: pose.position.y,
            orientation: WireOrientation::Radians(pose.orientation),
        })
    }

    /// Leader liveness check; runs an election when the leader is dead.
    pub fn check_leader_at(&self, now: Instant) {
        self.with_state(|this, state| {
            if state.role == Role::Leader {
                return Vec::new();
            }
            let mut effects = Vec::new();
            match state.membership.check_leader(now) {
                LeaderStatus::Alive => return effects,
                LeaderStatus::Lost { silent_for } => {
                    warn!(
                        namespace = %this.spec.namespace,
                        leader = ?state.membership.leader(),
                        silent_for = ?silent_for,
                        "Leader heartbeat timed out"
                    );
                    effects.push(Effect::Event(FleetEvent::LeaderLost {
                        observer: this.spec.namespace.clone(),
                        leader: state.membership.leader().map(str::to_string),
                        lost_at: Utc::now(),
                    }));
                }
                LeaderStatus::Absent { .. } => {}
            }

            let candidates = state.membership.candidates();
            match state.election.on_leader_dead(&candidates) {
                Err(e) => error!(namespace = %this.spec.namespace, error = %e, "Election failed"),
                Ok(ElectionDecision::BecomeLeader) => {
                    if !state.activation_pending {
                        counter!("fleet_elections_total").increment(1);
                        info!(namespace = %this.spec.namespace, candidates = ?candidates, "Won election");
                    }
                    match this.activate(state) {
                        Ok(more) => effects.extend(more),
                        Err(e) => {
                            if !state.activation_pending {
                                warn!(namespace = %this.spec.namespace, error = %e, "Elected but cannot lead yet");
                            }
                            state.activation_pending = true;
                        }
                    }
                }
                Ok(ElectionDecision::AwaitLeader { winner }) => {
                    info!(namespace = %this.spec.namespace, winner = %winner, "Awaiting elected leader");
                    effects.push(Effect::Event(FleetEvent::LeaderElected {
                        observer: this.spec.namespace.clone(),
                        leader: winner,
                        candidates,
                        elected_at: Utc::now(),
                    }));
                }
                Ok(ElectionDecision::StillWaiting { winner, checks_waited }) => {
                    debug!(namespace = %this.spec.namespace, winner = %winner, checks_waited, "Still awaiting leader");
                }
            }
            effects
        });
    }

    /// Evict silent peers; the Leader re-plans when membership shrank.
    pub fn check_peers_at(&self, now: Instant) {
        self.with_state(|this, state| {
            let evicted = state.membership.evict_stale(now);
            if evicted.is_empty() {
                return Vec::new();
            }
            gauge!("fleet_live_peers").set(state.membership.peer_count() as f64);
            let mut effects: Vec<Effect> = evicted
                .into_iter()
                .map(|(peer, silent_for)| {
                    warn!(namespace = %this.spec.namespace, peer = %peer, silent_for = ?silent_for, "Peer evicted");
                    Effect::Event(FleetEvent::PeerEvicted {
                        observer: this.spec.namespace.clone(),
                        peer,
                        silent_for_ms: silent_for.as_millis() as u64,
                        evicted_at: Utc::now(),
                    })
                })
                .collect();
            if state.role == Role::Leader {
                effects.extend(this.replan(state));
            }
            effects
        });
    }

    /// Periodic self-heal while leading: republish the graph and re-plan.
    pub fn control_tick(&self) {
        self.with_state(|this, state| {
            if state.role != Role::Leader {
                return Vec::new();
            }
            let mut effects = Vec::new();
            if let Some(graph) = &state.graph {
                effects.push(Effect::Publish(OutboundMessage::RouteGraph(graph.to_message())));
            }
            effects.extend(this.replan(state));
            effects
        });
    }

    /// Take leadership now. Fails until a route graph is known.
    pub fn become_leader(&self) -> Result<(), LeaderActivationError> {
        let effects = {
            let mut state = self.state.lock();
            match self.activate(&mut state) {
                Ok(effects) => effects,
                Err(e) => {
                    state.activation_pending = true;
                    return Err(e);
                }
            }
        };
        self.apply(effects);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Leader internals
    // ------------------------------------------------------------------

    fn activate(&self, state: &mut CoordinationState) -> Result<Vec<Effect>, LeaderActivationError> {
        let Some(graph) = &state.graph else {
            return Err(LeaderActivationError::NoRouteGraph(self.spec.namespace.clone()));
        };
        let graph_message = graph.to_message();

        state.role = Role::Leader;
        state.activation_pending = false;
        state.membership.assume_leadership(Instant::now());
        state.election.on_leader_alive();
        // Reservations of the previous leader are not recoverable.
        state.scheduler.clear();

        info!(namespace = %self.spec.namespace, "Assuming leadership");
        let mut effects = vec![
            Effect::Publish(OutboundMessage::LeaderHeartbeat(self.spec.namespace.clone())),
            Effect::Publish(OutboundMessage::RouteGraph(graph_message)),
            Effect::Event(FleetEvent::LeaderElected {
                observer: self.spec.namespace.clone(),
                leader: self.spec.namespace.clone(),
                candidates: state.membership.candidates(),
                elected_at: Utc::now(),
            }),
        ];
        effects.extend(self.replan(state));
        Ok(effects)
    }

    /// Full re-plan over the current candidate set, then one assignment pass.
    fn replan(&self, state: &mut CoordinationState) -> Vec<Effect> {
        let Some(graph) = &state.graph else {
            warn!(namespace = %self.spec.namespace, "Cannot plan without a route graph");
            return Vec::new();
        };
        let agents: Vec<(String, Option<_>)> = state
            .membership
            .candidates()
            .into_iter()
            .map(|ns| {
                let start = state.membership.position_of(&ns).map(|p| p.position);
                (ns, start)
            })
            .collect();

        let plan = match plan_routes(graph, &agents) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(
                    namespace = %self.spec.namespace,
                    error = %e,
                    "Re-planning aborted; keeping previous routes"
                );
                return Vec::new();
            }
        };
        let version = graph.version().clone();

        let changed = state.scheduler.install_routes(plan.routes);
        if !changed.is_empty() {
            info!(namespace = %self.spec.namespace, changed = ?changed, "Routes installed");
        }
        let mut effects = vec![Effect::Event(FleetEvent::RoutesPlanned {
            observer: self.spec.namespace.clone(),
            version,
            agents: agents.into_iter().map(|(ns, _)| ns).collect(),
            skipped: plan.skipped.into_iter().map(|(ns, _)| ns).collect(),
            planned_at: Utc::now(),
        })];
        let outcomes = state.scheduler.run_pass();
        effects.extend(self.dispatch(state, outcomes));
        effects
    }

    /// Turn scheduler outcomes into commands, own motion and events.
    fn dispatch(
        &self,
        state: &mut CoordinationState,
        outcomes: Vec<(String, AttemptOutcome)>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        for (agent, outcome) in outcomes {
            match outcome {
                AttemptOutcome::Assigned(waypoint) => {
                    counter!("fleet_waypoints_assigned_total").increment(1);
                    info!(
                        namespace = %self.spec.namespace,
                        agent = %agent,
                        label = %waypoint.label,
                        "Waypoint assigned"
                    );
                    effects.push(Effect::Event(FleetEvent::WaypointAssigned {
                        observer: self.spec.namespace.clone(),
                        agent: agent.clone(),
                        label: waypoint.label.clone(),
                        assigned_at: Utc::now(),
                    }));
                    if agent == self.spec.namespace {
                        effects.extend(self.accept_target(state, waypoint));
                    } else {
                        effects.push(Effect::Publish(OutboundMessage::NavigationCommand {
                            namespace: agent,
                            command: NavigationCommand::from_waypoint(&waypoint),
                        }));
                    }
                }
                AttemptOutcome::Waiting { label, held_by } => {
                    counter!("fleet_agent_waits_total").increment(1);
                    info!(
                        namespace = %self.spec.namespace,
                        agent = %agent,
                        label = %label,
                        held_by = %held_by,
                        "Waypoint occupied; agent waiting"
                    );
                    effects.push(Effect::Event(FleetEvent::AgentWaiting {
                        observer: self.spec.namespace.clone(),
                        agent,
                        label,
                        held_by,
                        waiting_since: Utc::now(),
                    }));
                }
                AttemptOutcome::InFlight => {}
                AttemptOutcome::NoRoute => {
                    debug!(namespace = %self.spec.namespace, agent = %agent, "No route to assign from");
                }
            }
        }
        effects
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    /// Drive the agent until `shutdown` fires or the bus closes.
    pub async fn run(self: Arc<Self>, mut inbound: MessageReceiver, shutdown: CancellationToken) {
        let taken = self.completions_rx.lock().take();
        let Some(mut completions) = taken else {
            error!(namespace = %self.spec.namespace, "Agent loop already running");
            return;
        };

        let timing = &self.timing;
        let mut registration = ticker(timing.registration_period);
        let mut heartbeat = ticker(timing.heartbeat_period);
        let mut initial_position = ticker(timing.initial_position_period);
        let mut leader_check = ticker(timing.leader_check_period);
        let mut peer_check = ticker(timing.peer_check_period);
        let mut control = interval_at(Instant::now() + timing.control_tick, timing.control_tick);
        control.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(namespace = %self.spec.namespace, "Agent started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(namespace = %self.spec.namespace, "Agent stopping");
                    break;
                }
                received = inbound.recv() => match received {
                    Ok(envelope) => self.handle_envelope(&envelope),
                    Err(EventBusError::Lagged(n)) => {
                        warn!(namespace = %self.spec.namespace, missed = n, "Inbound messages dropped");
                    }
                    Err(EventBusError::Closed) => {
                        warn!(namespace = %self.spec.namespace, "Message bus closed");
                        break;
                    }
                    Err(EventBusError::Empty) => {}
                },
                Some(completion) = completions.recv() => self.on_motion_completed(completion),
                _ = registration.tick() => self.publish_registration(),
                _ = heartbeat.tick() => self.publish_heartbeat(),
                _ = initial_position.tick() => self.publish_initial_position(),
                _ = leader_check.tick() => self.check_leader_at(Instant::now()),
                _ = peer_check.tick() => self.check_peers_at(Instant::now()),
                _ = control.tick() => self.control_tick(),
            }
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
