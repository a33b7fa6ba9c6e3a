// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::graph::GraphVersion;

/// Fleet coordination events.
///
/// Every event carries the namespace of the agent that observed it
/// (`observer`), so a fleet-wide subscriber can tell the vantage points apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FleetEvent {
    PeerJoined {
        observer: String,
        peer: String,
        joined_at: DateTime<Utc>,
    },
    PeerEvicted {
        observer: String,
        peer: String,
        silent_for_ms: u64,
        evicted_at: DateTime<Utc>,
    },
    LeaderLost {
        observer: String,
        leader: Option<String>,
        lost_at: DateTime<Utc>,
    },
    LeaderElected {
        observer: String,
        leader: String,
        candidates: Vec<String>,
        elected_at: DateTime<Utc>,
    },
    SteppedDown {
        observer: String,
        in_favour_of: String,
        stepped_down_at: DateTime<Utc>,
    },
    GraphUpdated {
        observer: String,
        version: GraphVersion,
        nodes: usize,
        edges: usize,
        updated_at: DateTime<Utc>,
    },
    RoutesPlanned {
        observer: String,
        version: GraphVersion,
        agents: Vec<String>,
        skipped: Vec<String>,
        planned_at: DateTime<Utc>,
    },
    WaypointAssigned {
        observer: String,
        agent: String,
        label: String,
        assigned_at: DateTime<Utc>,
    },
    AgentWaiting {
        observer: String,
        agent: String,
        label: String,
        held_by: String,
        waiting_since: DateTime<Utc>,
    },
    WaypointReached {
        observer: String,
        agent: String,
        label: String,
        time_taken_secs: f64,
        reached_at: DateTime<Utc>,
    },
    NavigationFailed {
        observer: String,
        agent: String,
        label: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl FleetEvent {
    /// Namespace of the agent that emitted the event.
    pub fn observer(&self) -> &str {
        match self {
            FleetEvent::PeerJoined { observer, .. }
            | FleetEvent::PeerEvicted { observer, .. }
            | FleetEvent::LeaderLost { observer, .. }
            | FleetEvent::LeaderElected { observer, .. }
            | FleetEvent::SteppedDown { observer, .. }
            | FleetEvent::GraphUpdated { observer, .. }
            | FleetEvent::RoutesPlanned { observer, .. }
            | FleetEvent::WaypointAssigned { observer, .. }
            | FleetEvent::AgentWaiting { observer, .. }
            | FleetEvent::WaypointReached { observer, .. }
            | FleetEvent::NavigationFailed { observer, .. } => observer,
        }
    }

    /// The agent an assignment-related event is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            FleetEvent::WaypointAssigned { agent, .. }
            | FleetEvent::AgentWaiting { agent, .. }
            | FleetEvent::WaypointReached { agent, .. }
            | FleetEvent::NavigationFailed { agent, .. } => Some(agent),
            FleetEvent::PeerJoined { peer, .. } | FleetEvent::PeerEvicted { peer, .. } => {
                Some(peer)
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FleetEvent::PeerJoined { .. } => "peer_joined",
            FleetEvent::PeerEvicted { .. } => "peer_evicted",
            FleetEvent::LeaderLost { .. } => "leader_lost",
            FleetEvent::LeaderElected { .. } => "leader_elected",
            FleetEvent::SteppedDown { .. } => "stepped_down",
            FleetEvent::GraphUpdated { .. } => "graph_updated",
            FleetEvent::RoutesPlanned { .. } => "routes_planned",
            FleetEvent::WaypointAssigned { .. } => "waypoint_assigned",
            FleetEvent::AgentWaiting { .. } => "agent_waiting",
            FleetEvent::WaypointReached { .. } => "waypoint_reached",
            FleetEvent::NavigationFailed { .. } => "navigation_failed",
        }
    }
}
