// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Fleet Wire Contracts
//!
//! Message shapes exchanged over the publish/subscribe bus. Payloads are
//! text; structured payloads are JSON, liveness payloads are the bare sender
//! namespace. The transport itself is not part of this crate: anything that can
//! deliver `(Channel, String)` pairs implements [`MessagePublisher`].
//!
//! | Channel | Payload |
//! |---------|---------|
//! | `/registration` | namespace |
//! | `/initial_positions` | [`InitialPositionMessage`] |
//! | `/leader_heartbeat` | namespace |
//! | `/peer_heartbeat` | namespace |
//! | `/navigation_graph` | [`RouteGraphMessage`] |
//! | `/<ns>/navigation_commands` | [`NavigationCommand`] |
//! | `/navigation_status` | [`NavigationStatus`] |

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::graph::{
    compass_to_radians, Compass, GraphError, Pose, RouteGraph, Waypoint, DEFAULT_EDGE_WEIGHT,
};

/// Well-known bus channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Registration,
    InitialPosition,
    LeaderHeartbeat,
    PeerHeartbeat,
    RouteGraph,
    /// Per-agent command channel, keyed by the receiving namespace.
    NavigationCommand(String),
    NavigationStatus,
}

impl Channel {
    pub fn name(&self) -> String {
        match self {
            Channel::Registration => "/registration".to_string(),
            Channel::InitialPosition => "/initial_positions".to_string(),
            Channel::LeaderHeartbeat => "/leader_heartbeat".to_string(),
            Channel::PeerHeartbeat => "/peer_heartbeat".to_string(),
            Channel::RouteGraph => "/navigation_graph".to_string(),
            Channel::NavigationCommand(ns) => format!("/{}/navigation_commands", ns),
            Channel::NavigationStatus => "/navigation_status".to_string(),
        }
    }

    /// Channels every agent listens to, plus its own command channel.
    pub fn agent_subscriptions(namespace: &str) -> Vec<Channel> {
        vec![
            Channel::Registration,
            Channel::InitialPosition,
            Channel::LeaderHeartbeat,
            Channel::PeerHeartbeat,
            Channel::RouteGraph,
            Channel::NavigationCommand(namespace.to_string()),
            Channel::NavigationStatus,
        ]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Outbound side of the bus transport.
pub trait MessagePublisher: Send + Sync {
    fn publish(&self, channel: Channel, payload: String);
}

/// Orientation as it appears on the wire: radians or a compass string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireOrientation {
    Radians(f64),
    Compass(String),
}

impl WireOrientation {
    pub fn to_radians(&self) -> f64 {
        match self {
            WireOrientation::Radians(r) if r.is_finite() => *r,
            WireOrientation::Radians(_) => 0.0,
            WireOrientation::Compass(s) => compass_to_radians(s),
        }
    }
}

impl Default for WireOrientation {
    fn default() -> Self {
        WireOrientation::Radians(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialPositionMessage {
    pub robot_namespace: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub orientation: WireOrientation,
}

impl InitialPositionMessage {
    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.orientation.to_radians())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireNode {
    pub label: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub orientation: WireOrientation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEdge {
    pub from: String,
    pub to: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    DEFAULT_EDGE_WEIGHT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteGraphMessage {
    pub nodes: Vec<WireNode>,
    #[serde(default)]
    pub edges: Vec<WireEdge>,
}

/// One target waypoint sent by the Leader to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationCommand {
    pub label: String,
    pub x: f64,
    pub y: f64,
    /// Compass string (`NORTH`, `EAST`, `SOUTH`, `WEST`).
    pub orientation: String,
}

impl NavigationCommand {
    pub fn from_waypoint(waypoint: &Waypoint) -> Self {
        Self {
            label: waypoint.label.clone(),
            x: waypoint.x,
            y: waypoint.y,
            orientation: Compass::from_radians(waypoint.orientation).as_str().to_string(),
        }
    }

    pub fn to_waypoint(&self) -> Waypoint {
        Waypoint::new(
            self.label.clone(),
            self.x,
            self.y,
            compass_to_radians(&self.orientation),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationOutcome {
    Reached,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationStatus {
    pub robot_namespace: String,
    pub status: NavigationOutcome,
    #[serde(default)]
    pub error_message: String,
    /// Seconds spent on the motion.
    pub time_taken: f64,
    pub current_waypoint: String,
}

#[derive(Debug, Error)]
pub enum MessageDecodeError {
    #[error("malformed payload on {channel}: {source}")]
    Json {
        channel: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("empty namespace on {0}")]
    EmptyNamespace(String),

    #[error("invalid route graph: {0}")]
    InvalidGraph(#[from] GraphError),
}

/// A decoded inbound message.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Registration(String),
    InitialPosition(InitialPositionMessage),
    LeaderHeartbeat(String),
    PeerHeartbeat(String),
    RouteGraph(RouteGraph),
    NavigationCommand {
        namespace: String,
        command: NavigationCommand,
    },
    NavigationStatus(NavigationStatus),
}

impl InboundMessage {
    pub fn decode(channel: &Channel, payload: &str) -> Result<Self, MessageDecodeError> {
        let message = match channel {
            Channel::Registration => InboundMessage::Registration(decode_namespace(channel, payload)?),
            Channel::LeaderHeartbeat => {
                InboundMessage::LeaderHeartbeat(decode_namespace(channel, payload)?)
            }
            Channel::PeerHeartbeat => {
                InboundMessage::PeerHeartbeat(decode_namespace(channel, payload)?)
            }
            Channel::InitialPosition => {
                let message: InitialPositionMessage = decode_json(channel, payload)?;
                if message.robot_namespace.trim().is_empty() {
                    return Err(MessageDecodeError::EmptyNamespace(channel.name()));
                }
                InboundMessage::InitialPosition(message)
            }
            Channel::RouteGraph => {
                let message: RouteGraphMessage = decode_json(channel, payload)?;
                InboundMessage::RouteGraph(RouteGraph::from_message(message)?)
            }
            Channel::NavigationCommand(ns) => InboundMessage::NavigationCommand {
                namespace: ns.clone(),
                command: decode_json(channel, payload)?,
            },
            Channel::NavigationStatus => {
                let status: NavigationStatus = decode_json(channel, payload)?;
                if status.robot_namespace.trim().is_empty() {
                    return Err(MessageDecodeError::EmptyNamespace(channel.name()));
                }
                InboundMessage::NavigationStatus(status)
            }
        };
        Ok(message)
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(
    channel: &Channel,
    payload: &str,
) -> Result<T, MessageDecodeError> {
    serde_json::from_str(payload).map_err(|source| MessageDecodeError::Json {
        channel: channel.name(),
        source,
    })
}

/// Liveness payloads are a bare namespace; a JSON string is accepted too.
fn decode_namespace(channel: &Channel, payload: &str) -> Result<String, MessageDecodeError> {
    let trimmed = payload.trim();
    let namespace = if trimmed.starts_with('"') {
        decode_json::<String>(channel, trimmed)?.trim().to_string()
    } else {
        trimmed.to_string()
    };
    if namespace.is_empty() {
        return Err(MessageDecodeError::EmptyNamespace(channel.name()));
    }
    Ok(namespace)
}

/// A message ready to be encoded and published.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Registration(String),
    InitialPosition(InitialPositionMessage),
    LeaderHeartbeat(String),
    PeerHeartbeat(String),
    RouteGraph(RouteGraphMessage),
    NavigationCommand {
        namespace: String,
        command: NavigationCommand,
    },
    NavigationStatus(NavigationStatus),
}

impl OutboundMessage {
    pub fn channel(&self) -> Channel {
        match self {
            OutboundMessage::Registration(_) => Channel::Registration,
            OutboundMessage::InitialPosition(_) => Channel::InitialPosition,
            OutboundMessage::LeaderHeartbeat(_) => Channel::LeaderHeartbeat,
            OutboundMessage::PeerHeartbeat(_) => Channel::PeerHeartbeat,
            OutboundMessage::RouteGraph(_) => Channel::RouteGraph,
            OutboundMessage::NavigationCommand { namespace, .. } => {
                Channel::NavigationCommand(namespace.clone())
            }
            OutboundMessage::NavigationStatus(_) => Channel::NavigationStatus,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundMessage::Registration(ns)
            | OutboundMessage::LeaderHeartbeat(ns)
            | OutboundMessage::PeerHeartbeat(ns) => Ok(ns.clone()),
            OutboundMessage::InitialPosition(m) => serde_json::to_string(m),
            OutboundMessage::RouteGraph(m) => serde_json::to_string(m),
            OutboundMessage::NavigationCommand { command, .. } => serde_json::to_string(command),
            OutboundMessage::NavigationStatus(m) => serde_json::to_string(m),
        }
    }

    /// Encode and hand to `publisher`; encoding failures are logged and dropped.
    pub fn publish_to(&self, publisher: &dyn MessagePublisher) {
        let channel = self.channel();
        match self.encode() {
            Ok(payload) => publisher.publish(channel, payload),
            Err(e) => tracing::error!(channel = %channel, error = %e, "Failed to encode outbound message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_decode_heartbeat_accepts_bare_and_json_namespace() {
        let bare = InboundMessage::decode(&Channel::PeerHeartbeat, " robotA \n").unwrap();
        assert!(matches!(bare, InboundMessage::PeerHeartbeat(ns) if ns == "robotA"));

        let quoted = InboundMessage::decode(&Channel::Registration, "\"robotB\"").unwrap();
        assert!(matches!(quoted, InboundMessage::Registration(ns) if ns == "robotB"));

        let empty = InboundMessage::decode(&Channel::LeaderHeartbeat, "   ");
        assert!(matches!(empty, Err(MessageDecodeError::EmptyNamespace(_))));
    }

    #[test]
    fn test_decode_route_graph_applies_defaults() {
        let payload = r#"{
            "nodes": [
                {"label": "A", "x": 0.0, "y": 0.0},
                {"label": "B", "x": 1.0, "y": 0.0, "orientation": "WEST"}
            ],
            "edges": [{"from": "A", "to": "B"}]
        }"#;
        let decoded = InboundMessage::decode(&Channel::RouteGraph, payload).unwrap();
        let InboundMessage::RouteGraph(graph) = decoded else {
            panic!("expected route graph");
        };
        assert_eq!(graph.edges()[0].weight, 1.0);
        assert_eq!(graph.node("A").unwrap().orientation, 0.0);
        assert_eq!(graph.node("B").unwrap().orientation, FRAC_PI_2);
    }

    #[test]
    fn test_decode_route_graph_rejects_dangling_edge() {
        let payload = r#"{"nodes": [{"label": "A", "x": 0, "y": 0}], "edges": [{"from": "A", "to": "Q"}]}"#;
        let err = InboundMessage::decode(&Channel::RouteGraph, payload).unwrap_err();
        assert!(matches!(err, MessageDecodeError::InvalidGraph(_)));
    }

    #[test]
    fn test_decode_malformed_status() {
        let err = InboundMessage::decode(&Channel::NavigationStatus, "{not json").unwrap_err();
        assert!(matches!(err, MessageDecodeError::Json { .. }));

        let missing_field = r#"{"robot_namespace": "robotA", "status": "reached"}"#;
        assert!(InboundMessage::decode(&Channel::NavigationStatus, missing_field).is_err());

        let bad_status = r#"{"robot_namespace": "robotA", "status": "lost", "time_taken": 1.0, "current_waypoint": "X"}"#;
        assert!(InboundMessage::decode(&Channel::NavigationStatus, bad_status).is_err());
    }

    #[test]
    fn test_initial_position_orientation_forms() {
        let compass: InitialPositionMessage = serde_json::from_str(
            r#"{"robot_namespace": "r", "x": 1, "y": 2, "orientation": "EAST"}"#,
        )
        .unwrap();
        assert_eq!(compass.pose().orientation, -FRAC_PI_2);

        let radians: InitialPositionMessage = serde_json::from_str(
            r#"{"robot_namespace": "r", "x": 1, "y": 2, "orientation": 0.5}"#,
        )
        .unwrap();
        assert_eq!(radians.pose().orientation, 0.5);
    }

    #[test]
    fn test_navigation_command_uses_compass_strings() {
        let waypoint = Waypoint::new("X", 3.0, 4.0, FRAC_PI_2);
        let command = NavigationCommand::from_waypoint(&waypoint);
        assert_eq!(command.orientation, "WEST");

        let outbound = OutboundMessage::NavigationCommand {
            namespace: "robotB".to_string(),
            command,
        };
        assert_eq!(outbound.channel().name(), "/robotB/navigation_commands");
        let json: serde_json::Value = serde_json::from_str(&outbound.encode().unwrap()).unwrap();
        assert_eq!(json["label"], "X");
        assert_eq!(json["orientation"], "WEST");
    }
}
