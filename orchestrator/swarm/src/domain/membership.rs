// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Membership & Failure Detector
//!
//! Local view of who is alive. Every heartbeat refreshes `last_seen_at`;
//! periodic checks compare silence against `heartbeat_timeout`. There is no
//! agreement step between agents, so two agents may briefly disagree on
//! membership during the timeout window.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use fleet_core::domain::graph::Pose;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => f.write_str("follower"),
            Role::Leader => f.write_str("leader"),
        }
    }
}

/// A peer as seen from this agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    pub namespace: String,
    pub last_seen_at: Instant,
    pub start_position: Option<Pose>,
    pub role: Role,
}

/// Result of a leader liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderStatus {
    Alive,
    /// The leader just crossed the timeout.
    Lost { silent_for: Duration },
    /// Still no leader since an earlier check.
    Absent { silent_for: Duration },
}

/// Peer table, position book and leader liveness for one agent.
#[derive(Debug)]
pub struct Membership {
    namespace: String,
    heartbeat_timeout: Duration,
    peers: BTreeMap<String, AgentRecord>,
    positions: BTreeMap<String, Pose>,
    leader: Option<String>,
    /// Startup time until the first leader heartbeat arrives.
    last_leader_heartbeat_at: Instant,
    believed_leader_alive: bool,
}

impl Membership {
    pub fn new(namespace: impl Into<String>, heartbeat_timeout: Duration, now: Instant) -> Self {
        Self {
            namespace: namespace.into(),
            heartbeat_timeout,
            peers: BTreeMap::new(),
            positions: BTreeMap::new(),
            leader: None,
            last_leader_heartbeat_at: now,
            believed_leader_alive: false,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Refresh a peer. Returns `true` if the peer was not known before.
    pub fn observe_peer(&mut self, namespace: &str, now: Instant) -> bool {
        if namespace == self.namespace {
            return false;
        }
        match self.peers.get_mut(namespace) {
            Some(record) => {
                record.last_seen_at = now;
                false
            }
            None => {
                self.peers.insert(
                    namespace.to_string(),
                    AgentRecord {
                        namespace: namespace.to_string(),
                        last_seen_at: now,
                        start_position: self.positions.get(namespace).copied(),
                        role: Role::Follower,
                    },
                );
                true
            }
        }
    }

    /// Record a leader heartbeat. Returns `true` if the sender is a new peer.
    pub fn observe_leader(&mut self, namespace: &str, now: Instant) -> bool {
        let joined = self.observe_peer(namespace, now);
        if self.leader.as_deref() != Some(namespace) {
            if let Some(previous) = self.leader.as_ref().and_then(|l| self.peers.get_mut(l)) {
                previous.role = Role::Follower;
            }
        }
        if let Some(record) = self.peers.get_mut(namespace) {
            record.role = Role::Leader;
        }
        self.leader = Some(namespace.to_string());
        self.last_leader_heartbeat_at = now;
        self.believed_leader_alive = true;
        joined
    }

    /// This agent took over leadership.
    pub fn assume_leadership(&mut self, now: Instant) {
        if let Some(previous) = self.leader.as_ref().and_then(|l| self.peers.get_mut(l)) {
            previous.role = Role::Follower;
        }
        self.leader = Some(self.namespace.clone());
        self.last_leader_heartbeat_at = now;
        self.believed_leader_alive = true;
    }

    pub fn check_leader(&mut self, now: Instant) -> LeaderStatus {
        let silent_for = now.saturating_duration_since(self.last_leader_heartbeat_at);
        if silent_for <= self.heartbeat_timeout {
            return LeaderStatus::Alive;
        }
        if self.believed_leader_alive {
            self.believed_leader_alive = false;
            LeaderStatus::Lost { silent_for }
        } else {
            LeaderStatus::Absent { silent_for }
        }
    }

    /// Drop every peer silent for longer than the timeout.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<(String, Duration)> {
        let timeout = self.heartbeat_timeout;
        let stale: Vec<(String, Duration)> = self
            .peers
            .values()
            .map(|r| (r.namespace.clone(), now.saturating_duration_since(r.last_seen_at)))
            .filter(|(_, silent)| *silent > timeout)
            .collect();
        for (namespace, _) in &stale {
            self.peers.remove(namespace);
        }
        stale
    }

    /// Live peers plus self, in ascending order.
    pub fn candidates(&self) -> Vec<String> {
        let mut all: Vec<String> = self.peers.keys().cloned().collect();
        all.push(self.namespace.clone());
        all.sort();
        all
    }

    pub fn record_position(&mut self, namespace: &str, pose: Pose) -> bool {
        if let Some(record) = self.peers.get_mut(namespace) {
            record.start_position = Some(pose);
        }
        self.positions.insert(namespace.to_string(), pose).is_none()
    }

    pub fn position_of(&self, namespace: &str) -> Option<Pose> {
        self.positions.get(namespace).copied()
    }

    pub fn peers(&self) -> impl Iterator<Item = &AgentRecord> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_known(&self, namespace: &str) -> bool {
        namespace == self.namespace || self.peers.contains_key(namespace)
    }

    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn believed_leader_alive(&self) -> bool {
        self.believed_leader_alive
    }
}
