// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Occupancy Scheduler
//!
//! Advisory mutual exclusion over waypoint labels. The Leader hands out one
//! target at a time per agent; a label already targeted by another agent
//! makes the requester wait instead of advancing.
//!
//! Per-agent slot states:
//!
//! | From | Event | To |
//! |------|-------|----|
//! | Idle | next label free | Assigned (cursor advances) |
//! | Idle | next label held | Waiting (cursor stays) |
//! | Waiting | re-attempt | Assigned or Waiting |
//! | Assigned | reached / failed | Idle (label released) |
//! | any | re-plan | Idle at cursor 0 (all labels released) |
//!
//! Reservations are not leased: a crashed Leader loses them and its
//! successor starts empty.

use std::collections::BTreeMap;
use thiserror::Error;

use fleet_core::domain::graph::Waypoint;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no route slot for agent '{0}'")]
    UnknownAgent(String),

    #[error("agent '{agent}' reported '{label}' but is not assigned to it")]
    UnexpectedReport { agent: String, label: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Assigned,
    Waiting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSlot {
    pub route: Vec<Waypoint>,
    /// Index of the next route entry to hand out.
    pub cursor: usize,
    pub state: SlotState,
    /// Reserved label while Assigned, wanted label while Waiting.
    pub target: Option<String>,
}

impl AgentSlot {
    fn new(route: Vec<Waypoint>) -> Self {
        Self {
            route,
            cursor: 0,
            state: SlotState::Idle,
            target: None,
        }
    }

    pub fn route_labels(&self) -> Vec<&str> {
        self.route.iter().map(|w| w.label.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Assigned(Waypoint),
    Waiting { label: String, held_by: String },
    /// The agent already has a target in flight.
    InFlight,
    /// The agent has no route this cycle.
    NoRoute,
}

#[derive(Debug, Default)]
pub struct OccupancyScheduler {
    slots: BTreeMap<String, AgentSlot>,
    /// label -> agent holding it
    occupied: BTreeMap<String, String>,
}

impl OccupancyScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every agent's route. Returns the agents whose route changed.
    ///
    /// Every slot restarts at cursor 0 in Idle and all reservations are
    /// dropped, whether or not the route changed. A target lost in transit is
    /// therefore re-issued by the next pass. Agents absent from `routes` lose
    /// their slot.
    pub fn install_routes(&mut self, routes: BTreeMap<String, Vec<Waypoint>>) -> Vec<String> {
        let changed = routes
            .iter()
            .filter(|(ns, route)| self.slots.get(*ns).map(|slot| &slot.route) != Some(*route))
            .map(|(ns, _)| ns.clone())
            .collect();

        self.occupied.clear();
        self.slots = routes
            .into_iter()
            .map(|(ns, route)| (ns, AgentSlot::new(route)))
            .collect();
        changed
    }

    /// Try to hand `namespace` its next route entry.
    pub fn attempt(&mut self, namespace: &str) -> Result<AttemptOutcome, SchedulerError> {
        let slot = self
            .slots
            .get_mut(namespace)
            .ok_or_else(|| SchedulerError::UnknownAgent(namespace.to_string()))?;

        if slot.state == SlotState::Assigned {
            return Ok(AttemptOutcome::InFlight);
        }
        if slot.route.is_empty() {
            return Ok(AttemptOutcome::NoRoute);
        }

        let index = slot.cursor % slot.route.len();
        let waypoint = slot.route[index].clone();
        if let Some(holder) = self.occupied.get(&waypoint.label) {
            if holder != namespace {
                slot.state = SlotState::Waiting;
                slot.target = Some(waypoint.label.clone());
                return Ok(AttemptOutcome::Waiting {
                    label: waypoint.label,
                    held_by: holder.clone(),
                });
            }
        }

        self.occupied
            .insert(waypoint.label.clone(), namespace.to_string());
        slot.cursor = (index + 1) % slot.route.len();
        slot.state = SlotState::Assigned;
        slot.target = Some(waypoint.label.clone());
        Ok(AttemptOutcome::Assigned(waypoint))
    }

    /// Waiting agents first, then idle ones, each in ascending namespace order.
    pub fn run_pass(&mut self) -> Vec<(String, AttemptOutcome)> {
        let mut outcomes = self.drain_waiting();
        let idle: Vec<String> = self.agents_in(SlotState::Idle);
        for namespace in idle {
            if let Ok(outcome) = self.attempt(&namespace) {
                outcomes.push((namespace, outcome));
            }
        }
        outcomes
    }

    /// Re-attempt every waiting agent in ascending namespace order.
    pub fn drain_waiting(&mut self) -> Vec<(String, AttemptOutcome)> {
        let waiting = self.agents_in(SlotState::Waiting);
        let mut outcomes = Vec::with_capacity(waiting.len());
        for namespace in waiting {
            if let Ok(outcome) = self.attempt(&namespace) {
                outcomes.push((namespace, outcome));
            }
        }
        outcomes
    }

    fn agents_in(&self, state: SlotState) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.state == state)
            .map(|(ns, _)| ns.clone())
            .collect()
    }

    /// Arrival at `label`: release it and return the slot to Idle.
    pub fn report_reached(&mut self, namespace: &str, label: &str) -> Result<(), SchedulerError> {
        self.complete(namespace, label)
    }

    /// Failed motion: release the label as well so it never stays stuck.
    pub fn report_failed(&mut self, namespace: &str, label: &str) -> Result<(), SchedulerError> {
        self.complete(namespace, label)
    }

    fn complete(&mut self, namespace: &str, label: &str) -> Result<(), SchedulerError> {
        let slot = self
            .slots
            .get_mut(namespace)
            .ok_or_else(|| SchedulerError::UnknownAgent(namespace.to_string()))?;
        if slot.state != SlotState::Assigned || slot.target.as_deref() != Some(label) {
            return Err(SchedulerError::UnexpectedReport {
                agent: namespace.to_string(),
                label: label.to_string(),
            });
        }
        slot.state = SlotState::Idle;
        slot.target = None;
        if self.occupied.get(label).map(String::as_str) == Some(namespace) {
            self.occupied.remove(label);
        }
        Ok(())
    }

    pub fn holder_of(&self, label: &str) -> Option<&str> {
        self.occupied.get(label).map(String::as_str)
    }

    pub fn occupied(&self) -> &BTreeMap<String, String> {
        &self.occupied
    }

    pub fn slot(&self, namespace: &str) -> Option<&AgentSlot> {
        self.slots.get(namespace)
    }

    pub fn slots(&self) -> &BTreeMap<String, AgentSlot> {
        &self.slots
    }

    pub fn has_slot(&self, namespace: &str) -> bool {
        self.slots.contains_key(namespace)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.occupied.clear();
    }

    /// Every reservation belongs to an Assigned slot targeting it, and vice versa.
    pub fn is_consistent(&self) -> bool {
        let reservations_match = self.occupied.iter().all(|(label, holder)| {
            self.slots.get(holder).is_some_and(|slot| {
                slot.state == SlotState::Assigned && slot.target.as_deref() == Some(label)
            })
        });
        let slots_match = self.slots.iter().all(|(ns, slot)| match slot.state {
            SlotState::Assigned => slot
                .target
                .as_ref()
                .is_some_and(|label| self.holder_of(label) == Some(ns.as_str())),
            _ => true,
        });
        reservations_match && slots_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(labels: &[&str]) -> Vec<Waypoint> {
        labels
            .iter()
            .enumerate()
            .map(|(i, l)| Waypoint::new(*l, i as f64, 0.0, 0.0))
            .collect()
    }

    fn routes(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<Waypoint>> {
        entries
            .iter()
            .map(|(ns, labels)| (ns.to_string(), route(labels)))
            .collect()
    }

    fn label(outcome: &AttemptOutcome) -> &str {
        match outcome {
            AttemptOutcome::Assigned(w) => &w.label,
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_assign_advances_cursor_with_wrap() {
        let mut s = OccupancyScheduler::new();
        s.install_routes(routes(&[("robotA", &["A", "B"])]));

        assert_eq!(label(&s.attempt("robotA").unwrap()), "A");
        assert_eq!(s.attempt("robotA").unwrap(), AttemptOutcome::InFlight);
        s.report_reached("robotA", "A").unwrap();
        assert_eq!(label(&s.attempt("robotA").unwrap()), "B");
        s.report_reached("robotA", "B").unwrap();
        assert_eq!(label(&s.attempt("robotA").unwrap()), "A");
        assert!(s.is_consistent());
    }

    #[test]
    fn test_occupied_label_makes_agent_wait() {
        let mut s = OccupancyScheduler::new();
        s.install_routes(routes(&[("robotA", &["X", "Y"]), ("robotB", &["X", "Z"])]));

        let outcomes = s.run_pass();
        assert_eq!(label(&outcomes[0].1), "X");
        assert_eq!(
            outcomes[1],
            (
                "robotB".to_string(),
                AttemptOutcome::Waiting {
                    label: "X".to_string(),
                    held_by: "robotA".to_string()
                }
            )
        );
        assert_eq!(s.slot("robotB").unwrap().cursor, 0);
        assert_eq!(s.holder_of("X"), Some("robotA"));
        assert!(s.is_consistent());

        // Arrival frees X and the waiter takes it in the same drain.
        s.report_reached("robotA", "X").unwrap();
        let drained = s.drain_waiting();
        assert_eq!(drained.len(), 1);
        assert_eq!(label(&drained[0].1), "X");
        assert_eq!(s.holder_of("X"), Some("robotB"));
        assert!(s.is_consistent());
    }

    #[test]
    fn test_failure_releases_label() {
        let mut s = OccupancyScheduler::new();
        s.install_routes(routes(&[("robotA", &["X", "Y"])]));
        s.attempt("robotA").unwrap();
        s.report_failed("robotA", "X").unwrap();
        assert_eq!(s.holder_of("X"), None);
        assert_eq!(s.slot("robotA").unwrap().state, SlotState::Idle);
        // The failed target is not re-issued; the cursor already moved on.
        assert_eq!(label(&s.attempt("robotA").unwrap()), "Y");
    }

    #[test]
    fn test_unexpected_reports_are_rejected_without_change() {
        let mut s = OccupancyScheduler::new();
        s.install_routes(routes(&[("robotA", &["X"])]));
        s.attempt("robotA").unwrap();

        assert_eq!(
            s.report_reached("robotA", "Q"),
            Err(SchedulerError::UnexpectedReport {
                agent: "robotA".to_string(),
                label: "Q".to_string()
            })
        );
        assert_eq!(
            s.report_reached("ghost", "X"),
            Err(SchedulerError::UnknownAgent("ghost".to_string()))
        );
        assert_eq!(s.holder_of("X"), Some("robotA"));
    }

    #[test]
    fn test_replan_resets_every_slot() {
        let mut s = OccupancyScheduler::new();
        s.install_routes(routes(&[("robotA", &["A", "B"]), ("robotB", &["C", "D"])]));
        s.run_pass();
        s.report_reached("robotB", "C").unwrap();
        s.attempt("robotB").unwrap();
        assert_eq!(s.holder_of("D"), Some("robotB"));

        let changed = s.install_routes(routes(&[("robotA", &["A", "E"]), ("robotB", &["C", "D"])]));
        assert_eq!(changed, vec!["robotA"]);
        assert!(s.occupied().is_empty());
        for slot in s.slots().values() {
            assert_eq!(slot.cursor, 0);
            assert_eq!(slot.state, SlotState::Idle);
            assert_eq!(slot.target, None);
        }

        // The next pass hands out every route head again, unchanged routes included.
        let outcomes = s.run_pass();
        assert_eq!(label(&outcomes[0].1), "A");
        assert_eq!(label(&outcomes[1].1), "C");
        assert!(s.is_consistent());
    }

    #[test]
    fn test_removed_agent_releases_reservation() {
        let mut s = OccupancyScheduler::new();
        s.install_routes(routes(&[("robotA", &["X"]), ("robotB", &["X"])]));
        s.run_pass();
        assert_eq!(s.holder_of("X"), Some("robotA"));

        s.install_routes(routes(&[("robotB", &["X"])]));
        assert_eq!(s.holder_of("X"), None);
        assert_eq!(label(&s.run_pass()[0].1), "X");
        assert!(s.is_consistent());
    }

    #[test]
    fn test_empty_route_has_nothing_to_assign() {
        let mut s = OccupancyScheduler::new();
        s.install_routes(routes(&[("robotA", &[])]));
        assert_eq!(s.attempt("robotA").unwrap(), AttemptOutcome::NoRoute);
        assert!(s.occupied().is_empty());
    }
}
