// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `fleet-swarm`: Leaderless Fleet Coordination
//!
//! Every robot runs the same [`FleetAgent`](application::FleetAgent). Agents
//! detect each other through heartbeats, elect the smallest live namespace as
//! leader, and the leader hands out waypoints so that no two robots ever hold
//! the same one.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | Membership, election, occupancy scheduler |
//! | [`application`] | Application | Route planner, `FleetAgent` |
//!
//! ## Key Concepts
//!
//! - **Leader**: the agent that partitions the route graph and arbitrates
//!   waypoint occupancy. There is exactly one per converged fleet.
//! - **Occupancy**: a waypoint is held by at most one agent, from assignment
//!   until that agent reports arrival or failure.
//! - **Re-planning**: any membership or graph change on the leader triggers a
//!   full partition-and-route pass.

pub mod application;
pub mod domain;

pub use application::*;
pub use domain::*;
