// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application layer: route planning and the per-agent role state machine.

pub mod agent;
pub mod planner;

pub use agent::{AgentSnapshot, FleetAgent, LeaderActivationError, MotionCompletion};
pub use planner::{plan_routes, RoutePlan};
