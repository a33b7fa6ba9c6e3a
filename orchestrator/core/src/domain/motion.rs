// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::graph::{Pose, Waypoint};

/// Terminal result code reported by a motion stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionResult {
    Succeeded,
    Failed,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    #[error("Motion server not available after {0:?}")]
    ServerUnavailable(Duration),
    #[error("Goal rejected by motion server")]
    GoalRejected,
    #[error("Navigation to {label} failed: {reason}")]
    Failed { label: String, reason: String },
}

/// Successful arrival at a waypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionReport {
    pub label: String,
    pub elapsed: Duration,
}

/// Drives the robot to one waypoint and blocks until it arrives or fails.
///
/// Runs on a dedicated worker so a long motion never stalls heartbeat or
/// election processing. There is no cancellation channel.
#[async_trait]
pub trait MotionExecutor: Send + Sync {
    async fn navigate(&self, target: &Waypoint) -> Result<MotionReport, MotionError>;
}

/// Boundary of an external pose-goal action server.
#[async_trait]
pub trait MotionStack: Send + Sync {
    /// Wait up to `timeout` for the server; `false` if it never appeared.
    async fn wait_for_server(&self, timeout: Duration) -> bool;
    /// Submit a goal; `false` if rejected.
    async fn send_goal(&self, goal: &Pose) -> bool;
    async fn is_complete(&self) -> bool;
    async fn result(&self) -> MotionResult;
}
