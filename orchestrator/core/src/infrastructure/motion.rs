// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Motion executors: a timed simulation and an adapter over an external
//! pose-goal action server.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::fleet_config::{MotionConfig, MotionMode};
use crate::domain::graph::Waypoint;
use crate::domain::motion::{
    MotionError, MotionExecutor, MotionReport, MotionResult, MotionStack,
};

/// Pretends to drive for a fixed duration. Labels listed in `failing_labels`
/// report failure after the same delay.
pub struct SimulatedMotion {
    duration: Duration,
    failing_labels: BTreeSet<String>,
}

impl SimulatedMotion {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            failing_labels: BTreeSet::new(),
        }
    }

    pub fn with_failures(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.failing_labels.extend(labels);
        self
    }
}

#[async_trait]
impl MotionExecutor for SimulatedMotion {
    async fn navigate(&self, target: &Waypoint) -> Result<MotionReport, MotionError> {
        let started = Instant::now();
        debug!(label = %target.label, duration = ?self.duration, "Simulating navigation");
        tokio::time::sleep(self.duration).await;

        if self.failing_labels.contains(&target.label) {
            return Err(MotionError::Failed {
                label: target.label.clone(),
                reason: "simulated obstruction".to_string(),
            });
        }
        Ok(MotionReport {
            label: target.label.clone(),
            elapsed: started.elapsed(),
        })
    }
}

/// Drives a [`MotionStack`]: wait for the server, send the goal, poll until done.
pub struct MotionStackExecutor {
    stack: Arc<dyn MotionStack>,
    server_timeout: Duration,
    poll_period: Duration,
}

impl MotionStackExecutor {
    pub fn new(stack: Arc<dyn MotionStack>, server_timeout: Duration, poll_period: Duration) -> Self {
        Self {
            stack,
            server_timeout,
            poll_period,
        }
    }
}

#[async_trait]
impl MotionExecutor for MotionStackExecutor {
    async fn navigate(&self, target: &Waypoint) -> Result<MotionReport, MotionError> {
        let started = Instant::now();
        if !self.stack.wait_for_server(self.server_timeout).await {
            warn!(timeout = ?self.server_timeout, "Motion server not available");
            return Err(MotionError::ServerUnavailable(self.server_timeout));
        }

        info!(label = %target.label, x = target.x, y = target.y, "Sending navigation goal");
        if !self.stack.send_goal(&target.pose()).await {
            return Err(MotionError::GoalRejected);
        }

        // No timeout here: a stuck goal blocks only this agent's worker.
        while !self.stack.is_complete().await {
            tokio::time::sleep(self.poll_period).await;
        }

        match self.stack.result().await {
            MotionResult::Succeeded => Ok(MotionReport {
                label: target.label.clone(),
                elapsed: started.elapsed(),
            }),
            MotionResult::Failed => Err(MotionError::Failed {
                label: target.label.clone(),
                reason: "motion stack reported failure".to_string(),
            }),
        }
    }
}

/// Build the executor selected by `config`.
pub fn build_motion_executor(
    config: &MotionConfig,
    stack: Option<Arc<dyn MotionStack>>,
) -> anyhow::Result<Arc<dyn MotionExecutor>> {
    match config.mode {
        MotionMode::Simulate => Ok(Arc::new(
            SimulatedMotion::new(config.simulated_duration)
                .with_failures(config.simulated_failure_labels.iter().cloned()),
        )),
        MotionMode::MotionStack => match stack {
            Some(stack) => Ok(Arc::new(MotionStackExecutor::new(
                stack,
                config.server_timeout,
                config.poll_period,
            ))),
            None => anyhow::bail!("motion mode 'motion-stack' requires a bound motion stack"),
        },
    }
}
