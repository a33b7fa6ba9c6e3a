// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Election Coordinator
//!
//! Deterministic, message-free leader election: the lexicographically smallest
//! live namespace wins. Every agent computes the winner locally, so agents that
//! share a candidate set agree without a round-trip.
//!
//! An agent that elected a peer waits a bounded number of leader checks for
//! that peer to start leading, then elects again. If the elected peer drops out
//! of the candidate set first, the re-run happens immediately.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElectionError {
    #[error("no election candidates")]
    NoCandidates,
}

/// Lexicographically smallest candidate.
pub fn elect(candidates: &[String]) -> Result<&str, ElectionError> {
    candidates
        .iter()
        .min()
        .map(String::as_str)
        .ok_or(ElectionError::NoCandidates)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionDecision {
    BecomeLeader,
    /// A peer won; wait for its leadership to show.
    AwaitLeader { winner: String },
    StillWaiting { winner: String, checks_waited: u32 },
}

#[derive(Debug)]
pub struct ElectionCoordinator {
    namespace: String,
    rerun_after_checks: u32,
    pending: Option<(String, u32)>,
}

impl ElectionCoordinator {
    pub fn new(namespace: impl Into<String>, rerun_after_checks: u32) -> Self {
        Self {
            namespace: namespace.into(),
            rerun_after_checks: rerun_after_checks.max(1),
            pending: None,
        }
    }

    /// Called on every leader check that finds the leader dead.
    pub fn on_leader_dead(&mut self, candidates: &[String]) -> Result<ElectionDecision, ElectionError> {
        if let Some((winner, waited)) = self.pending.take() {
            let still_candidate = candidates.contains(&winner);
            if still_candidate && waited + 1 < self.rerun_after_checks {
                self.pending = Some((winner.clone(), waited + 1));
                return Ok(ElectionDecision::StillWaiting {
                    winner,
                    checks_waited: waited + 1,
                });
            }
            tracing::warn!(
                namespace = %self.namespace,
                winner = %winner,
                still_candidate,
                "Elected leader never took over, re-running election"
            );
        }

        let winner = elect(candidates)?;
        if winner == self.namespace {
            Ok(ElectionDecision::BecomeLeader)
        } else {
            self.pending = Some((winner.to_string(), 0));
            Ok(ElectionDecision::AwaitLeader {
                winner: winner.to_string(),
            })
        }
    }

    /// A leader heartbeat arrived; any pending wait is over.
    pub fn on_leader_alive(&mut self) {
        self.pending = None;
    }

    pub fn pending_winner(&self) -> Option<&str> {
        self.pending.as_ref().map(|(w, _)| w.as_str())
    }
}
