// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Domain Layer
//!
//! Pure, synchronous state for one agent. No I/O and no clocks of its own;
//! callers pass the current instant in.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`membership`] | `Membership`, `Role`, `LeaderStatus` |
//! | [`election`] | `ElectionCoordinator`, `elect` |
//! | [`occupancy`] | `OccupancyScheduler`, `AgentSlot` |

pub mod election;
pub mod membership;
pub mod occupancy;

pub use election::{elect, ElectionCoordinator, ElectionDecision, ElectionError};
pub use membership::{AgentRecord, LeaderStatus, Membership, Role};
pub use occupancy::{AgentSlot, AttemptOutcome, OccupancyScheduler, SchedulerError, SlotState};
