// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # fleet-core
//!
//! Shared model of the fleet coordination protocol.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`domain::graph`] | Route graph value object, compass headings |
//! | [`domain::messages`] | Bus channels and JSON payloads |
//! | [`domain::partition`] | Voronoi partitioning into per-agent subgraphs |
//! | [`domain::circuit`] | Edge-covering circuit solver |
//! | [`domain::fleet_config`] | `FleetConfig` manifest |
//! | [`infrastructure`] | In-process message bus, event bus, motion executors |

pub mod domain;
pub mod infrastructure;

pub use domain::*;
