// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: route graph, wire contracts, planning algorithms,
//! configuration and collaborator boundaries.

pub mod circuit;
pub mod events;
pub mod fleet_config;
pub mod graph;
pub mod messages;
pub mod motion;
pub mod partition;
