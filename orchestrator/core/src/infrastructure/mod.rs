// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod message_bus;
pub mod motion;

pub use event_bus::{EventBus, EventBusError, EventReceiver};
pub use message_bus::{Envelope, MessageBus, MessageReceiver};
