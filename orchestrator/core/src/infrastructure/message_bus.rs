// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Message Bus Implementation - In-process transport for the fleet protocol
//
// Carries encoded payloads between agents hosted in the same process
// (simulator, tests). Delivery is at-most-once and unacknowledged, like the
// networked bus it stands in for: a receiver that falls behind loses messages.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::domain::messages::{Channel, MessagePublisher};
use crate::infrastructure::event_bus::EventBusError;

/// One published message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel: Channel,
    pub payload: String,
}

#[derive(Clone)]
pub struct MessageBus {
    sender: Arc<broadcast::Sender<Envelope>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Subscribe to a set of channels.
    pub fn subscribe(&self, channels: impl IntoIterator<Item = Channel>) -> MessageReceiver {
        MessageReceiver {
            receiver: self.sender.subscribe(),
            channels: channels.into_iter().collect(),
        }
    }

    /// Subscribe to every channel.
    pub fn subscribe_all(&self) -> MessageReceiver {
        MessageReceiver {
            receiver: self.sender.subscribe(),
            channels: BTreeSet::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl MessagePublisher for MessageBus {
    fn publish(&self, channel: Channel, payload: String) {
        trace!(channel = %channel, "Publishing message");
        // No subscribers is not an error on a pub/sub bus.
        let _ = self.sender.send(Envelope { channel, payload });
    }
}

pub struct MessageReceiver {
    receiver: broadcast::Receiver<Envelope>,
    /// Empty means all channels.
    channels: BTreeSet<Channel>,
}

impl MessageReceiver {
    fn wants(&self, channel: &Channel) -> bool {
        self.channels.is_empty() || self.channels.contains(channel)
    }

    /// Next message on a subscribed channel.
    pub async fn recv(&mut self) -> Result<Envelope, EventBusError> {
        loop {
            let envelope = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Message receiver lagged by {} messages", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if self.wants(&envelope.channel) {
                return Ok(envelope);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<Envelope, EventBusError> {
        loop {
            let envelope = self.receiver.try_recv().map_err(|e| match e {
                broadcast::error::TryRecvError::Empty => EventBusError::Empty,
                broadcast::error::TryRecvError::Closed => EventBusError::Closed,
                broadcast::error::TryRecvError::Lagged(n) => EventBusError::Lagged(n),
            })?;
            if self.wants(&envelope.channel) {
                return Ok(envelope);
            }
        }
    }

    /// Drain everything currently buffered on subscribed channels.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        loop {
            match self.try_recv() {
                Ok(envelope) => out.push(envelope),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }
}
