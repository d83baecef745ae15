//! Effect event bus.
//!
//! The engine publishes lifecycle events here for messaging, UI and
//! logging consumers. Publishing never blocks; when the channel is full the
//! event is dropped.

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;

use crate::clock::GameTime;
use crate::effect::{EffectTag, ExpireReason};
use crate::registry::RejectReason;
use aegis_common::{EffectId, EntityId};

/// Lifecycle events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EffectEvent {
    /// An instance became active.
    Started {
        /// Target entity
        target: EntityId,
        /// Instance
        effect: EffectId,
        /// Effect type
        tag: EffectTag,
        /// Rebuilt from a save
        restored: bool,
        /// Logical time
        at: GameTime,
    },
    /// A pulsing instance pulsed.
    Pulsed {
        /// Target entity
        target: EntityId,
        /// Instance
        effect: EffectId,
        /// Logical time
        at: GameTime,
    },
    /// An instance was removed.
    Expired {
        /// Target entity
        target: EntityId,
        /// Instance
        effect: EffectId,
        /// Effect type
        tag: EffectTag,
        /// Why it ended
        reason: ExpireReason,
        /// Whether messaging should be skipped
        silent: bool,
        /// Logical time
        at: GameTime,
    },
    /// An application was refused.
    Rejected {
        /// Target entity
        target: EntityId,
        /// Effect type
        tag: EffectTag,
        /// Why
        reason: RejectReason,
    },
    /// An immunity window closed.
    ImmunityEnded {
        /// Target entity
        target: EntityId,
        /// Instance whose expiry granted the immunity
        effect: EffectId,
        /// Logical time
        at: GameTime,
    },
}

impl EffectEvent {
    /// Entity the event concerns.
    #[must_use]
    pub fn target(&self) -> EntityId {
        match self {
            Self::Started { target, .. }
            | Self::Pulsed { target, .. }
            | Self::Expired { target, .. }
            | Self::Rejected { target, .. }
            | Self::ImmunityEnded { target, .. } => *target,
        }
    }
}

/// Bounded multi-producer event channel.
#[derive(Debug)]
pub struct EventBus {
    sender: Sender<EffectEvent>,
    receiver: Receiver<EffectEvent>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    /// Creates a new event bus with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Publishes an event, dropping it if the bus is full.
    pub fn publish(&self, event: EffectEvent) {
        let _ = self.sender.try_send(event);
    }

    /// Drains all pending events.
    pub fn drain(&self) -> Vec<EffectEvent> {
        self.receiver.try_iter().collect()
    }

    /// Drains pending events into each handler, in order. Returns the
    /// number of events dispatched.
    pub fn dispatch(&self, handlers: &[&dyn EffectEventHandler]) -> usize {
        let mut count = 0;
        for event in self.receiver.try_iter() {
            for handler in handlers {
                handler.handle(&event);
            }
            count += 1;
        }
        count
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Returns the channel capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Creates a new sender handle for publishing events.
    #[must_use]
    pub fn sender(&self) -> Sender<EffectEvent> {
        self.sender.clone()
    }
}

/// Consumer of effect events.
pub trait EffectEventHandler: Send + Sync {
    /// Handles an event.
    fn handle(&self, event: &EffectEvent);
}
