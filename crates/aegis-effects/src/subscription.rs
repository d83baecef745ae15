//! Interrupt subscriptions.
//!
//! An instance that can be interrupted (by movement, combat, casting) holds
//! one [`Subscription`] per trigger. Dropping the guard unsubscribes, and
//! the engine drops every guard on the Active to Expiring transition.

use crate::effect::Trigger;
use aegis_common::{EffectId, EntityId};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Shared index of `(target, trigger)` to subscribed instances.
#[derive(Debug, Default)]
pub struct SubscriptionBook {
    entries: Mutex<AHashMap<(EntityId, Trigger), Vec<EffectId>>>,
}

impl SubscriptionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe `effect` to `trigger` on `target`.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, target: EntityId, trigger: Trigger, effect: EffectId) -> Subscription {
        self.entries
            .lock()
            .entry((target, trigger))
            .or_default()
            .push(effect);

        Subscription {
            book: Arc::downgrade(self),
            target,
            trigger,
            effect,
        }
    }

    /// Instances currently subscribed to `trigger` on `target`.
    #[must_use]
    pub fn subscribers(&self, target: EntityId, trigger: Trigger) -> Vec<EffectId> {
        self.entries
            .lock()
            .get(&(target, trigger))
            .cloned()
            .unwrap_or_default()
    }

    /// Total live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    /// True when nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn unsubscribe(&self, target: EntityId, trigger: Trigger, effect: EffectId) {
        let mut entries = self.entries.lock();
        if let Some(effects) = entries.get_mut(&(target, trigger)) {
            effects.retain(|&id| id != effect);
            if effects.is_empty() {
                entries.remove(&(target, trigger));
            }
        }
    }
}

/// Guard for one subscription; unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    book: Weak<SubscriptionBook>,
    target: EntityId,
    trigger: Trigger,
    effect: EffectId,
}

impl Subscription {
    /// Subscribed trigger.
    #[must_use]
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(book) = self.book.upgrade() {
            book.unsubscribe(self.target, self.trigger, self.effect);
        }
    }
}
