//! Per-entity effect registry.
//!
//! The registry is the only authority on "does this target already have
//! effect X". It indexes instances by tag and by group, decides admission
//! of new instances against the stacking policy, and tracks immunity
//! windows left behind by expired effects.

use crate::clock::GameTime;
use crate::effect::{EffectGroup, EffectInstance, EffectTag};
use crate::handler::EffectHandler;
use aegis_common::EffectId;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Why an application did not take effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Effectiveness was zero or negative.
    NoEffect,
    /// Target is not in the world.
    TargetMissing,
    /// Target is dead or despawning.
    TargetInvalid,
    /// The handler's resist check refused it.
    Resisted,
    /// A higher-priority instance in the same group is active.
    Blocked {
        /// The instance that won.
        by: EffectId,
    },
    /// An immunity window is open.
    Immune {
        /// When the window closes.
        until: GameTime,
    },
    /// The target's registry is full.
    Capacity,
}

/// Admission decision for a pending instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Start it alongside existing instances.
    Accept,
    /// Start it after expiring every listed instance, oldest first.
    Replace(Vec<EffectId>),
    /// Drop it.
    Reject(RejectReason),
}

/// Immunity granted by an expired instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Immunity {
    /// Instance whose expiry granted it.
    pub effect: EffectId,
    /// Tag of that instance.
    pub tag: EffectTag,
    /// Group of that instance.
    pub group: EffectGroup,
    /// When it ends.
    pub until: GameTime,
}

impl Immunity {
    /// Whether an application of `tag` in `group` falls under it at `now`.
    #[must_use]
    pub fn covers(&self, tag: EffectTag, group: EffectGroup, now: GameTime) -> bool {
        if now >= self.until {
            return false;
        }
        if self.group.is_exclusive() {
            self.group == group
        } else {
            self.tag == tag
        }
    }
}

/// Effect instances on one entity.
#[derive(Debug)]
pub struct EffectRegistry {
    instances: AHashMap<EffectId, EffectInstance>,
    by_tag: AHashMap<EffectTag, Vec<EffectId>>,
    by_group: AHashMap<EffectGroup, Vec<EffectId>>,
    immunities: Vec<Immunity>,
    capacity: usize,
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EffectRegistry {
    /// Create a registry holding at most `capacity` instances.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            instances: AHashMap::new(),
            by_tag: AHashMap::new(),
            by_group: AHashMap::new(),
            immunities: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Decide whether `candidate` may start.
    ///
    /// A non-zero group stacks only while the candidate and every active
    /// member are stackable. Otherwise the candidate competes with all
    /// members: a concentration member or one the comparator ranks
    /// strictly higher blocks it, and if none does it replaces them all.
    #[must_use]
    pub fn admit(
        &self,
        candidate: &EffectInstance,
        handler: &dyn EffectHandler,
        now: GameTime,
    ) -> Admission {
        if let Some(immunity) = self
            .immunities
            .iter()
            .find(|i| i.covers(candidate.tag(), candidate.group(), now))
        {
            return Admission::Reject(RejectReason::Immune {
                until: immunity.until,
            });
        }

        let group = candidate.group();
        if group.is_exclusive() {
            let mut members: Vec<&EffectInstance> = self.active_in_group(group).collect();
            let stacking = handler.stackable() && members.iter().all(|m| m.is_stackable());
            if !stacking && !members.is_empty() {
                members.sort_by_key(|m| m.id());
                let blocker = members.iter().find(|existing| {
                    existing.is_concentration()
                        || handler.compare(existing, candidate) == Some(Ordering::Less)
                });
                if let Some(existing) = blocker {
                    return Admission::Reject(RejectReason::Blocked { by: existing.id() });
                }
                return Admission::Replace(members.iter().map(|m| m.id()).collect());
            }
        }

        if self.instances.len() >= self.capacity {
            return Admission::Reject(RejectReason::Capacity);
        }
        Admission::Accept
    }

    /// Add a started instance.
    pub fn insert(&mut self, instance: EffectInstance) {
        let id = instance.id();
        self.by_tag.entry(instance.tag()).or_default().push(id);
        if instance.group().is_exclusive() {
            self.by_group.entry(instance.group()).or_default().push(id);
        }
        self.instances.insert(id, instance);
    }

    /// Remove an instance and its index entries.
    pub fn remove(&mut self, id: EffectId) -> Option<EffectInstance> {
        let instance = self.instances.remove(&id)?;
        unindex(&mut self.by_tag, instance.tag(), id);
        if instance.group().is_exclusive() {
            unindex(&mut self.by_group, instance.group(), id);
        }
        Some(instance)
    }

    /// Instance by id, in any state.
    #[must_use]
    pub fn get(&self, id: EffectId) -> Option<&EffectInstance> {
        self.instances.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: EffectId) -> Option<&mut EffectInstance> {
        self.instances.get_mut(&id)
    }

    /// First active instance with `tag`.
    #[must_use]
    pub fn find_active(&self, tag: EffectTag) -> Option<&EffectInstance> {
        self.by_tag
            .get(&tag)
            .into_iter()
            .flatten()
            .filter_map(|id| self.instances.get(id))
            .find(|instance| instance.is_active())
    }

    /// Active instances in `group`.
    pub fn active_in_group(&self, group: EffectGroup) -> impl Iterator<Item = &EffectInstance> {
        self.by_group
            .get(&group)
            .into_iter()
            .flatten()
            .filter_map(|id| self.instances.get(id))
            .filter(|instance| instance.is_active())
    }

    /// Every active instance.
    pub fn active(&self) -> impl Iterator<Item = &EffectInstance> {
        self.instances.values().filter(|instance| instance.is_active())
    }

    /// Ids of active instances matching `filter`, oldest first.
    #[must_use]
    pub fn active_ids_where(&self, filter: impl Fn(&EffectInstance) -> bool) -> Vec<EffectId> {
        let mut ids: Vec<_> = self
            .active()
            .filter(|instance| filter(instance))
            .map(EffectInstance::id)
            .collect();
        ids.sort();
        ids
    }

    /// Record an immunity window.
    pub fn add_immunity(&mut self, immunity: Immunity) {
        self.immunities.push(immunity);
    }

    /// End the immunity granted by `effect`.
    pub fn clear_immunity(&mut self, effect: EffectId) -> Option<Immunity> {
        let index = self.immunities.iter().position(|i| i.effect == effect)?;
        Some(self.immunities.swap_remove(index))
    }

    /// Open immunity windows.
    #[must_use]
    pub fn immunities(&self) -> &[Immunity] {
        &self.immunities
    }

    /// Drop every immunity, returning them.
    pub fn take_immunities(&mut self) -> Vec<Immunity> {
        std::mem::take(&mut self.immunities)
    }

    /// Number of stored instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// True when no instance is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Maximum number of instances.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn unindex<K: std::hash::Hash + Eq>(index: &mut AHashMap<K, Vec<EffectId>>, key: K, id: EffectId) {
    if let Some(ids) = index.get_mut(&key) {
        ids.retain(|&other| other != id);
        if ids.is_empty() {
            index.remove(&key);
        }
    }
}
