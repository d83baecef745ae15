//! Effect timing.
//!
//! A single min-heap of timers ordered by `(fire time, sequence)`. Cancelled
//! timers are not removed from the heap; their entries go stale and are
//! skipped when popped, because each live instance records the sequence
//! number of its current expire and pulse entries.

use crate::clock::GameTime;
use crate::effect::EffectDuration;
use crate::error::{EffectError, EffectResult};
use aegis_common::{EffectId, EntityId};
use ahash::AHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::trace;

/// Handle returned by [`EffectScheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    /// Scheduled instance.
    pub effect: EffectId,
    /// Its target.
    pub target: EntityId,
}

/// What a due timer asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Natural expiry.
    Expire,
    /// Periodic pulse.
    Pulse,
    /// End of an immunity window.
    ImmunityEnd,
}

/// A timer popped by [`EffectScheduler::pop_due`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTimer {
    /// When it was due.
    pub at: GameTime,
    /// Instance it belongs to.
    pub effect: EffectId,
    /// Target entity.
    pub target: EntityId,
    /// Action.
    pub kind: TimerKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    at: GameTime,
    seq: u64,
    effect: EffectId,
    kind: TimerKind,
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    target: EntityId,
    expires_at: Option<GameTime>,
    pulse_ms: u64,
    expire_seq: Option<u64>,
    pulse_seq: Option<u64>,
}

/// Timers for every active instance in the world.
#[derive(Debug, Default)]
pub struct EffectScheduler {
    heap: BinaryHeap<Reverse<Entry>>,
    scheduled: AHashMap<EffectId, Scheduled>,
    immunities: AHashMap<EffectId, (EntityId, u64)>,
    next_seq: u64,
}

impl EffectScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register timers for an instance: one expiry at `now + duration` for
    /// timed effects, and pulses every `pulse_ms` strictly before expiry.
    /// Scheduling the same instance twice is an error.
    pub fn schedule(
        &mut self,
        effect: EffectId,
        target: EntityId,
        now: GameTime,
        duration: EffectDuration,
        pulse_ms: u64,
    ) -> EffectResult<TimerHandle> {
        if self.scheduled.contains_key(&effect) {
            return Err(EffectError::AlreadyScheduled(effect));
        }

        let expires_at = duration.timed_millis().map(|ms| now.after(ms));
        let expire_seq = expires_at.map(|at| self.push(at, effect, TimerKind::Expire));

        let first_pulse = now.after(pulse_ms);
        let pulse_seq = (pulse_ms > 0 && expires_at.map_or(true, |end| first_pulse < end))
            .then(|| self.push(first_pulse, effect, TimerKind::Pulse));

        self.scheduled.insert(
            effect,
            Scheduled {
                target,
                expires_at,
                pulse_ms,
                expire_seq,
                pulse_seq,
            },
        );
        trace!(%effect, %target, ?expires_at, pulse_ms, "scheduled");
        Ok(TimerHandle { effect, target })
    }

    /// Stop every future callback for an instance. Returns false if it was
    /// not scheduled (already fired or cancelled).
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.scheduled.remove(&handle.effect).is_some()
    }

    /// Remaining ms for persistence: -1 for effects without expiry, `None`
    /// when the instance is not scheduled.
    #[must_use]
    pub fn serialize_remaining(&self, effect: EffectId, now: GameTime) -> Option<i64> {
        let scheduled = self.scheduled.get(&effect)?;
        Some(match scheduled.expires_at {
            Some(end) => i64::try_from(end.since(now)).unwrap_or(i64::MAX),
            None => -1,
        })
    }

    /// Arm the end of an immunity window granted by `effect`.
    pub fn schedule_immunity(&mut self, effect: EffectId, target: EntityId, until: GameTime) -> TimerHandle {
        let seq = self.push(until, effect, TimerKind::ImmunityEnd);
        self.immunities.insert(effect, (target, seq));
        TimerHandle { effect, target }
    }

    /// Disarm an immunity timer.
    pub fn cancel_immunity(&mut self, effect: EffectId) -> bool {
        self.immunities.remove(&effect).is_some()
    }

    /// Pop the earliest live timer due at or before `now`. Pulses are
    /// re-armed for their next period before being returned.
    pub fn pop_due(&mut self, now: GameTime) -> Option<DueTimer> {
        loop {
            let Reverse(entry) = *self.heap.peek()?;
            if entry.at > now {
                return None;
            }
            self.heap.pop();

            let target = match entry.kind {
                TimerKind::Expire => self.take_expire(entry),
                TimerKind::Pulse => self.rearm_pulse(entry),
                TimerKind::ImmunityEnd => self.take_immunity(entry),
            };

            if let Some(target) = target {
                return Some(DueTimer {
                    at: entry.at,
                    effect: entry.effect,
                    target,
                    kind: entry.kind,
                });
            }
        }
    }

    /// Fire time of the earliest heap entry. May belong to a cancelled
    /// timer.
    #[must_use]
    pub fn next_due(&self) -> Option<GameTime> {
        self.heap.peek().map(|Reverse(entry)| entry.at)
    }

    /// Whether an instance has live timers.
    #[must_use]
    pub fn is_scheduled(&self, effect: EffectId) -> bool {
        self.scheduled.contains_key(&effect)
    }

    /// Number of scheduled instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    /// True when nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty() && self.immunities.is_empty()
    }

    fn push(&mut self, at: GameTime, effect: EffectId, kind: TimerKind) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            at,
            seq,
            effect,
            kind,
        }));
        seq
    }

    fn take_expire(&mut self, entry: Entry) -> Option<EntityId> {
        let scheduled = self.scheduled.get(&entry.effect)?;
        if scheduled.expire_seq != Some(entry.seq) {
            return None;
        }
        let target = scheduled.target;
        self.scheduled.remove(&entry.effect);
        Some(target)
    }

    fn rearm_pulse(&mut self, entry: Entry) -> Option<EntityId> {
        let scheduled = *self.scheduled.get(&entry.effect)?;
        if scheduled.pulse_seq != Some(entry.seq) {
            return None;
        }

        let next = entry.at.after(scheduled.pulse_ms);
        let next_seq = scheduled
            .expires_at
            .map_or(true, |end| next < end)
            .then(|| self.push(next, entry.effect, TimerKind::Pulse));
        if let Some(live) = self.scheduled.get_mut(&entry.effect) {
            live.pulse_seq = next_seq;
        }
        Some(scheduled.target)
    }

    fn take_immunity(&mut self, entry: Entry) -> Option<EntityId> {
        match self.immunities.get(&entry.effect) {
            Some(&(target, seq)) if seq == entry.seq => {
                self.immunities.remove(&entry.effect);
                Some(target)
            }
            _ => None,
        }
    }
}
