//! The effect engine.
//!
//! Owns the entity table, the scheduler, the handler table and the event
//! bus. Every operation that touches an entity's ledger or registry enters
//! that entity's section first; the scheduler lock is only ever taken inside
//! an entity section or on its own, never the other way round. The
//! concentration index is locked last and never held while entering a
//! section.

use crate::bonus::{BonusSource, Statistic};
use crate::clock::{GameClock, GameTime};
use crate::config::EffectsConfig;
use crate::effect::{
    ActorKind, CancelCause, CasterRef, EffectInstance, EffectOrigin, EffectSnapshot, EffectState,
    EffectTag, ExpireReason, RestoreVars, Trigger,
};
use crate::error::{EffectError, EffectResult};
use crate::events::{EffectEvent, EventBus};
use crate::handler::{DirectContext, EffectContext, EffectHandler, HandlerTable, PulseOutcome, TargetView};
use crate::living::{Living, LivingState};
use crate::persistence::SavedEffect;
use crate::registry::{Admission, Immunity, RejectReason};
use crate::scheduler::{DueTimer, EffectScheduler, TimerHandle, TimerKind};
use crate::subscription::SubscriptionBook;
use crate::vitals::Vitals;
use aegis_common::{EffectId, EntityId};
use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of an application request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ApplyOutcome {
    /// A new instance is active.
    Started(EffectId),
    /// A new instance is active and replaced the older members of its group.
    Replaced {
        /// The new instance.
        started: EffectId,
        /// The instances it replaced, oldest first.
        replaced: Vec<EffectId>,
    },
    /// A new instance started and its first pulse already ended it.
    Expired(EffectId),
    /// An instantaneous effect ran.
    Direct,
    /// Nothing happened.
    Rejected(RejectReason),
}

impl ApplyOutcome {
    /// Id of the started instance, if any.
    #[must_use]
    pub fn effect_id(&self) -> Option<EffectId> {
        match self {
            Self::Started(id) | Self::Replaced { started: id, .. } | Self::Expired(id) => Some(*id),
            Self::Direct | Self::Rejected(_) => None,
        }
    }

    /// Whether the application took effect.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Applies, times and removes effects on living entities.
#[derive(Debug)]
pub struct EffectEngine {
    config: EffectsConfig,
    handlers: HandlerTable,
    world: DashMap<EntityId, Arc<Living>>,
    scheduler: Mutex<EffectScheduler>,
    subscriptions: Arc<SubscriptionBook>,
    events: EventBus,
    clock: GameClock,
    concentration: Mutex<AHashMap<EntityId, Vec<Concentration>>>,
}

/// An instance its caster keeps up with concentration.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Concentration {
    target: EntityId,
    effect: EffectId,
    cost: u32,
}

impl EffectEngine {
    /// Create an engine with a fixed handler table.
    #[must_use]
    pub fn new(mut config: EffectsConfig, handlers: HandlerTable) -> Self {
        config.validate();
        info!(
            handlers = handlers.len(),
            max_effects = config.max_effects_per_entity,
            "effect engine ready"
        );
        Self {
            events: EventBus::new(config.event_capacity),
            config,
            handlers,
            world: DashMap::new(),
            scheduler: Mutex::new(EffectScheduler::new()),
            subscriptions: SubscriptionBook::new(),
            clock: GameClock::new(),
            concentration: Mutex::new(AHashMap::new()),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EffectsConfig {
        &self.config
    }

    /// Registered handlers.
    #[must_use]
    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Lifecycle event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current logical time.
    #[must_use]
    pub fn now(&self) -> GameTime {
        self.clock.now()
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Add a living entity to the world.
    pub fn spawn(&self, kind: ActorKind, vitals: Vitals) -> Arc<Living> {
        let id = EntityId::new();
        let living = Arc::new(Living::new(id, kind, vitals, self.config.max_effects_per_entity));
        self.world.insert(id, Arc::clone(&living));
        debug!(entity = %id, ?kind, "spawned");
        living
    }

    /// Look up a living entity.
    #[must_use]
    pub fn living(&self, id: EntityId) -> Option<Arc<Living>> {
        self.world.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Caster reference for an entity in the world.
    #[must_use]
    pub fn caster_ref(&self, id: EntityId) -> Option<CasterRef> {
        self.living(id).map(|living| CasterRef::new(&living))
    }

    /// Number of entities in the world.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.world.len()
    }

    /// Remove an entity, force-expiring every effect on it and every
    /// concentration effect it maintains elsewhere.
    pub fn despawn(&self, id: EntityId) -> bool {
        let Some((_, living)) = self.world.remove(&id) else {
            debug!(entity = %id, "despawn of unknown entity ignored");
            return false;
        };

        let now = self.now();
        let expired = {
            let mut guard = living.lock();
            let state = &mut *guard;
            state.despawned = true;

            let mut expired = 0;
            for effect in state.registry.active_ids_where(|_| true) {
                if self.expire_locked(state, effect, ExpireReason::Despawned, now) {
                    expired += 1;
                }
            }
            for immunity in state.registry.take_immunities() {
                self.scheduler.lock().cancel_immunity(immunity.effect);
            }
            state.ledger.clear();
            expired
        };
        let dropped = self.cancel_concentration(id);

        debug!(entity = %id, expired, dropped, "despawned");
        true
    }

    /// Run `f` inside an entity's section.
    pub fn with_state<R>(&self, id: EntityId, f: impl FnOnce(&mut LivingState) -> R) -> Option<R> {
        let living = self.living(id)?;
        let mut state = living.lock();
        Some(f(&mut state))
    }

    // ========================================================================
    // Application
    // ========================================================================

    /// Apply the effect registered under `tag` to `target`.
    ///
    /// Expected refusals come back as [`ApplyOutcome::Rejected`]; only an
    /// unregistered tag or a scheduling contract violation is an error.
    pub fn apply(
        &self,
        caster: Option<&CasterRef>,
        target: EntityId,
        tag: EffectTag,
        effectiveness: f64,
    ) -> EffectResult<ApplyOutcome> {
        let handler = self.handler(tag)?;

        let Some(effectiveness) = usable_effectiveness(effectiveness) else {
            return Ok(self.reject(target, tag, RejectReason::NoEffect));
        };

        let Some(living) = self.living(target) else {
            return Ok(self.reject(target, tag, RejectReason::TargetMissing));
        };

        let now = self.now();
        let spec = handler.spec(effectiveness);
        let mut guard = living.lock();
        let state = &mut *guard;

        if !state.is_valid_target() {
            return Ok(self.reject(target, tag, RejectReason::TargetInvalid));
        }

        let view = TargetView {
            id: target,
            kind: living.kind(),
            vitals: &state.vitals,
            ledger: &state.ledger,
            caster,
            effectiveness,
        };
        if !handler.check_target(&view) {
            return Ok(self.reject(target, tag, RejectReason::Resisted));
        }

        if spec.duration.is_instant() {
            let mut ctx = DirectContext {
                target,
                caster,
                spec: &spec,
                effectiveness,
                ledger: &mut state.ledger,
                vitals: &mut state.vitals,
                now,
            };
            handler.on_direct(&mut ctx);
            debug!(entity = %target, %tag, "direct effect applied");
            return Ok(ApplyOutcome::Direct);
        }

        let candidate = EffectInstance::new(
            tag,
            target,
            caster.cloned(),
            spec,
            effectiveness,
            EffectOrigin::Fresh,
            now,
        );
        self.admit_and_start(state, handler.as_ref(), candidate)
    }

    fn handler(&self, tag: EffectTag) -> EffectResult<Arc<dyn EffectHandler>> {
        self.handlers
            .get(tag)
            .cloned()
            .ok_or_else(|| EffectError::UnknownHandler(tag.name().to_string()))
    }

    fn reject(&self, target: EntityId, tag: EffectTag, reason: RejectReason) -> ApplyOutcome {
        debug!(entity = %target, %tag, ?reason, "application rejected");
        self.events.publish(EffectEvent::Rejected {
            target,
            tag,
            reason,
        });
        ApplyOutcome::Rejected(reason)
    }

    fn admit_and_start(
        &self,
        state: &mut LivingState,
        handler: &dyn EffectHandler,
        mut candidate: EffectInstance,
    ) -> EffectResult<ApplyOutcome> {
        let now = candidate.started_at();
        candidate.set_stackable(handler.stackable());
        let (started, replaced) = match state.registry.admit(&candidate, handler, now) {
            Admission::Reject(reason) => {
                return Ok(self.reject(candidate.target(), candidate.tag(), reason));
            }
            Admission::Accept => (self.start_locked(state, handler, candidate, &[])?, Vec::new()),
            Admission::Replace(replaced) => {
                let started = self.start_locked(state, handler, candidate, &replaced)?;
                (started, replaced)
            }
        };

        if !state.registry.get(started).is_some_and(EffectInstance::is_active) {
            debug!(effect = %started, "effect ended on its first pulse");
            return Ok(ApplyOutcome::Expired(started));
        }
        Ok(if replaced.is_empty() {
            ApplyOutcome::Started(started)
        } else {
            ApplyOutcome::Replaced { started, replaced }
        })
    }

    /// Pending to Active. The timer is committed before anything else so a
    /// scheduling error leaves no trace.
    fn start_locked(
        &self,
        state: &mut LivingState,
        handler: &dyn EffectHandler,
        mut instance: EffectInstance,
        replacing: &[EffectId],
    ) -> EffectResult<EffectId> {
        let id = instance.id();
        let target = instance.target();
        let tag = instance.tag();
        let now = instance.started_at();

        self.scheduler
            .lock()
            .schedule(id, target, now, instance.duration(), instance.pulse_ms())?;

        for &old in replacing {
            self.expire_locked(state, old, ExpireReason::Overwritten, now);
        }

        for &trigger in handler.triggers() {
            instance.attach(self.subscriptions.subscribe(target, trigger, id));
        }

        {
            let mut ctx = EffectContext::new(&instance, &mut state.ledger, &mut state.vitals, now);
            match instance.origin() {
                EffectOrigin::Fresh => handler.on_start(&mut ctx),
                EffectOrigin::Restored(vars) => handler.on_restore(&mut ctx, vars),
            }
        }

        if let Some(caster) = instance.caster().filter(|_| instance.is_concentration()) {
            self.concentration
                .lock()
                .entry(caster.id())
                .or_default()
                .push(Concentration {
                    target,
                    effect: id,
                    cost: instance.concentration(),
                });
        }

        let restored = instance.origin().restore_vars().is_some();
        let pulsing = instance.pulse_ms() > 0;
        instance.set_state(EffectState::Active);
        state.registry.insert(instance);

        debug!(effect = %id, entity = %target, %tag, restored, "effect started");
        self.events.publish(EffectEvent::Started {
            target,
            effect: id,
            tag,
            restored,
            at: now,
        });

        if pulsing {
            self.pulse_locked(state, handler, id, now);
        }
        Ok(id)
    }

    fn pulse_locked(&self, state: &mut LivingState, handler: &dyn EffectHandler, id: EffectId, now: GameTime) {
        if !state.is_valid_target() {
            debug!(effect = %id, "pulse skipped, target is not valid");
            return;
        }

        let (target, outcome) = {
            let Some(instance) = state.registry.get(id) else {
                return;
            };
            if !instance.is_active() {
                return;
            }
            let mut ctx = EffectContext::new(instance, &mut state.ledger, &mut state.vitals, now);
            (instance.target(), handler.on_pulse(&mut ctx))
        };

        self.events.publish(EffectEvent::Pulsed {
            target,
            effect: id,
            at: now,
        });

        if outcome == PulseOutcome::Cancel {
            self.expire_locked(state, id, ExpireReason::Cancelled(CancelCause::Handler), now);
        }
    }

    /// Active to Expiring to Removed. Exactly one caller wins the state
    /// check; every other caller gets `false`.
    fn expire_locked(&self, state: &mut LivingState, id: EffectId, reason: ExpireReason, now: GameTime) -> bool {
        let (tag, target, group, concentrating) = match state.registry.get_mut(id) {
            Some(instance) if instance.is_active() => {
                instance.set_state(EffectState::Expiring);
                instance.release_subscriptions();
                let concentrating = if instance.is_concentration() {
                    instance.caster().map(CasterRef::id)
                } else {
                    None
                };
                (instance.tag(), instance.target(), instance.group(), concentrating)
            }
            Some(_) => {
                debug!(effect = %id, ?reason, "effect is already expiring");
                return false;
            }
            None => {
                warn!(effect = %id, ?reason, "expire requested for an effect not in the registry");
                return false;
            }
        };

        self.scheduler.lock().cancel(TimerHandle { effect: id, target });
        if let Some(caster) = concentrating {
            self.release_concentration(caster, id);
        }

        let suppress = reason.suppresses_messages();
        let followup = match (self.handlers.get(tag), state.registry.get(id)) {
            (Some(handler), Some(instance)) => {
                let mut ctx = EffectContext::new(instance, &mut state.ledger, &mut state.vitals, now);
                handler.on_expire(&mut ctx, reason, suppress)
            }
            _ => {
                error!(effect = %id, %tag, "no handler to expire effect");
                0
            }
        };

        let source = BonusSource::Effect(id);
        let stale = state.ledger.sources_for(source);
        if !stale.is_empty() {
            error!(
                effect = %id,
                %tag,
                contributions = stale.len(),
                "expire hook left ledger contributions behind"
            );
            if self.config.purge_stale_contributions {
                state.ledger.purge_source(source);
                state.refresh_derived();
            }
        }

        if let Some(mut removed) = state.registry.remove(id) {
            removed.set_state(EffectState::Removed);
        }

        if followup > 0 && reason != ExpireReason::Overwritten && !state.despawned {
            let until = now.after(followup);
            state.registry.add_immunity(Immunity {
                effect: id,
                tag,
                group,
                until,
            });
            self.scheduler.lock().schedule_immunity(id, target, until);
        }

        debug!(effect = %id, entity = %target, %tag, ?reason, "effect expired");
        self.events.publish(EffectEvent::Expired {
            target,
            effect: id,
            tag,
            reason,
            silent: suppress,
            at: now,
        });
        true
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel an instance. Returns false if it is not active on `target`.
    pub fn cancel(&self, target: EntityId, effect: EffectId, cause: CancelCause) -> bool {
        self.cancel_if(target, effect, ExpireReason::Cancelled(cause), |_| true)
    }

    /// Cancel on a player's request; only beneficial effects may be
    /// cancelled this way.
    pub fn cancel_by_player(&self, target: EntityId, effect: EffectId) -> bool {
        self.cancel_if(
            target,
            effect,
            ExpireReason::Cancelled(CancelCause::Player),
            EffectInstance::is_positive,
        )
    }

    fn cancel_if(
        &self,
        target: EntityId,
        effect: EffectId,
        reason: ExpireReason,
        allowed: impl Fn(&EffectInstance) -> bool,
    ) -> bool {
        let Some(living) = self.living(target) else {
            debug!(entity = %target, effect = %effect, "cancel on unknown entity ignored");
            return false;
        };
        let mut guard = living.lock();
        let state = &mut *guard;

        match state.registry.get(effect) {
            Some(instance) if instance.is_active() => {
                if !allowed(instance) {
                    debug!(effect = %effect, ?reason, "cancel refused");
                    return false;
                }
            }
            _ => {
                debug!(effect = %effect, "cancel of inactive effect ignored");
                return false;
            }
        }
        self.expire_locked(state, effect, reason, self.now())
    }

    /// Cancel every active instance on `target` matching `filter`.
    pub fn cancel_matching(
        &self,
        target: EntityId,
        filter: impl Fn(&EffectInstance) -> bool,
        cause: CancelCause,
    ) -> usize {
        let Some(living) = self.living(target) else {
            return 0;
        };
        let now = self.now();
        let mut guard = living.lock();
        let state = &mut *guard;

        state
            .registry
            .active_ids_where(filter)
            .into_iter()
            .filter(|&effect| self.expire_locked(state, effect, ExpireReason::Cancelled(cause), now))
            .count()
    }

    /// Mark `target` dead and cancel everything on it. Concentration
    /// effects it maintains on others end too.
    pub fn handle_death(&self, target: EntityId) -> usize {
        let Some(living) = self.living(target) else {
            return 0;
        };
        let now = self.now();
        let cancelled = {
            let mut guard = living.lock();
            let state = &mut *guard;
            state.vitals.kill();

            state
                .registry
                .active_ids_where(|_| true)
                .into_iter()
                .filter(|&effect| {
                    self.expire_locked(state, effect, ExpireReason::Cancelled(CancelCause::Death), now)
                })
                .count()
        };
        let dropped = self.cancel_concentration(target);
        debug!(entity = %target, cancelled, dropped, "target died");
        cancelled
    }

    // ========================================================================
    // Concentration
    // ========================================================================

    /// End every concentration effect `caster` maintains. Returns how many
    /// were still active.
    pub fn cancel_concentration(&self, caster: EntityId) -> usize {
        let links = self.concentration.lock().remove(&caster).unwrap_or_default();
        links
            .into_iter()
            .filter(|link| self.cancel(link.target, link.effect, CancelCause::Concentration))
            .count()
    }

    /// Concentration effects `caster` maintains, oldest first.
    #[must_use]
    pub fn concentration_effects(&self, caster: EntityId) -> Vec<EffectId> {
        self.concentration
            .lock()
            .get(&caster)
            .map(|links| links.iter().map(|link| link.effect).collect())
            .unwrap_or_default()
    }

    /// Total concentration `caster` spends on its effects.
    #[must_use]
    pub fn concentration_used(&self, caster: EntityId) -> u32 {
        self.concentration
            .lock()
            .get(&caster)
            .map_or(0, |links| links.iter().map(|link| link.cost).sum())
    }

    fn release_concentration(&self, caster: EntityId, effect: EffectId) {
        let mut index = self.concentration.lock();
        if let Some(links) = index.get_mut(&caster) {
            links.retain(|link| link.effect != effect);
            if links.is_empty() {
                index.remove(&caster);
            }
        }
    }

    /// Deliver an interrupt trigger to `target`.
    pub fn notify(&self, target: EntityId, trigger: Trigger) -> usize {
        let subscribers = self.subscriptions.subscribers(target, trigger);
        if subscribers.is_empty() {
            return 0;
        }
        let Some(living) = self.living(target) else {
            return 0;
        };
        let now = self.now();
        let mut guard = living.lock();
        let state = &mut *guard;

        subscribers
            .into_iter()
            .filter(|&effect| {
                state.registry.get(effect).is_some_and(EffectInstance::is_active)
                    && self.expire_locked(state, effect, ExpireReason::Interrupted(trigger), now)
            })
            .count()
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Advance the clock by `millis`, firing due timers.
    pub fn advance_by(&self, millis: u64) -> usize {
        self.advance_to(self.now().after(millis))
    }

    /// Advance the clock to `time`, firing every due timer one at a time in
    /// fire order. The clock reads each timer's fire time while it runs.
    /// Returns the number of timers fired.
    pub fn advance_to(&self, time: GameTime) -> usize {
        let mut fired = 0;
        loop {
            let due = self.scheduler.lock().pop_due(time);
            let Some(due) = due else {
                break;
            };
            self.clock.advance_to(due.at);
            self.fire(due);
            fired += 1;
        }
        self.clock.advance_to(time);
        fired
    }

    /// Fire time of the next pending timer.
    #[must_use]
    pub fn next_due(&self) -> Option<GameTime> {
        self.scheduler.lock().next_due()
    }

    /// Number of instances with live timers.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.scheduler.lock().len()
    }

    fn fire(&self, due: DueTimer) {
        let Some(living) = self.living(due.target) else {
            debug!(effect = %due.effect, kind = ?due.kind, "timer for departed entity ignored");
            return;
        };
        let mut guard = living.lock();
        let state = &mut *guard;

        match due.kind {
            TimerKind::Expire => {
                self.expire_locked(state, due.effect, ExpireReason::Elapsed, due.at);
            }
            TimerKind::Pulse => {
                let Some(tag) = state.registry.get(due.effect).map(EffectInstance::tag) else {
                    debug!(effect = %due.effect, "pulse for removed effect ignored");
                    return;
                };
                if let Some(handler) = self.handlers.get(tag) {
                    self.pulse_locked(state, handler.as_ref(), due.effect, due.at);
                }
            }
            TimerKind::ImmunityEnd => {
                if state.registry.clear_immunity(due.effect).is_some() {
                    debug!(effect = %due.effect, entity = %due.target, "immunity ended");
                    self.events.publish(EffectEvent::ImmunityEnded {
                        target: due.target,
                        effect: due.effect,
                        at: due.at,
                    });
                }
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// First active instance of `tag` on `target`.
    #[must_use]
    pub fn find_active(&self, target: EntityId, tag: EffectTag) -> Option<EffectSnapshot> {
        self.with_state(target, |state| {
            state.registry.find_active(tag).map(EffectInstance::snapshot)
        })
        .flatten()
    }

    /// Every active instance on `target`, oldest first.
    #[must_use]
    pub fn active_effects(&self, target: EntityId) -> Vec<EffectSnapshot> {
        self.with_state(target, |state| {
            let mut snapshots: Vec<_> = state.registry.active().map(EffectInstance::snapshot).collect();
            snapshots.sort_by_key(|snapshot| snapshot.id);
            snapshots
        })
        .unwrap_or_default()
    }

    /// Remaining ms of an active instance; -1 for effects without expiry.
    #[must_use]
    pub fn remaining(&self, target: EntityId, effect: EffectId) -> Option<i64> {
        let now = self.now();
        self.with_state(target, |state| {
            if !state.registry.get(effect).is_some_and(EffectInstance::is_active) {
                return None;
            }
            self.scheduler.lock().serialize_remaining(effect, now)
        })
        .flatten()
    }

    /// Effective value of a statistic on `target`.
    #[must_use]
    pub fn effective_value(&self, target: EntityId, stat: Statistic) -> Option<f64> {
        self.living(target).map(|living| living.effective_value(stat))
    }

    /// Copy of `target`'s vitals.
    #[must_use]
    pub fn vitals(&self, target: EntityId) -> Option<Vitals> {
        self.living(target).map(|living| living.vitals())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Persistence records for every active instance on `target`.
    /// Concentration effects are left out; their caster link does not
    /// survive a reload.
    #[must_use]
    pub fn save_effects(&self, target: EntityId) -> Vec<SavedEffect> {
        let Some(living) = self.living(target) else {
            return Vec::new();
        };
        let now = self.now();
        let state = living.lock();
        let scheduler = self.scheduler.lock();

        let mut instances: Vec<&EffectInstance> = state.registry.active().collect();
        instances.sort_by_key(|instance| instance.id());
        instances
            .into_iter()
            .filter(|instance| !instance.is_concentration())
            .filter_map(|instance| {
                let remaining = scheduler.serialize_remaining(instance.id(), now)?;
                if remaining == 0 {
                    return None;
                }
                self.handlers.get(instance.tag())?.save(instance, remaining)
            })
            .collect()
    }

    /// Rebuild saved effects on `target`. Each restored instance runs its
    /// handler's restore hook and expires after the saved remaining time.
    ///
    /// Every record's tag is resolved before anything is applied.
    pub fn restore_effects(
        &self,
        target: EntityId,
        records: &[SavedEffect],
    ) -> EffectResult<Vec<ApplyOutcome>> {
        let resolved = records
            .iter()
            .map(|record| {
                self.handlers
                    .resolve(&record.tag)
                    .cloned()
                    .map(|handler| (handler, record))
                    .ok_or_else(|| EffectError::UnknownHandler(record.tag.clone()))
            })
            .collect::<EffectResult<Vec<_>>>()?;

        let living = self.living(target).ok_or(EffectError::UnknownEntity(target))?;
        let now = self.now();
        let mut guard = living.lock();
        let state = &mut *guard;

        let mut outcomes = Vec::with_capacity(resolved.len());
        for (handler, record) in resolved {
            let tag = handler.tag();
            let duration = record.duration();

            let effectiveness = match usable_effectiveness(record.effectiveness) {
                Some(effectiveness) if !duration.is_instant() => effectiveness,
                _ => {
                    outcomes.push(self.reject(target, tag, RejectReason::NoEffect));
                    continue;
                }
            };
            if !state.is_valid_target() {
                outcomes.push(self.reject(target, tag, RejectReason::TargetInvalid));
                continue;
            }

            let mut spec = handler.spec(effectiveness);
            spec.duration = duration;
            spec.magnitude = record.magnitude;
            spec.spell_line.clone_from(&record.spell_line);
            spec.concentration = 0;
            let vars = RestoreVars {
                magnitude: record.magnitude,
                effectiveness,
            };
            let candidate = EffectInstance::new(
                tag,
                target,
                None,
                spec,
                effectiveness,
                EffectOrigin::Restored(vars),
                now,
            );

            let outcome = self.admit_and_start(state, handler.as_ref(), candidate)?;
            if let ApplyOutcome::Rejected(reason) = &outcome {
                warn!(entity = %target, %tag, ?reason, "saved effect could not be restored");
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Effectiveness clamped to at most 1.0; `None` when it is NaN or not
/// positive.
fn usable_effectiveness(effectiveness: f64) -> Option<f64> {
    (effectiveness > 0.0).then(|| effectiveness.min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bonus::BonusCategory;
    use crate::effect::{EffectGroup, EffectSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WARD: EffectTag = EffectTag::new("ward");
    const HEAL: EffectTag = EffectTag::new("heal");
    const CURSE: EffectTag = EffectTag::new("curse");
    const LEAKY: EffectTag = EffectTag::new("leaky");

    /// Adds armor; counts hooks.
    #[derive(Default)]
    struct Ward {
        starts: AtomicUsize,
        expires: AtomicUsize,
    }

    impl EffectHandler for Ward {
        fn tag(&self) -> EffectTag {
            WARD
        }

        fn spec(&self, _effectiveness: f64) -> EffectSpec {
            EffectSpec::timed(5000).magnitude(30.0).group(EffectGroup(10))
        }

        fn triggers(&self) -> &[Trigger] {
            &[Trigger::Attacked]
        }

        fn on_start(&self, ctx: &mut EffectContext<'_>) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let value = ctx.magnitude();
            ctx.set_bonus(BonusCategory::Base, Statistic::ArmorFactor, value);
        }

        fn on_expire(&self, ctx: &mut EffectContext<'_>, _reason: ExpireReason, _suppress: bool) -> u64 {
            self.expires.fetch_add(1, Ordering::SeqCst);
            ctx.remove_bonus(BonusCategory::Base, Statistic::ArmorFactor);
            0
        }
    }

    struct Heal;

    impl EffectHandler for Heal {
        fn tag(&self) -> EffectTag {
            HEAL
        }

        fn spec(&self, _effectiveness: f64) -> EffectSpec {
            EffectSpec::instant().magnitude(40.0)
        }

        fn on_start(&self, _ctx: &mut EffectContext<'_>) {}

        fn on_direct(&self, ctx: &mut DirectContext<'_>) {
            let amount = ctx.magnitude();
            ctx.vitals.heal(amount);
        }

        fn on_expire(&self, _ctx: &mut EffectContext<'_>, _reason: ExpireReason, _suppress: bool) -> u64 {
            0
        }
    }

    /// Negative, grants a 3s immunity on expiry.
    struct Curse;

    impl EffectHandler for Curse {
        fn tag(&self) -> EffectTag {
            CURSE
        }

        fn spec(&self, _effectiveness: f64) -> EffectSpec {
            EffectSpec::timed(2000).negative()
        }

        fn on_start(&self, _ctx: &mut EffectContext<'_>) {}

        fn on_expire(&self, _ctx: &mut EffectContext<'_>, _reason: ExpireReason, _suppress: bool) -> u64 {
            3000
        }
    }

    /// Forgets to remove its bonus.
    struct Leaky;

    impl EffectHandler for Leaky {
        fn tag(&self) -> EffectTag {
            LEAKY
        }

        fn spec(&self, _effectiveness: f64) -> EffectSpec {
            EffectSpec::timed(1000).magnitude(5.0)
        }

        fn on_start(&self, ctx: &mut EffectContext<'_>) {
            ctx.set_bonus(BonusCategory::Other, Statistic::Strength, 5.0);
        }

        fn on_expire(&self, _ctx: &mut EffectContext<'_>, _reason: ExpireReason, _suppress: bool) -> u64 {
            0
        }
    }

    fn engine_with(ward: Arc<Ward>) -> EffectEngine {
        let mut handlers = HandlerTable::new();
        handlers.register(ward).unwrap();
        handlers.register(Arc::new(Heal)).unwrap();
        handlers.register(Arc::new(Curse)).unwrap();
        handlers.register(Arc::new(Leaky)).unwrap();
        EffectEngine::new(EffectsConfig::default(), handlers)
    }

    fn engine() -> EffectEngine {
        engine_with(Arc::new(Ward::default()))
    }

    fn armor(engine: &EffectEngine, id: EntityId) -> f64 {
        engine.effective_value(id, Statistic::ArmorFactor).unwrap()
    }

    #[test]
    fn test_apply_and_natural_expiry() {
        let ward = Arc::new(Ward::default());
        let engine = engine_with(Arc::clone(&ward));
        let target = engine.spawn(ActorKind::Player, Vitals::new(100.0)).id();

        let outcome = engine.apply(None, target, WARD, 1.0).unwrap();
        let id = outcome.effect_id().unwrap();
        assert!((armor(&engine, target) - 30.0).abs() < f64::EPSILON);
        assert_eq!(engine.remaining(target, id), Some(5000));

        engine.advance_by(4999);
        assert!(engine.find_active(target, WARD).is_some());
        engine.advance_by(1);
        assert!(engine.find_active(target, WARD).is_none());
        assert!(armor(&engine, target).abs() < f64::EPSILON);
        assert_eq!(ward.starts.load(Ordering::SeqCst), 1);
        assert_eq!(ward.expires.load(Ordering::SeqCst), 1);
        assert_eq!(engine.scheduled_count(), 0);
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let engine = engine();
        let target = engine.spawn(ActorKind::Npc, Vitals::default()).id();
        let err = engine.apply(None, target, EffectTag::new("nope"), 1.0).unwrap_err();
        assert_eq!(err, EffectError::UnknownHandler("nope".into()));
    }

    #[test]
    fn test_rejections_leave_no_trace() {
        let engine = engine();
        let target = engine.spawn(ActorKind::Npc, Vitals::default()).id();

        assert_eq!(
            engine.apply(None, target, WARD, 0.0).unwrap(),
            ApplyOutcome::Rejected(RejectReason::NoEffect)
        );
        assert_eq!(
            engine.apply(None, EntityId::from_raw(u64::MAX), WARD, 1.0).unwrap(),
            ApplyOutcome::Rejected(RejectReason::TargetMissing)
        );

        engine.handle_death(target);
        assert_eq!(
            engine.apply(None, target, WARD, 1.0).unwrap(),
            ApplyOutcome::Rejected(RejectReason::TargetInvalid)
        );
        assert!(armor(&engine, target).abs() < f64::EPSILON);
        assert!(engine.active_effects(target).is_empty());
        assert_eq!(engine.scheduled_count(), 0);
    }

    #[test]
    fn test_direct_effect_keeps_no_instance() {
        let engine = engine();
        let target = engine.spawn(ActorKind::Player, Vitals::new(100.0));
        target.lock().vitals_mut().take_damage(60.0);

        assert_eq!(
            engine.apply(None, target.id(), HEAL, 0.5).unwrap(),
            ApplyOutcome::Direct
        );
        assert!((target.vitals().health() - 60.0).abs() < f64::EPSILON);
        assert!(engine.active_effects(target.id()).is_empty());
    }

    #[test]
    fn test_cancel_twice() {
        let ward = Arc::new(Ward::default());
        let engine = engine_with(Arc::clone(&ward));
        let target = engine.spawn(ActorKind::Player, Vitals::default()).id();
        let id = engine.apply(None, target, WARD, 1.0).unwrap().effect_id().unwrap();

        assert!(engine.cancel(target, id, CancelCause::Dispel));
        assert!(!engine.cancel(target, id, CancelCause::Dispel));
        engine.advance_by(10_000);
        assert_eq!(ward.expires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_player_can_only_cancel_positive() {
        let engine = engine();
        let target = engine.spawn(ActorKind::Player, Vitals::default()).id();
        let ward = engine.apply(None, target, WARD, 1.0).unwrap().effect_id().unwrap();
        let curse = engine.apply(None, target, CURSE, 1.0).unwrap().effect_id().unwrap();

        assert!(!engine.cancel_by_player(target, curse));
        assert!(engine.cancel_by_player(target, ward));
        assert_eq!(engine.active_effects(target).len(), 1);
    }

    #[test]
    fn test_immunity_window() {
        let engine = engine();
        let target = engine.spawn(ActorKind::Npc, Vitals::default()).id();
        engine.apply(None, target, CURSE, 1.0).unwrap();

        engine.advance_to(GameTime::from_millis(2000));
        assert!(engine.find_active(target, CURSE).is_none());
        assert_eq!(
            engine.apply(None, target, CURSE, 1.0).unwrap(),
            ApplyOutcome::Rejected(RejectReason::Immune {
                until: GameTime::from_millis(5000)
            })
        );

        engine.events().drain();
        engine.advance_to(GameTime::from_millis(5000));
        assert!(engine
            .events()
            .drain()
            .iter()
            .any(|e| matches!(e, EffectEvent::ImmunityEnded { .. })));
        assert!(engine.apply(None, target, CURSE, 1.0).unwrap().is_applied());
    }

    #[test]
    fn test_death_cancels_everything() {
        let engine = engine();
        let target = engine.spawn(ActorKind::Player, Vitals::default()).id();
        engine.apply(None, target, WARD, 1.0).unwrap();
        engine.apply(None, target, CURSE, 1.0).unwrap();

        assert_eq!(engine.handle_death(target), 2);
        assert!(engine.active_effects(target).is_empty());
        assert!(!engine.vitals(target).unwrap().is_alive());
        assert!(armor(&engine, target).abs() < f64::EPSILON);
    }

    #[test]
    fn test_interrupt_trigger() {
        let engine = engine();
        let target = engine.spawn(ActorKind::Player, Vitals::default()).id();
        engine.apply(None, target, WARD, 1.0).unwrap();

        assert_eq!(engine.notify(target, Trigger::Moved), 0);
        assert_eq!(engine.notify(target, Trigger::Attacked), 1);
        assert!(engine.find_active(target, WARD).is_none());
        assert_eq!(engine.notify(target, Trigger::Attacked), 0);
    }

    #[test]
    fn test_cancel_matching() {
        let engine = engine();
        let target = engine.spawn(ActorKind::Player, Vitals::default()).id();
        engine.apply(None, target, WARD, 1.0).unwrap();
        engine.apply(None, target, CURSE, 1.0).unwrap();

        let dispelled = engine.cancel_matching(target, |i| !i.is_positive(), CancelCause::Dispel);
        assert_eq!(dispelled, 1);
        assert!(engine.find_active(target, WARD).is_some());
    }

    #[test]
    fn test_despawn_clears_everything() {
        let ward = Arc::new(Ward::default());
        let engine = engine_with(Arc::clone(&ward));
        let living = engine.spawn(ActorKind::Npc, Vitals::default());
        let target = living.id();
        engine.apply(None, target, WARD, 1.0).unwrap();
        engine.apply(None, target, CURSE, 1.0).unwrap();

        assert!(engine.despawn(target));
        assert!(!engine.despawn(target));
        assert_eq!(ward.expires.load(Ordering::SeqCst), 1);
        assert!(living.lock().registry().is_empty());
        assert!(living.lock().ledger().is_empty());
        assert!(living.lock().registry().immunities().is_empty());
        assert_eq!(engine.scheduled_count(), 0);
        assert_eq!(engine.advance_by(60_000), 0);
    }

    #[test]
    fn test_stale_contributions_are_purged() {
        let engine = engine();
        let target = engine.spawn(ActorKind::Npc, Vitals::default()).id();
        engine.apply(None, target, LEAKY, 1.0).unwrap();
        assert!((engine.effective_value(target, Statistic::Strength).unwrap() - 5.0).abs() < f64::EPSILON);

        engine.advance_by(1000);
        assert!(engine.effective_value(target, Statistic::Strength).unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn test_caster_may_vanish() {
        let engine = engine();
        let caster = engine.spawn(ActorKind::Player, Vitals::default());
        let target = engine.spawn(ActorKind::Npc, Vitals::default()).id();
        let caster_ref = engine.caster_ref(caster.id()).unwrap();

        engine.apply(Some(&caster_ref), target, WARD, 1.0).unwrap();
        engine.despawn(caster.id());
        drop(caster);

        let snapshot = engine.find_active(target, WARD).unwrap();
        assert!(snapshot.caster.is_some());
        assert!(caster_ref.upgrade().is_none());
        engine.advance_by(5000);
        assert!(engine.find_active(target, WARD).is_none());
    }

    #[test]
    fn test_events_follow_lifecycle() {
        let engine = engine();
        let target = engine.spawn(ActorKind::Npc, Vitals::default()).id();
        engine.apply(None, target, WARD, 1.0).unwrap();
        engine.apply(None, target, WARD, 1.0).unwrap();

        let events = engine.events().drain();
        assert!(matches!(events[0], EffectEvent::Started { .. }));
        assert!(matches!(
            events[1],
            EffectEvent::Expired {
                reason: ExpireReason::Overwritten,
                silent: true,
                ..
            }
        ));
        assert!(matches!(events[2], EffectEvent::Started { .. }));
    }
}
