//! The effect handler contract and the handler lookup table.
//!
//! A handler owns no per-application state. Everything it needs to undo in
//! `on_expire` must be recoverable from the instance (its id, magnitude and
//! effectiveness), which is why bonus helpers on [`EffectContext`] key every
//! contribution by the instance's own [`BonusSource::Effect`].

use crate::bonus::{BonusCategory, BonusLedger, BonusSource, Statistic};
use crate::clock::GameTime;
use crate::effect::{
    ActorKind, CasterRef, EffectInstance, EffectSpec, EffectTag, ExpireReason, RestoreVars,
    Trigger,
};
use crate::error::{EffectError, EffectResult};
use crate::persistence::SavedEffect;
use crate::vitals::Vitals;
use aegis_common::{EffectId, EntityId};
use ahash::AHashMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// What a pulse asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseOutcome {
    /// Keep the instance running.
    Continue,
    /// Cancel the instance.
    Cancel,
}

/// Read-only view of a target, offered to the resist check.
#[derive(Debug, Clone, Copy)]
pub struct TargetView<'a> {
    /// Target id.
    pub id: EntityId,
    /// Target capability class.
    pub kind: ActorKind,
    /// Target health.
    pub vitals: &'a Vitals,
    /// Target bonuses.
    pub ledger: &'a BonusLedger,
    /// Who is applying.
    pub caster: Option<&'a CasterRef>,
    /// Requested effectiveness.
    pub effectiveness: f64,
}

/// Mutable access to a target's state for one hook invocation.
pub struct EffectContext<'a> {
    instance: &'a EffectInstance,
    ledger: &'a mut BonusLedger,
    vitals: &'a mut Vitals,
    now: GameTime,
}

impl<'a> EffectContext<'a> {
    pub(crate) fn new(
        instance: &'a EffectInstance,
        ledger: &'a mut BonusLedger,
        vitals: &'a mut Vitals,
        now: GameTime,
    ) -> Self {
        Self {
            instance,
            ledger,
            vitals,
            now,
        }
    }

    /// The instance the hook runs for.
    #[must_use]
    pub fn instance(&self) -> &EffectInstance {
        self.instance
    }

    /// Instance id.
    #[must_use]
    pub fn id(&self) -> EffectId {
        self.instance.id()
    }

    /// Target id.
    #[must_use]
    pub fn target(&self) -> EntityId {
        self.instance.target()
    }

    /// Caster reference.
    #[must_use]
    pub fn caster(&self) -> Option<&CasterRef> {
        self.instance.caster()
    }

    /// Logical time of the hook.
    #[must_use]
    pub fn now(&self) -> GameTime {
        self.now
    }

    /// Magnitude scaled by effectiveness.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.instance.effective_magnitude()
    }

    /// Effectiveness factor.
    #[must_use]
    pub fn effectiveness(&self) -> f64 {
        self.instance.effectiveness()
    }

    /// Whether the instance was rebuilt from a save.
    #[must_use]
    pub fn is_restored(&self) -> bool {
        self.instance.origin().restore_vars().is_some()
    }

    /// Target bonuses.
    #[must_use]
    pub fn ledger(&self) -> &BonusLedger {
        self.ledger
    }

    /// Target bonuses, mutable.
    pub fn ledger_mut(&mut self) -> &mut BonusLedger {
        self.ledger
    }

    /// Target health.
    #[must_use]
    pub fn vitals(&self) -> &Vitals {
        self.vitals
    }

    /// Target health, mutable.
    pub fn vitals_mut(&mut self) -> &mut Vitals {
        self.vitals
    }

    /// Set a contribution owned by this instance.
    pub fn set_bonus(&mut self, category: BonusCategory, stat: Statistic, value: f64) {
        let source = BonusSource::Effect(self.instance.id());
        self.ledger.set(category, stat, source, value);
    }

    /// Remove a contribution owned by this instance.
    pub fn remove_bonus(&mut self, category: BonusCategory, stat: Statistic) -> bool {
        let source = BonusSource::Effect(self.instance.id());
        self.ledger.remove(category, stat, source)
    }

    /// Recompute derived statistics after a bonus change.
    pub fn refresh_derived(&mut self) {
        self.vitals.recompute(self.ledger);
    }
}

/// Mutable access to a target for an instantaneous effect.
pub struct DirectContext<'a> {
    /// Target id.
    pub target: EntityId,
    /// Who applied it.
    pub caster: Option<&'a CasterRef>,
    /// Parameters computed by the handler.
    pub spec: &'a EffectSpec,
    /// Effectiveness factor.
    pub effectiveness: f64,
    /// Target bonuses.
    pub ledger: &'a mut BonusLedger,
    /// Target health.
    pub vitals: &'a mut Vitals,
    /// Logical time.
    pub now: GameTime,
}

impl DirectContext<'_> {
    /// Magnitude scaled by effectiveness.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.spec.magnitude * self.effectiveness
    }
}

/// Behaviour of one effect type.
///
/// Hooks run while the engine holds the target's exclusive section, so they
/// must not call back into the engine.
pub trait EffectHandler: Send + Sync {
    /// Tag this handler is registered under.
    fn tag(&self) -> EffectTag;

    /// Parameters for an application at the given effectiveness.
    fn spec(&self, effectiveness: f64) -> EffectSpec;

    /// Whether instances in the same non-zero group may coexist. A group
    /// stacks only while every member's handler says so.
    fn stackable(&self) -> bool {
        false
    }

    /// Priority of `incoming` relative to `existing` in the same group.
    /// `None` means the newer application always wins.
    fn compare(&self, _existing: &EffectInstance, _incoming: &EffectInstance) -> Option<Ordering> {
        None
    }

    /// Resist check; `false` rejects the application.
    fn check_target(&self, _target: &TargetView<'_>) -> bool {
        true
    }

    /// Triggers that interrupt an active instance.
    fn triggers(&self) -> &[Trigger] {
        &[]
    }

    /// A fresh instance starts.
    fn on_start(&self, ctx: &mut EffectContext<'_>);

    /// A saved instance is rebuilt.
    fn on_restore(&self, ctx: &mut EffectContext<'_>, _vars: &RestoreVars) {
        self.on_start(ctx);
    }

    /// Periodic tick of a pulsing instance.
    fn on_pulse(&self, _ctx: &mut EffectContext<'_>) -> PulseOutcome {
        PulseOutcome::Continue
    }

    /// An instantaneous application.
    fn on_direct(&self, _ctx: &mut DirectContext<'_>) {}

    /// The instance ends. Must undo every ledger change made by the start
    /// hook. Returns an immunity window in ms, 0 for none.
    fn on_expire(&self, ctx: &mut EffectContext<'_>, reason: ExpireReason, suppress_messages: bool) -> u64;

    /// Persistence record, `None` to not persist.
    fn save(&self, instance: &EffectInstance, remaining_ms: i64) -> Option<SavedEffect> {
        Some(SavedEffect::from_instance(instance, remaining_ms))
    }
}

/// Handlers by tag, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: AHashMap<EffectTag, Arc<dyn EffectHandler>>,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags = self.tags();
        tags.sort();
        f.debug_struct("HandlerTable").field("tags", &tags).finish()
    }
}

impl HandlerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its tag.
    pub fn register(&mut self, handler: Arc<dyn EffectHandler>) -> EffectResult<()> {
        let tag = handler.tag();
        if self.handlers.contains_key(&tag) {
            return Err(EffectError::DuplicateHandler(tag.name().to_string()));
        }
        self.handlers.insert(tag, handler);
        Ok(())
    }

    /// Builder form of [`Self::register`].
    pub fn with(mut self, handler: impl EffectHandler + 'static) -> EffectResult<Self> {
        self.register(Arc::new(handler))?;
        Ok(self)
    }

    /// Handler for a tag.
    #[must_use]
    pub fn get(&self, tag: EffectTag) -> Option<&Arc<dyn EffectHandler>> {
        self.handlers.get(&tag)
    }

    /// Handler for a tag name, as read back from persistence.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn EffectHandler>> {
        self.handlers
            .iter()
            .find(|(tag, _)| tag.name() == name)
            .map(|(_, handler)| handler)
    }

    /// Registered tags.
    #[must_use]
    pub fn tags(&self) -> Vec<EffectTag> {
        self.handlers.keys().copied().collect()
    }

    /// Number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
