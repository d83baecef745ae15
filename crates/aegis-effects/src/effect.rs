//! Effect instances and the small value types that describe them.

use crate::clock::GameTime;
use crate::living::Living;
use crate::subscription::Subscription;
use aegis_common::{EffectId, EntityId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};

// ============================================================================
// Identity
// ============================================================================

/// Effect-type tag. Handlers are looked up by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EffectTag(&'static str);

impl EffectTag {
    /// Create a tag.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Tag name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EffectTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Mutual-exclusivity group. Group 0 never conflicts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EffectGroup(pub u32);

impl EffectGroup {
    /// The independent group.
    pub const NONE: Self = Self(0);

    /// Whether instances in this group exclude each other.
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        self.0 != 0
    }
}

// ============================================================================
// Timing
// ============================================================================

/// Configured lifetime of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectDuration {
    /// Applied once, no instance is kept.
    Instant,
    /// Expires after the given milliseconds.
    Timed(u64),
    /// Lasts until cancelled.
    Infinite,
}

impl EffectDuration {
    /// Decode the signed millisecond form: 0 is instant, negative is
    /// infinite, positive is timed.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => Self::Instant,
            m if m < 0 => Self::Infinite,
            m => Self::Timed(m as u64),
        }
    }

    /// Signed millisecond form, inverse of [`Self::from_millis`].
    #[must_use]
    pub fn as_millis(self) -> i64 {
        match self {
            Self::Instant => 0,
            Self::Timed(ms) => i64::try_from(ms).unwrap_or(i64::MAX),
            Self::Infinite => -1,
        }
    }

    /// Timed effect of `millis`; zero is instant.
    #[must_use]
    pub const fn timed(millis: u64) -> Self {
        if millis == 0 {
            Self::Instant
        } else {
            Self::Timed(millis)
        }
    }

    /// Same duration with `Timed(0)` folded into `Instant`.
    #[must_use]
    pub const fn normalized(self) -> Self {
        match self {
            Self::Timed(ms) => Self::timed(ms),
            other => other,
        }
    }

    /// Whether this is an instantaneous effect.
    #[must_use]
    pub fn is_instant(self) -> bool {
        matches!(self, Self::Instant | Self::Timed(0))
    }

    /// Milliseconds until expiry for timed effects.
    #[must_use]
    pub fn timed_millis(self) -> Option<u64> {
        match self {
            Self::Timed(ms) => Some(ms),
            _ => None,
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectState {
    /// Being admitted, not yet started.
    Pending,
    /// Started and scheduled.
    Active,
    /// Teardown in progress.
    Expiring,
    /// Terminal.
    Removed,
}

impl EffectState {
    /// Only `Active` counts as present.
    #[must_use]
    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

/// External events an effect can be interrupted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    /// Target moved.
    Moved,
    /// Target was attacked.
    Attacked,
    /// Target attacked something.
    Attacking,
    /// Target started casting.
    CastSpell,
}

/// Why an instance was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancelCause {
    /// Removed by a dispel.
    Dispel,
    /// Target died.
    Death,
    /// The player clicked it off.
    Player,
    /// The handler asked to stop during a pulse.
    Handler,
    /// The caster stopped maintaining it.
    Concentration,
    /// Server-side removal.
    System,
}

/// Why an instance left `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpireReason {
    /// Duration ran out.
    Elapsed,
    /// Replaced by another instance of the same group.
    Overwritten,
    /// Cancelled explicitly.
    Cancelled(CancelCause),
    /// Interrupted by a subscribed trigger.
    Interrupted(Trigger),
    /// Target left the world.
    Despawned,
}

impl ExpireReason {
    /// Whether user-visible messaging should be skipped.
    #[must_use]
    pub fn suppresses_messages(self) -> bool {
        matches!(self, Self::Overwritten | Self::Despawned)
    }
}

/// Values carried over from a saved record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestoreVars {
    /// Saved base magnitude.
    pub magnitude: f64,
    /// Saved effectiveness.
    pub effectiveness: f64,
}

/// How an instance came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EffectOrigin {
    /// Freshly applied.
    Fresh,
    /// Rebuilt from persistence.
    Restored(RestoreVars),
}

impl EffectOrigin {
    /// Saved vars for restored instances.
    #[must_use]
    pub fn restore_vars(&self) -> Option<&RestoreVars> {
        match self {
            Self::Fresh => None,
            Self::Restored(vars) => Some(vars),
        }
    }
}

// ============================================================================
// Caster
// ============================================================================

/// Capability class of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    /// Player character.
    Player,
    /// Non-player character.
    Npc,
    /// Pet controlled by a player.
    Pet,
    /// Inanimate object.
    Object,
}

/// Read-only reference to whoever applied an effect. The caster may be
/// gone by the time the effect ends.
#[derive(Debug, Clone)]
pub struct CasterRef {
    id: EntityId,
    kind: ActorKind,
    handle: Weak<Living>,
}

impl CasterRef {
    /// Reference a living caster.
    #[must_use]
    pub fn new(living: &Arc<Living>) -> Self {
        Self {
            id: living.id(),
            kind: living.kind(),
            handle: Arc::downgrade(living),
        }
    }

    /// Reference a caster that is not a living entity (traps, scripts).
    #[must_use]
    pub fn detached(id: EntityId, kind: ActorKind) -> Self {
        Self {
            id,
            kind,
            handle: Weak::new(),
        }
    }

    /// Caster id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Caster capability class.
    #[must_use]
    pub fn kind(&self) -> ActorKind {
        self.kind
    }

    /// Whether the caster is a player.
    #[must_use]
    pub fn is_player(&self) -> bool {
        self.kind == ActorKind::Player
    }

    /// Resolve the caster if it still exists.
    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<Living>> {
        self.handle.upgrade()
    }
}

// ============================================================================
// Spec and instance
// ============================================================================

/// Parameters a handler computes for one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    /// Lifetime.
    pub duration: EffectDuration,
    /// Pulse period in ms, 0 for none.
    pub pulse_ms: u64,
    /// Base magnitude before effectiveness.
    pub magnitude: f64,
    /// Exclusivity group.
    pub group: EffectGroup,
    /// Beneficial effect (player may cancel it).
    pub positive: bool,
    /// Spell line key, carried into saves.
    pub spell_line: String,
    /// Concentration the caster spends to maintain it, 0 for none.
    #[serde(default)]
    pub concentration: u32,
}

impl EffectSpec {
    /// Timed effect.
    #[must_use]
    pub fn timed(millis: u64) -> Self {
        Self::with_duration(EffectDuration::timed(millis))
    }

    /// Instant effect.
    #[must_use]
    pub fn instant() -> Self {
        Self::with_duration(EffectDuration::Instant)
    }

    /// Effect lasting until cancelled.
    #[must_use]
    pub fn infinite() -> Self {
        Self::with_duration(EffectDuration::Infinite)
    }

    /// Positive, ungrouped, non-pulsing effect with the given duration.
    #[must_use]
    pub fn with_duration(duration: EffectDuration) -> Self {
        Self {
            duration: duration.normalized(),
            pulse_ms: 0,
            magnitude: 0.0,
            group: EffectGroup::NONE,
            positive: true,
            spell_line: String::new(),
            concentration: 0,
        }
    }

    /// Set the pulse period.
    #[must_use]
    pub fn pulse(mut self, millis: u64) -> Self {
        self.pulse_ms = millis;
        self
    }

    /// Set the magnitude.
    #[must_use]
    pub fn magnitude(mut self, magnitude: f64) -> Self {
        self.magnitude = magnitude;
        self
    }

    /// Set the group.
    #[must_use]
    pub fn group(mut self, group: EffectGroup) -> Self {
        self.group = group;
        self
    }

    /// Mark as harmful.
    #[must_use]
    pub fn negative(mut self) -> Self {
        self.positive = false;
        self
    }

    /// Set the spell line key.
    #[must_use]
    pub fn spell_line(mut self, line: impl Into<String>) -> Self {
        self.spell_line = line.into();
        self
    }

    /// Caster-maintained effect costing `cost` concentration.
    #[must_use]
    pub fn concentration(mut self, cost: u32) -> Self {
        self.concentration = cost;
        self
    }
}

/// One application of an effect on a target.
#[derive(Debug)]
pub struct EffectInstance {
    id: EffectId,
    tag: EffectTag,
    target: EntityId,
    caster: Option<CasterRef>,
    started_at: GameTime,
    spec: EffectSpec,
    effectiveness: f64,
    state: EffectState,
    origin: EffectOrigin,
    stackable: bool,
    subscriptions: Vec<Subscription>,
}

impl EffectInstance {
    /// Create a pending instance with a fresh id.
    #[must_use]
    pub fn new(
        tag: EffectTag,
        target: EntityId,
        caster: Option<CasterRef>,
        spec: EffectSpec,
        effectiveness: f64,
        origin: EffectOrigin,
        now: GameTime,
    ) -> Self {
        Self {
            id: EffectId::next(),
            tag,
            target,
            caster,
            started_at: now,
            spec,
            effectiveness,
            state: EffectState::Pending,
            origin,
            stackable: false,
            subscriptions: Vec::new(),
        }
    }

    /// Instance id.
    #[must_use]
    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Effect-type tag.
    #[must_use]
    pub fn tag(&self) -> EffectTag {
        self.tag
    }

    /// Owning target.
    #[must_use]
    pub fn target(&self) -> EntityId {
        self.target
    }

    /// Caster reference, if any.
    #[must_use]
    pub fn caster(&self) -> Option<&CasterRef> {
        self.caster.as_ref()
    }

    /// Time the instance was created.
    #[must_use]
    pub fn started_at(&self) -> GameTime {
        self.started_at
    }

    /// Application parameters.
    #[must_use]
    pub fn spec(&self) -> &EffectSpec {
        &self.spec
    }

    /// Configured duration.
    #[must_use]
    pub fn duration(&self) -> EffectDuration {
        self.spec.duration
    }

    /// Pulse period in ms.
    #[must_use]
    pub fn pulse_ms(&self) -> u64 {
        self.spec.pulse_ms
    }

    /// Exclusivity group.
    #[must_use]
    pub fn group(&self) -> EffectGroup {
        self.spec.group
    }

    /// Whether the effect is beneficial.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.spec.positive
    }

    /// Effectiveness factor.
    #[must_use]
    pub fn effectiveness(&self) -> f64 {
        self.effectiveness
    }

    /// Base magnitude.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.spec.magnitude
    }

    /// Magnitude scaled by effectiveness.
    #[must_use]
    pub fn effective_magnitude(&self) -> f64 {
        self.spec.magnitude * self.effectiveness
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> EffectState {
        self.state
    }

    /// True while `Active`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Fresh or restored.
    #[must_use]
    pub fn origin(&self) -> &EffectOrigin {
        &self.origin
    }

    /// Whether its handler lets it share a group with other stackable
    /// instances.
    #[must_use]
    pub fn is_stackable(&self) -> bool {
        self.stackable
    }

    /// Concentration cost paid by the caster, 0 for none.
    #[must_use]
    pub fn concentration(&self) -> u32 {
        self.spec.concentration
    }

    /// Caster-maintained: never overwritten, ends when the caster drops it.
    #[must_use]
    pub fn is_concentration(&self) -> bool {
        self.spec.concentration > 0
    }

    pub(crate) fn set_stackable(&mut self, stackable: bool) {
        self.stackable = stackable;
    }

    pub(crate) fn set_state(&mut self, state: EffectState) {
        self.state = state;
    }

    pub(crate) fn attach(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Drop every trigger subscription.
    pub(crate) fn release_subscriptions(&mut self) {
        self.subscriptions.clear();
    }

    /// Number of live trigger subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Cloneable read-only view.
    #[must_use]
    pub fn snapshot(&self) -> EffectSnapshot {
        EffectSnapshot {
            id: self.id,
            tag: self.tag,
            target: self.target,
            caster: self.caster.as_ref().map(CasterRef::id),
            started_at: self.started_at,
            duration: self.spec.duration,
            pulse_ms: self.spec.pulse_ms,
            magnitude: self.spec.magnitude,
            effectiveness: self.effectiveness,
            group: self.spec.group,
            positive: self.spec.positive,
            spell_line: self.spec.spell_line.clone(),
            concentration: self.spec.concentration,
            state: self.state,
            restored: matches!(self.origin, EffectOrigin::Restored(_)),
        }
    }
}

/// Read-only copy of an instance, returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectSnapshot {
    /// Instance id.
    pub id: EffectId,
    /// Effect-type tag.
    pub tag: EffectTag,
    /// Owning target.
    pub target: EntityId,
    /// Caster id.
    pub caster: Option<EntityId>,
    /// Creation time.
    pub started_at: GameTime,
    /// Configured duration.
    pub duration: EffectDuration,
    /// Pulse period in ms.
    pub pulse_ms: u64,
    /// Base magnitude.
    pub magnitude: f64,
    /// Effectiveness factor.
    pub effectiveness: f64,
    /// Exclusivity group.
    pub group: EffectGroup,
    /// Beneficial effect.
    pub positive: bool,
    /// Spell line key.
    pub spell_line: String,
    /// Concentration cost.
    pub concentration: u32,
    /// State at the time of the snapshot.
    pub state: EffectState,
    /// Rebuilt from persistence.
    pub restored: bool,
}
