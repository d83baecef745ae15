//! Scripted demonstration session.
//!
//! Three actors trade buffs, debuffs and crowd control on a fixed
//! timeline. One of them logs out and back in halfway through so that
//! persistence is exercised end to end.

use aegis_common::EntityId;
use aegis_effects::builtin::{CrowdControlHandler, PeriodicHandler, StatModifierHandler};
use aegis_effects::{
    ActorKind, ApplyOutcome, BonusCategory, DirectContext, EffectContext, EffectDuration,
    EffectEngine, EffectHandler, EffectSaveFile, EffectSpec, EffectTag, ExpireReason,
    HandlerTable, Statistic, Trigger, Vitals,
};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

// ============================================================================
// Effect tags
// ============================================================================

/// Strength buff.
pub const MIGHT: EffectTag = EffectTag::new("might");
/// Stronger strength buff in the same group.
pub const GREATER_MIGHT: EffectTag = EffectTag::new("greater_might");
/// Constitution buff that never runs out.
pub const FORTITUDE: EffectTag = EffectTag::new("fortitude");
/// Melee speed multiplier.
pub const HASTE: EffectTag = EffectTag::new("haste");
/// Heal over time.
pub const REGROWTH: EffectTag = EffectTag::new("regrowth");
/// Damage over time.
pub const POISON: EffectTag = EffectTag::new("poison");
/// Mesmerize, broken by damage.
pub const MEZ: EffectTag = EffectTag::new("mez");
/// Instant damage.
pub const SMITE: EffectTag = EffectTag::new("smite");

const MIGHT_GROUP: u32 = 1;
const MEZ_GROUP: u32 = 2;

/// Instant holy damage.
#[derive(Debug, Clone, Copy)]
struct SmiteHandler {
    damage: f64,
}

impl EffectHandler for SmiteHandler {
    fn tag(&self) -> EffectTag {
        SMITE
    }

    fn spec(&self, _effectiveness: f64) -> EffectSpec {
        EffectSpec::instant().magnitude(self.damage).negative()
    }

    fn on_start(&self, _ctx: &mut EffectContext<'_>) {}

    fn on_direct(&self, ctx: &mut DirectContext<'_>) {
        let amount = ctx.magnitude();
        ctx.vitals.take_damage(amount);
    }

    fn on_expire(&self, _ctx: &mut EffectContext<'_>, _reason: ExpireReason, _suppress_messages: bool) -> u64 {
        0
    }
}

/// Handler table for the demo.
pub fn handlers() -> Result<HandlerTable> {
    let table = HandlerTable::new()
        .with(
            StatModifierHandler::new(MIGHT, BonusCategory::Base, Statistic::Strength, 20.0)
                .duration(EffectDuration::Timed(10_000))
                .group(MIGHT_GROUP)
                .spell_line("strength")
                .ranked_by_magnitude(),
        )?
        .with(
            StatModifierHandler::new(GREATER_MIGHT, BonusCategory::Base, Statistic::Strength, 40.0)
                .duration(EffectDuration::Timed(10_000))
                .group(MIGHT_GROUP)
                .spell_line("strength")
                .ranked_by_magnitude(),
        )?
        .with(
            StatModifierHandler::new(
                FORTITUDE,
                BonusCategory::SpecBuff,
                Statistic::Constitution,
                25.0,
            )
            .duration(EffectDuration::Infinite),
        )?
        .with(
            StatModifierHandler::new(HASTE, BonusCategory::Multiplier, Statistic::MeleeSpeed, 1.3)
                .duration(EffectDuration::Timed(15_000)),
        )?
        .with(PeriodicHandler::heal(REGROWTH, 15.0, 2000, 12_000))?
        .with(PeriodicHandler::damage(POISON, 12.0, 2000, 10_000))?
        .with(
            CrowdControlHandler::new(MEZ, MEZ_GROUP, 8000)
                .immunity(15_000)
                .broken_by(Trigger::Attacked),
        )?
        .with(SmiteHandler { damage: 30.0 })?;
    Ok(table)
}

// ============================================================================
// Script
// ============================================================================

/// Participants, by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// Player healer
    Cleric,
    /// Player fighter
    Warrior,
    /// Hostile NPC
    Orc,
}

impl Actor {
    const fn index(self) -> usize {
        match self {
            Self::Cleric => 0,
            Self::Warrior => 1,
            Self::Orc => 2,
        }
    }

    const fn kind(self) -> ActorKind {
        match self {
            Self::Cleric | Self::Warrior => ActorKind::Player,
            Self::Orc => ActorKind::Npc,
        }
    }

    const fn max_health(self) -> f64 {
        match self {
            Self::Cleric => 120.0,
            Self::Warrior => 200.0,
            Self::Orc => 300.0,
        }
    }

    const ALL: [Self; 3] = [Self::Cleric, Self::Warrior, Self::Orc];
}

/// Something that happens in the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Cast `tag` from one actor on another.
    Cast {
        /// Caster
        caster: Actor,
        /// Target
        target: Actor,
        /// Effect
        tag: EffectTag,
    },
    /// Strike an actor, breaking effects that end on damage.
    Attack(Actor),
    /// The actor clicks off an effect.
    ClickOff(Actor, EffectTag),
    /// The actor logs out and back in.
    Relog(Actor),
    /// Print the actor's state.
    Report(Actor),
}

/// An action at a logical time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    /// Logical milliseconds since session start
    pub at_ms: u64,
    /// What happens
    pub action: Action,
}

const fn step(at_ms: u64, action: Action) -> Step {
    Step { at_ms, action }
}

const fn cast(caster: Actor, target: Actor, tag: EffectTag) -> Action {
    Action::Cast { caster, target, tag }
}

/// The default timeline.
#[must_use]
pub fn default_script() -> Vec<Step> {
    use Actor::{Cleric, Orc, Warrior};
    vec![
        step(0, cast(Cleric, Warrior, FORTITUDE)),
        step(0, cast(Cleric, Warrior, MIGHT)),
        step(500, cast(Cleric, Warrior, HASTE)),
        step(1000, cast(Cleric, Warrior, GREATER_MIGHT)),
        step(1500, cast(Cleric, Warrior, MIGHT)),
        step(2000, cast(Orc, Warrior, POISON)),
        step(2500, cast(Cleric, Orc, MEZ)),
        step(3000, Action::Report(Warrior)),
        step(4000, cast(Cleric, Warrior, REGROWTH)),
        step(5000, Action::Attack(Orc)),
        step(5500, cast(Cleric, Orc, MEZ)),
        step(6000, cast(Warrior, Orc, SMITE)),
        step(8000, Action::ClickOff(Warrior, HASTE)),
        step(9000, Action::Relog(Warrior)),
        step(9500, Action::Report(Warrior)),
        step(14_000, Action::Report(Warrior)),
        step(22_000, cast(Cleric, Orc, MEZ)),
        step(25_000, Action::Report(Orc)),
    ]
}

// ============================================================================
// Session
// ============================================================================

/// Runs a script against an engine as its clock advances.
pub struct Session {
    engine: Arc<EffectEngine>,
    actors: [EntityId; 3],
    script: VecDeque<Step>,
    rng: fastrand::Rng,
    relogs: usize,
}

impl Session {
    /// Create a new session with the default script.
    pub fn new(engine: Arc<EffectEngine>, seed: u64) -> Self {
        Self::with_script(engine, default_script(), seed)
    }

    /// Create a new session running `script`.
    pub fn with_script(engine: Arc<EffectEngine>, mut script: Vec<Step>, seed: u64) -> Self {
        script.sort_by_key(|step| step.at_ms);
        let actors = Actor::ALL.map(|actor| engine.spawn(actor.kind(), Vitals::new(actor.max_health())).id());
        Self {
            engine,
            actors,
            script: script.into(),
            rng: fastrand::Rng::with_seed(seed),
            relogs: 0,
        }
    }

    /// Current entity of `actor`.
    #[must_use]
    pub fn entity(&self, actor: Actor) -> EntityId {
        self.actors[actor.index()]
    }

    /// Whether every step has run.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.script.is_empty()
    }

    /// Number of completed logouts.
    #[must_use]
    pub fn relogs(&self) -> usize {
        self.relogs
    }

    /// Run every step due at the engine's current time.
    pub fn run_due(&mut self) -> Result<usize> {
        let now = self.engine.now().as_millis();
        let mut ran = 0;
        while self.script.front().is_some_and(|step| step.at_ms <= now) {
            if let Some(step) = self.script.pop_front() {
                self.perform(step.action)?;
                ran += 1;
            }
        }
        Ok(ran)
    }

    fn perform(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Cast { caster, target, tag } => {
                let caster = self.engine.caster_ref(self.entity(caster));
                let target_id = self.entity(target);
                // NPCs partially resist.
                let effectiveness = if target == Actor::Orc {
                    0.75 + self.rng.f64() * 0.25
                } else {
                    1.0
                };
                let outcome = self.engine.apply(caster.as_ref(), target_id, tag, effectiveness)?;
                if let ApplyOutcome::Rejected(reason) = outcome {
                    info!(%tag, entity = %target_id, ?reason, "cast failed");
                }
            },
            Action::Attack(target) => {
                self.engine.notify(self.entity(target), Trigger::Attacked);
            },
            Action::ClickOff(actor, tag) => {
                let id = self.entity(actor);
                if let Some(snapshot) = self.engine.find_active(id, tag) {
                    self.engine.cancel_by_player(id, snapshot.id);
                }
            },
            Action::Relog(actor) => self.relog(actor)?,
            Action::Report(actor) => self.report(actor),
        }
        Ok(())
    }

    /// Save, despawn, respawn and restore an actor.
    fn relog(&mut self, actor: Actor) -> Result<()> {
        let old = self.entity(actor);
        if self.engine.living(old).is_none() {
            warn!(entity = %old, "relog of missing actor");
            return Ok(());
        }

        let bytes = EffectSaveFile::new(old, self.engine.save_effects(old)).to_bytes()?;
        self.engine.despawn(old);

        let file = EffectSaveFile::from_bytes(&bytes)?;
        let new = self.engine.spawn(actor.kind(), Vitals::new(actor.max_health())).id();
        let outcomes = self.engine.restore_effects(new, &file.effects)?;
        let restored = outcomes.iter().filter(|outcome| outcome.is_applied()).count();

        info!(%old, %new, saved = file.effects.len(), restored, "actor relogged");
        self.actors[actor.index()] = new;
        self.relogs += 1;
        Ok(())
    }

    fn report(&self, actor: Actor) {
        let id = self.entity(actor);
        let (Some(vitals), Some(strength)) = (
            self.engine.vitals(id),
            self.engine.effective_value(id, Statistic::Strength),
        ) else {
            return;
        };
        let effects: Vec<String> = self
            .engine
            .active_effects(id)
            .into_iter()
            .map(|snapshot| {
                let remaining = self.engine.remaining(id, snapshot.id).unwrap_or(0);
                format!("{}({remaining}ms)", snapshot.tag)
            })
            .collect();
        info!(
            ?actor,
            entity = %id,
            health = vitals.health(),
            health_pct = vitals.health_percent(),
            max_health = vitals.max_health(),
            strength,
            concentration = self.engine.concentration_used(id),
            effects = %effects.join(", "),
            "status"
        );
    }
}
