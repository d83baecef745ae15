//! End-to-end scenarios driving the engine through its public surface.

use crate::builtin::{CrowdControlHandler, PeriodicHandler, StatModifierHandler};
use crate::prelude::*;
use aegis_common::EntityId;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MIGHT: EffectTag = EffectTag::new("might");
const GREATER_MIGHT: EffectTag = EffectTag::new("greater_might");
const RECORDER: EffectTag = EffectTag::new("recorder");
const MEZ: EffectTag = EffectTag::new("mez");
const POISON: EffectTag = EffectTag::new("poison");
const WARDING: EffectTag = EffectTag::new("warding");
const BULWARK: EffectTag = EffectTag::new("bulwark");

/// Records when each hook ran.
#[derive(Default)]
struct Recorder {
    starts: AtomicUsize,
    restores: AtomicUsize,
    pulses: Mutex<Vec<u64>>,
    expires: Mutex<Vec<(u64, ExpireReason)>>,
}

impl EffectHandler for Recorder {
    fn tag(&self) -> EffectTag {
        RECORDER
    }

    fn spec(&self, _effectiveness: f64) -> EffectSpec {
        EffectSpec::timed(10_000).pulse(2000).magnitude(1.0)
    }

    fn on_start(&self, _ctx: &mut EffectContext<'_>) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_restore(&self, _ctx: &mut EffectContext<'_>, _vars: &RestoreVars) {
        self.restores.fetch_add(1, Ordering::SeqCst);
    }

    fn on_pulse(&self, ctx: &mut EffectContext<'_>) -> PulseOutcome {
        self.pulses.lock().push(ctx.now().as_millis());
        PulseOutcome::Continue
    }

    fn on_expire(&self, ctx: &mut EffectContext<'_>, reason: ExpireReason, _suppress: bool) -> u64 {
        self.expires.lock().push((ctx.now().as_millis(), reason));
        0
    }
}

fn handlers(recorder: Arc<Recorder>) -> HandlerTable {
    let mut table = HandlerTable::new();
    table.register(recorder).unwrap();
    table
        .register(Arc::new(
            StatModifierHandler::new(MIGHT, BonusCategory::SpecBuff, Statistic::Strength, 20.0)
                .duration(EffectDuration::Timed(10_000))
                .group(1)
                .ranked_by_magnitude()
                .spell_line("Augmentation"),
        ))
        .unwrap();
    table
        .register(Arc::new(
            StatModifierHandler::new(
                GREATER_MIGHT,
                BonusCategory::SpecBuff,
                Statistic::Strength,
                50.0,
            )
            .duration(EffectDuration::Timed(5000))
            .group(1)
            .ranked_by_magnitude(),
        ))
        .unwrap();
    table
        .register(Arc::new(
            CrowdControlHandler::new(MEZ, 2, 6000)
                .immunity(60_000)
                .broken_by(Trigger::Attacked),
        ))
        .unwrap();
    table
        .register(Arc::new(PeriodicHandler::damage(POISON, 10.0, 1000, 4000)))
        .unwrap();
    table
        .register(Arc::new(
            StatModifierHandler::new(WARDING, BonusCategory::Base, Statistic::ArmorFactor, 15.0)
                .duration(EffectDuration::Timed(60_000))
                .group(3)
                .concentration(2),
        ))
        .unwrap();
    table
        .register(Arc::new(
            StatModifierHandler::new(BULWARK, BonusCategory::Base, Statistic::ArmorFactor, 40.0)
                .duration(EffectDuration::Timed(20_000))
                .group(3),
        ))
        .unwrap();
    table
}

fn setup() -> (EffectEngine, Arc<Recorder>, EntityId) {
    let recorder = Arc::new(Recorder::default());
    let engine = EffectEngine::new(EffectsConfig::default(), handlers(Arc::clone(&recorder)));
    let target = engine.spawn(ActorKind::Player, Vitals::new(200.0)).id();
    (engine, recorder, target)
}

fn strength(engine: &EffectEngine, target: EntityId) -> f64 {
    engine.effective_value(target, Statistic::Strength).unwrap()
}

#[test]
fn test_higher_priority_replaces_and_old_never_returns() {
    let (engine, _, target) = setup();

    let a = engine.apply(None, target, MIGHT, 1.0).unwrap();
    let a_id = a.effect_id().unwrap();
    assert!((strength(&engine, target) - 20.0).abs() < f64::EPSILON);

    engine.advance_to(GameTime::from_secs(1));
    let b = engine.apply(None, target, GREATER_MIGHT, 1.0).unwrap();
    assert_eq!(
        b,
        ApplyOutcome::Replaced {
            started: b.effect_id().unwrap(),
            replaced: vec![a_id],
        }
    );
    assert!(engine.find_active(target, MIGHT).is_none());
    assert!((strength(&engine, target) - 50.0).abs() < f64::EPSILON);

    engine.advance_to(GameTime::from_millis(5999));
    assert!((strength(&engine, target) - 50.0).abs() < f64::EPSILON);

    engine.advance_to(GameTime::from_secs(6));
    assert!(strength(&engine, target).abs() < f64::EPSILON);

    engine.advance_to(GameTime::from_secs(20));
    assert!(engine.find_active(target, MIGHT).is_none());
    assert!(strength(&engine, target).abs() < f64::EPSILON);
}

#[test]
fn test_lower_priority_is_blocked() {
    let (engine, _, target) = setup();
    let strong = engine
        .apply(None, target, GREATER_MIGHT, 1.0)
        .unwrap()
        .effect_id()
        .unwrap();

    let weak = engine.apply(None, target, MIGHT, 1.0).unwrap();
    assert_eq!(
        weak,
        ApplyOutcome::Rejected(RejectReason::Blocked { by: strong })
    );
    assert!((strength(&engine, target) - 50.0).abs() < f64::EPSILON);
}

#[test]
fn test_pulse_schedule() {
    let (engine, recorder, target) = setup();
    engine.apply(None, target, RECORDER, 1.0).unwrap();

    for _ in 0..40 {
        engine.advance_by(500);
    }

    assert_eq!(*recorder.pulses.lock(), vec![0, 2000, 4000, 6000, 8000]);
    assert_eq!(*recorder.expires.lock(), vec![(10_000, ExpireReason::Elapsed)]);
}

#[test]
fn test_pulse_schedule_with_one_big_step() {
    let (engine, recorder, target) = setup();
    engine.apply(None, target, RECORDER, 1.0).unwrap();
    engine.advance_by(60_000);

    assert_eq!(recorder.pulses.lock().len(), 5);
    assert_eq!(recorder.expires.lock().len(), 1);
}

#[test]
fn test_dead_target_skips_pulse_without_ending_effect() {
    let (engine, recorder, target) = setup();
    let id = engine.apply(None, target, RECORDER, 1.0).unwrap().effect_id().unwrap();

    engine
        .with_state(target, |state| state.vitals_mut().kill())
        .unwrap();
    engine.advance_to(GameTime::from_millis(4000));

    assert_eq!(*recorder.pulses.lock(), vec![0]);
    assert!(engine.remaining(target, id).is_some());
}

#[test]
fn test_concurrent_cancel_expires_once() {
    let (engine, recorder, target) = setup();
    let id = engine.apply(None, target, RECORDER, 1.0).unwrap().effect_id().unwrap();

    let wins = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                if engine.cancel(target, id, CancelCause::Dispel) {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.expires.lock().len(), 1);
    engine.advance_by(30_000);
    assert_eq!(recorder.expires.lock().len(), 1);
}

#[test]
fn test_cancel_races_natural_expiry() {
    let (engine, recorder, target) = setup();
    let id = engine.apply(None, target, RECORDER, 1.0).unwrap().effect_id().unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            engine.advance_to(GameTime::from_secs(10));
        });
        scope.spawn(|| {
            engine.cancel(target, id, CancelCause::System);
        });
    });

    assert_eq!(recorder.expires.lock().len(), 1);
}

#[test]
fn test_persisted_effect_resumes_remaining_time() {
    let (engine, _, target) = setup();
    engine.apply(None, target, MIGHT, 0.5).unwrap();

    engine.advance_to(GameTime::from_secs(3));
    let saved = engine.save_effects(target);
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].remaining_ms, 7000);
    assert_eq!(saved[0].spell_line, "Augmentation");

    let bytes = EffectSaveFile::new(target, saved).to_bytes().unwrap();
    engine.despawn(target);

    engine.advance_to(GameTime::from_secs(100));
    let relogged = engine.spawn(ActorKind::Player, Vitals::new(200.0)).id();
    let file = EffectSaveFile::from_bytes(&bytes).unwrap();
    let outcomes = engine.restore_effects(relogged, &file.effects).unwrap();
    assert!(outcomes[0].is_applied());

    let restored = engine.find_active(relogged, MIGHT).unwrap();
    assert!(restored.restored);
    assert!((strength(&engine, relogged) - 10.0).abs() < f64::EPSILON);

    engine.advance_to(GameTime::from_millis(106_999));
    assert!(engine.find_active(relogged, MIGHT).is_some());
    engine.advance_to(GameTime::from_millis(107_000));
    assert!(engine.find_active(relogged, MIGHT).is_none());
    assert!(strength(&engine, relogged).abs() < f64::EPSILON);
}

#[test]
fn test_restore_uses_restore_hook() {
    let (engine, recorder, target) = setup();
    engine.apply(None, target, RECORDER, 1.0).unwrap();
    engine.advance_to(GameTime::from_millis(2500));
    let saved = engine.save_effects(target);
    engine.despawn(target);

    let relogged = engine.spawn(ActorKind::Player, Vitals::default()).id();
    engine.restore_effects(relogged, &saved).unwrap();

    assert_eq!(recorder.starts.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.restores.load(Ordering::SeqCst), 1);
    let id = engine.find_active(relogged, RECORDER).unwrap().id;
    assert_eq!(engine.remaining(relogged, id), Some(7500));
}

#[test]
fn test_restore_rejects_unknown_records_up_front() {
    let (engine, _, target) = setup();
    let records = vec![
        SavedEffect {
            tag: "might".into(),
            remaining_ms: 5000,
            magnitude: 20.0,
            effectiveness: 1.0,
            spell_line: String::new(),
        },
        SavedEffect {
            tag: "retired_spell".into(),
            remaining_ms: 5000,
            magnitude: 1.0,
            effectiveness: 1.0,
            spell_line: String::new(),
        },
    ];

    assert_eq!(
        engine.restore_effects(target, &records),
        Err(EffectError::UnknownHandler("retired_spell".into()))
    );
    assert!(engine.active_effects(target).is_empty());

    assert_eq!(
        engine.restore_effects(EntityId::from_raw(u64::MAX), &records[..1]),
        Err(EffectError::UnknownEntity(EntityId::from_raw(u64::MAX)))
    );
}

#[test]
fn test_infinite_effect_round_trips() {
    let (engine, _, target) = setup();
    let records = vec![SavedEffect {
        tag: "might".into(),
        remaining_ms: -1,
        magnitude: 20.0,
        effectiveness: 1.0,
        spell_line: String::new(),
    }];
    engine.restore_effects(target, &records).unwrap();
    engine.advance_by(1_000_000);

    assert!(engine.find_active(target, MIGHT).is_some());
    assert_eq!(engine.save_effects(target)[0].remaining_ms, -1);
}

#[test]
fn test_restore_guards_effectiveness_like_apply() {
    let (engine, _, target) = setup();
    let record = |effectiveness: f64| SavedEffect {
        tag: "might".into(),
        remaining_ms: 5000,
        magnitude: 20.0,
        effectiveness,
        spell_line: String::new(),
    };

    let outcomes = engine.restore_effects(target, &[record(5.0)]).unwrap();
    assert!(outcomes[0].is_applied());
    let restored = engine.find_active(target, MIGHT).unwrap();
    assert!((restored.effectiveness - 1.0).abs() < f64::EPSILON);
    assert!((strength(&engine, target) - 20.0).abs() < f64::EPSILON);

    let other = engine.spawn(ActorKind::Player, Vitals::new(200.0)).id();
    for bad in [f64::NAN, 0.0, -2.0] {
        let outcomes = engine.restore_effects(other, &[record(bad)]).unwrap();
        assert_eq!(outcomes, vec![ApplyOutcome::Rejected(RejectReason::NoEffect)]);
    }
    assert!(engine.active_effects(other).is_empty());
    assert!(strength(&engine, other).abs() < f64::EPSILON);
}

#[test]
fn test_mez_breaks_on_attack_then_grants_immunity() {
    let (engine, _, target) = setup();
    engine
        .with_state(target, |state| state.ledger_mut().set_base(Statistic::MaxSpeed, 200.0))
        .unwrap();
    engine.apply(None, target, MEZ, 1.0).unwrap();
    assert!(engine
        .effective_value(target, Statistic::MaxSpeed)
        .unwrap()
        .abs()
        < f64::EPSILON);

    engine.advance_by(1000);
    assert_eq!(engine.notify(target, Trigger::Attacked), 1);
    assert!(engine.find_active(target, MEZ).is_none());

    let again = engine.apply(None, target, MEZ, 1.0).unwrap();
    assert_eq!(
        again,
        ApplyOutcome::Rejected(RejectReason::Immune {
            until: GameTime::from_secs(61)
        })
    );

    engine.advance_to(GameTime::from_secs(61));
    assert!(engine.apply(None, target, MEZ, 1.0).unwrap().is_applied());
    engine.advance_by(6000);
    assert!((engine.effective_value(target, Statistic::MaxSpeed).unwrap() - 200.0).abs() < f64::EPSILON);
}

#[test]
fn test_lethal_poison_stops_pulsing() {
    let (engine, _, _) = setup();
    let victim = engine.spawn(ActorKind::Npc, Vitals::new(25.0)).id();
    engine.apply(None, victim, POISON, 1.0).unwrap();

    engine.advance_by(10_000);
    let vitals = engine.vitals(victim).unwrap();
    assert!(!vitals.is_alive());
    assert!(engine.active_effects(victim).is_empty());
}

#[test]
fn test_first_pulse_can_end_the_effect() {
    let (engine, _, _) = setup();
    let victim = engine.spawn(ActorKind::Npc, Vitals::new(5.0)).id();
    engine.events().drain();

    let outcome = engine.apply(None, victim, POISON, 1.0).unwrap();
    let id = outcome.effect_id().unwrap();
    assert_eq!(outcome, ApplyOutcome::Expired(id));
    assert!(outcome.is_applied());
    assert!(engine.active_effects(victim).is_empty());
    assert_eq!(engine.scheduled_count(), 0);

    let events = engine.events().drain();
    assert!(matches!(events[0], EffectEvent::Started { effect, .. } if effect == id));
    assert!(matches!(events[1], EffectEvent::Pulsed { .. }));
    assert!(matches!(
        events[2],
        EffectEvent::Expired {
            reason: ExpireReason::Cancelled(CancelCause::Handler),
            ..
        }
    ));
}

fn armor(engine: &EffectEngine, target: EntityId) -> f64 {
    engine.effective_value(target, Statistic::ArmorFactor).unwrap()
}

#[test]
fn test_concentration_effect_is_not_overwritten() {
    let (engine, _, target) = setup();
    let caster = engine.spawn(ActorKind::Player, Vitals::new(100.0)).id();
    let caster_ref = engine.caster_ref(caster).unwrap();

    let ward = engine
        .apply(Some(&caster_ref), target, WARDING, 1.0)
        .unwrap()
        .effect_id()
        .unwrap();
    assert_eq!(engine.concentration_effects(caster), vec![ward]);
    assert_eq!(engine.concentration_used(caster), 2);
    assert_eq!(engine.find_active(target, WARDING).unwrap().concentration, 2);

    assert_eq!(
        engine.apply(None, target, BULWARK, 1.0).unwrap(),
        ApplyOutcome::Rejected(RejectReason::Blocked { by: ward })
    );
    assert_eq!(
        engine.apply(Some(&caster_ref), target, WARDING, 1.0).unwrap(),
        ApplyOutcome::Rejected(RejectReason::Blocked { by: ward })
    );
    assert!((armor(&engine, target) - 15.0).abs() < f64::EPSILON);

    engine.advance_to(GameTime::from_secs(60));
    assert!(engine.find_active(target, WARDING).is_none());
    assert!(engine.concentration_effects(caster).is_empty());
    assert_eq!(engine.concentration_used(caster), 0);
}

#[test]
fn test_caster_despawn_ends_concentration() {
    let (engine, _, target) = setup();
    let other = engine.spawn(ActorKind::Player, Vitals::new(200.0)).id();
    let caster = engine.spawn(ActorKind::Player, Vitals::new(100.0)).id();
    let caster_ref = engine.caster_ref(caster).unwrap();
    engine.apply(Some(&caster_ref), target, WARDING, 1.0).unwrap();
    engine.apply(Some(&caster_ref), other, WARDING, 1.0).unwrap();
    engine.apply(Some(&caster_ref), other, MIGHT, 1.0).unwrap();
    assert_eq!(engine.concentration_used(caster), 4);
    engine.events().drain();

    assert!(engine.despawn(caster));
    assert!(engine.find_active(target, WARDING).is_none());
    assert!(engine.find_active(other, WARDING).is_none());
    assert!(engine.find_active(other, MIGHT).is_some());
    assert!(armor(&engine, target).abs() < f64::EPSILON);
    assert!(armor(&engine, other).abs() < f64::EPSILON);
    assert_eq!(engine.concentration_used(caster), 0);

    let dropped = engine
        .events()
        .drain()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                EffectEvent::Expired {
                    reason: ExpireReason::Cancelled(CancelCause::Concentration),
                    ..
                }
            )
        })
        .count();
    assert_eq!(dropped, 2);
}

#[test]
fn test_cancel_concentration_counts_live_effects() {
    let (engine, _, target) = setup();
    let other = engine.spawn(ActorKind::Player, Vitals::new(200.0)).id();
    let caster = engine.spawn(ActorKind::Player, Vitals::new(100.0)).id();
    let caster_ref = engine.caster_ref(caster).unwrap();
    let first = engine
        .apply(Some(&caster_ref), target, WARDING, 1.0)
        .unwrap()
        .effect_id()
        .unwrap();
    engine.apply(Some(&caster_ref), other, WARDING, 1.0).unwrap();

    assert!(engine.cancel(target, first, CancelCause::Dispel));
    assert_eq!(engine.concentration_used(caster), 2);
    assert_eq!(engine.cancel_concentration(caster), 1);
    assert_eq!(engine.cancel_concentration(caster), 0);
    assert!(engine.active_effects(other).is_empty());

    engine.apply(Some(&caster_ref), other, WARDING, 1.0).unwrap();
    engine.handle_death(caster);
    assert!(engine.find_active(other, WARDING).is_none());
}

#[test]
fn test_concentration_effects_are_not_saved() {
    let (engine, _, target) = setup();
    let caster = engine.spawn(ActorKind::Player, Vitals::new(100.0)).id();
    let caster_ref = engine.caster_ref(caster).unwrap();
    engine.apply(Some(&caster_ref), target, WARDING, 1.0).unwrap();
    engine.apply(None, target, MIGHT, 1.0).unwrap();

    let saved = engine.save_effects(target);
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].tag, "might");
}

#[test]
fn test_targets_are_independent() {
    let (engine, _, first) = setup();
    let second = engine.spawn(ActorKind::Npc, Vitals::default()).id();

    engine.apply(None, first, MIGHT, 1.0).unwrap();
    engine.apply(None, second, GREATER_MIGHT, 1.0).unwrap();

    assert!((strength(&engine, first) - 20.0).abs() < f64::EPSILON);
    assert!((strength(&engine, second) - 50.0).abs() < f64::EPSILON);
    assert!(engine.find_active(first, MIGHT).is_some());
}

#[test]
fn test_stress_many_threads() {
    let (engine, _, _) = setup();
    let targets: Vec<EntityId> = (0..4)
        .map(|_| engine.spawn(ActorKind::Npc, Vitals::new(1000.0)).id())
        .collect();

    std::thread::scope(|scope| {
        for worker in 0..4usize {
            let engine = &engine;
            let targets = &targets;
            scope.spawn(move || {
                for round in 0..50 {
                    let target = targets[(worker + round) % targets.len()];
                    let tag = if round % 2 == 0 { MIGHT } else { GREATER_MIGHT };
                    if let Ok(outcome) = engine.apply(None, target, tag, 1.0) {
                        if round % 3 == 0 {
                            if let Some(id) = outcome.effect_id() {
                                engine.cancel(target, id, CancelCause::Dispel);
                            }
                        }
                    }
                    if worker == 0 {
                        engine.advance_by(250);
                    }
                }
            });
        }
    });

    for &target in &targets {
        let in_group = engine
            .with_state(target, |state| {
                state.registry().active_in_group(EffectGroup(1)).count()
            })
            .unwrap();
        assert!(in_group <= 1);
    }

    engine.advance_by(60_000);
    for &target in &targets {
        assert!(strength(&engine, target).abs() < f64::EPSILON);
        assert!(engine.with_state(target, |s| s.ledger().is_empty()).unwrap());
    }
}

#[derive(Debug, Clone)]
enum Op {
    Apply(usize, f64),
    CancelNewest,
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3, 0.1f64..1.0).prop_map(|(h, e)| Op::Apply(h, e)),
        Just(Op::CancelNewest),
        (0u64..4000).prop_map(Op::Advance),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_group_exclusivity_holds(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (engine, _, target) = setup();
        let tags = [MIGHT, GREATER_MIGHT, MEZ];

        for op in ops {
            match op {
                Op::Apply(h, e) => {
                    engine.apply(None, target, tags[h], e).unwrap();
                }
                Op::CancelNewest => {
                    if let Some(newest) = engine.active_effects(target).last() {
                        engine.cancel(target, newest.id, CancelCause::Dispel);
                    }
                }
                Op::Advance(ms) => {
                    engine.advance_by(ms);
                }
            }

            for group in [EffectGroup(1), EffectGroup(2)] {
                let count = engine
                    .with_state(target, |s| s.registry().active_in_group(group).count())
                    .unwrap();
                prop_assert!(count <= 1);
            }
        }

        engine.advance_by(120_000);
        prop_assert!(strength(&engine, target).abs() < 1e-9);
        prop_assert!(engine.active_effects(target).is_empty());
    }
}
