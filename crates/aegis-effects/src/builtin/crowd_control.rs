//! Stuns, mezzes, roots and snares.

use crate::bonus::{BonusCategory, Statistic};
use crate::effect::{ActorKind, EffectGroup, EffectSpec, EffectTag, ExpireReason, Trigger};
use crate::handler::{EffectContext, EffectHandler, TargetView};

/// Slows or stops movement for a while, then leaves the target immune to
/// the same group for a window.
#[derive(Debug, Clone)]
pub struct CrowdControlHandler {
    tag: EffectTag,
    group: EffectGroup,
    duration_ms: u64,
    immunity_ms: u64,
    speed_factor: f64,
    triggers: Vec<Trigger>,
}

impl CrowdControlHandler {
    /// Full stop for `duration_ms` in `group`.
    #[must_use]
    pub fn new(tag: EffectTag, group: u32, duration_ms: u64) -> Self {
        Self {
            tag,
            group: EffectGroup(group),
            duration_ms,
            immunity_ms: 0,
            speed_factor: 0.0,
            triggers: Vec::new(),
        }
    }

    /// Immunity window after the effect ends.
    #[must_use]
    pub fn immunity(mut self, millis: u64) -> Self {
        self.immunity_ms = millis;
        self
    }

    /// Movement multiplier while active (0.0 roots, 0.5 halves).
    #[must_use]
    pub fn speed_factor(mut self, factor: f64) -> Self {
        self.speed_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Break the effect when `trigger` happens to the target.
    #[must_use]
    pub fn broken_by(mut self, trigger: Trigger) -> Self {
        if !self.triggers.contains(&trigger) {
            self.triggers.push(trigger);
        }
        self
    }
}

impl EffectHandler for CrowdControlHandler {
    fn tag(&self) -> EffectTag {
        self.tag
    }

    /// Partial resists shorten the effect.
    fn spec(&self, effectiveness: f64) -> EffectSpec {
        let duration = ((self.duration_ms as f64 * effectiveness) as u64).max(1);
        EffectSpec::timed(duration)
            .magnitude(self.speed_factor)
            .group(self.group)
            .negative()
    }

    fn check_target(&self, target: &TargetView<'_>) -> bool {
        target.kind != ActorKind::Object
    }

    fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    fn on_start(&self, ctx: &mut EffectContext<'_>) {
        let factor = ctx.instance().magnitude();
        ctx.set_bonus(BonusCategory::Multiplier, Statistic::MaxSpeed, factor);
    }

    fn on_expire(&self, ctx: &mut EffectContext<'_>, _reason: ExpireReason, _suppress_messages: bool) -> u64 {
        ctx.remove_bonus(BonusCategory::Multiplier, Statistic::MaxSpeed);
        self.immunity_ms
    }
}
