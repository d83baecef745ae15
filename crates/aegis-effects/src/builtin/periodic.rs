//! Heal and damage over time.

use crate::effect::{EffectDuration, EffectGroup, EffectSpec, EffectTag, ExpireReason};
use crate::handler::{EffectContext, EffectHandler, PulseOutcome};

/// Changes health by a fixed amount every pulse.
#[derive(Debug, Clone)]
pub struct PeriodicHandler {
    tag: EffectTag,
    amount: f64,
    period_ms: u64,
    duration: EffectDuration,
    group: EffectGroup,
    stackable: bool,
}

impl PeriodicHandler {
    /// Heal `amount` every `period_ms` for `duration_ms`.
    #[must_use]
    pub fn heal(tag: EffectTag, amount: f64, period_ms: u64, duration_ms: u64) -> Self {
        Self {
            tag,
            amount: amount.abs(),
            period_ms,
            duration: EffectDuration::Timed(duration_ms),
            group: EffectGroup::NONE,
            stackable: false,
        }
    }

    /// Deal `amount` damage every `period_ms` for `duration_ms`.
    #[must_use]
    pub fn damage(tag: EffectTag, amount: f64, period_ms: u64, duration_ms: u64) -> Self {
        Self {
            amount: -amount.abs(),
            ..Self::heal(tag, amount, period_ms, duration_ms)
        }
    }

    /// Set the exclusivity group.
    #[must_use]
    pub fn group(mut self, group: u32) -> Self {
        self.group = EffectGroup(group);
        self
    }

    /// Let several instances in the group run side by side.
    #[must_use]
    pub fn stacking(mut self) -> Self {
        self.stackable = true;
        self
    }

    fn is_heal(&self) -> bool {
        self.amount >= 0.0
    }
}

impl EffectHandler for PeriodicHandler {
    fn tag(&self) -> EffectTag {
        self.tag
    }

    fn spec(&self, _effectiveness: f64) -> EffectSpec {
        let spec = EffectSpec::with_duration(self.duration)
            .pulse(self.period_ms)
            .magnitude(self.amount.abs())
            .group(self.group);
        if self.is_heal() {
            spec
        } else {
            spec.negative()
        }
    }

    fn stackable(&self) -> bool {
        self.stackable
    }

    fn on_start(&self, _ctx: &mut EffectContext<'_>) {}

    fn on_pulse(&self, ctx: &mut EffectContext<'_>) -> PulseOutcome {
        let amount = ctx.magnitude();
        if self.is_heal() {
            ctx.vitals_mut().heal(amount);
        } else {
            ctx.vitals_mut().take_damage(amount);
        }

        if ctx.vitals().is_alive() {
            PulseOutcome::Continue
        } else {
            PulseOutcome::Cancel
        }
    }

    fn on_expire(&self, _ctx: &mut EffectContext<'_>, _reason: ExpireReason, _suppress_messages: bool) -> u64 {
        0
    }
}
