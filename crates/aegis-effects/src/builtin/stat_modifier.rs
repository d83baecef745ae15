//! Property-changing buffs and debuffs.

use crate::bonus::{BonusCategory, Statistic};
use crate::effect::{EffectDuration, EffectGroup, EffectInstance, EffectSpec, EffectTag, ExpireReason};
use crate::handler::{EffectContext, EffectHandler};
use std::cmp::Ordering;

/// Adds one value to one or more statistics in a single category for the
/// lifetime of the effect.
#[derive(Debug, Clone)]
pub struct StatModifierHandler {
    tag: EffectTag,
    category: BonusCategory,
    stats: Vec<Statistic>,
    value: f64,
    duration: EffectDuration,
    group: EffectGroup,
    positive: bool,
    spell_line: String,
    ranked: bool,
    concentration: u32,
}

impl StatModifierHandler {
    /// Create a modifier of `value` on `stat`. Debuff categories are
    /// negative effects; everything else is positive.
    #[must_use]
    pub fn new(tag: EffectTag, category: BonusCategory, stat: Statistic, value: f64) -> Self {
        Self {
            tag,
            category,
            stats: vec![stat],
            value,
            duration: EffectDuration::Timed(30_000),
            group: EffectGroup::NONE,
            positive: !category.is_debuff(),
            spell_line: String::new(),
            ranked: false,
            concentration: 0,
        }
    }

    /// Also modify `stat`.
    #[must_use]
    pub fn also(mut self, stat: Statistic) -> Self {
        if !self.stats.contains(&stat) {
            self.stats.push(stat);
        }
        self
    }

    /// Set the duration.
    #[must_use]
    pub fn duration(mut self, duration: EffectDuration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the exclusivity group.
    #[must_use]
    pub fn group(mut self, group: u32) -> Self {
        self.group = EffectGroup(group);
        self
    }

    /// Set the spell line key.
    #[must_use]
    pub fn spell_line(mut self, line: impl Into<String>) -> Self {
        self.spell_line = line.into();
        self
    }

    /// Within its group, a weaker application cannot replace a stronger one.
    #[must_use]
    pub fn ranked_by_magnitude(mut self) -> Self {
        self.ranked = true;
        self
    }

    /// Have the caster maintain it at `cost` concentration.
    #[must_use]
    pub fn concentration(mut self, cost: u32) -> Self {
        self.concentration = cost;
        self
    }

    /// Affected statistics.
    #[must_use]
    pub fn stats(&self) -> &[Statistic] {
        &self.stats
    }

    /// Ledger value for a context. Multipliers scale their distance from
    /// 1.0 rather than the factor itself.
    fn contribution(&self, ctx: &EffectContext<'_>) -> f64 {
        if self.category.is_multiplicative() {
            1.0 + (ctx.instance().magnitude() - 1.0) * ctx.effectiveness()
        } else {
            ctx.magnitude()
        }
    }

    fn touches_max_health(&self) -> bool {
        self.stats.iter().any(|stat| stat.affects_max_health())
    }
}

impl EffectHandler for StatModifierHandler {
    fn tag(&self) -> EffectTag {
        self.tag
    }

    fn spec(&self, _effectiveness: f64) -> EffectSpec {
        let spec = EffectSpec::with_duration(self.duration)
            .magnitude(self.value)
            .group(self.group)
            .spell_line(self.spell_line.clone())
            .concentration(self.concentration);
        if self.positive {
            spec
        } else {
            spec.negative()
        }
    }

    fn compare(&self, existing: &EffectInstance, incoming: &EffectInstance) -> Option<Ordering> {
        self.ranked.then(|| {
            incoming
                .effective_magnitude()
                .total_cmp(&existing.effective_magnitude())
        })
    }

    fn on_start(&self, ctx: &mut EffectContext<'_>) {
        let value = self.contribution(ctx);
        for &stat in &self.stats {
            ctx.set_bonus(self.category, stat, value);
        }
        if self.touches_max_health() {
            ctx.refresh_derived();
        }
    }

    fn on_expire(&self, ctx: &mut EffectContext<'_>, _reason: ExpireReason, _suppress_messages: bool) -> u64 {
        for &stat in &self.stats {
            ctx.remove_bonus(self.category, stat);
        }
        if self.touches_max_health() {
            ctx.refresh_derived();
        }
        0
    }
}
