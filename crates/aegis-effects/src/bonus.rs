//! Stat-bonus ledger.
//!
//! The ledger stores raw contributions keyed by `(category, statistic,
//! source)` and aggregates them on demand. It never stores derived totals;
//! callers that depend on a statistic (max health, for example) recompute
//! after mutating it.
//!
//! Aggregation order for a statistic:
//! 1. intrinsic base value (`set_base`)
//! 2. additive buffs: `Base`, `SpecBuff`, `Other`, `Ability`
//! 3. debuffs: `Debuff`, `SpecDebuff` (magnitudes, subtracted)
//! 4. `Multiplier` factors (1.0 is neutral), applied to the whole sum

use aegis_common::EffectId;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

// ============================================================================
// Statistics
// ============================================================================

/// A statistic that bonuses can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Statistic {
    /// Strength.
    Strength,
    /// Constitution, feeds max health.
    Constitution,
    /// Dexterity.
    Dexterity,
    /// Quickness.
    Quickness,
    /// Intelligence.
    Intelligence,
    /// Piety.
    Piety,
    /// Empathy.
    Empathy,
    /// Charisma.
    Charisma,
    /// Flat maximum health.
    MaxHealth,
    /// Armor factor.
    ArmorFactor,
    /// Armor absorption percentage.
    ArmorAbsorption,
    /// Body resist.
    ResistBody,
    /// Spirit resist.
    ResistSpirit,
    /// Energy resist.
    ResistEnergy,
    /// Heat resist.
    ResistHeat,
    /// Cold resist.
    ResistCold,
    /// Matter resist.
    ResistMatter,
    /// Melee swing speed.
    MeleeSpeed,
    /// Casting speed.
    CastingSpeed,
    /// Movement speed.
    MaxSpeed,
    /// Health regeneration rate.
    HealthRegen,
    /// Duration of cast spells.
    SpellDuration,
}

impl Statistic {
    /// Every statistic, in declaration order.
    pub const ALL: [Statistic; 22] = [
        Self::Strength,
        Self::Constitution,
        Self::Dexterity,
        Self::Quickness,
        Self::Intelligence,
        Self::Piety,
        Self::Empathy,
        Self::Charisma,
        Self::MaxHealth,
        Self::ArmorFactor,
        Self::ArmorAbsorption,
        Self::ResistBody,
        Self::ResistSpirit,
        Self::ResistEnergy,
        Self::ResistHeat,
        Self::ResistCold,
        Self::ResistMatter,
        Self::MeleeSpeed,
        Self::CastingSpeed,
        Self::MaxSpeed,
        Self::HealthRegen,
        Self::SpellDuration,
    ];

    /// Whether a change to this statistic requires a max-health recompute.
    #[must_use]
    pub fn affects_max_health(self) -> bool {
        matches!(self, Self::Constitution | Self::MaxHealth)
    }
}

// ============================================================================
// Categories and sources
// ============================================================================

/// Aggregation bucket for a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BonusCategory {
    /// Single-statistic base buffs.
    Base,
    /// Specialization-line buffs.
    SpecBuff,
    /// Item and miscellaneous bonuses.
    Other,
    /// Realm ability bonuses.
    Ability,
    /// Base debuffs, stored as positive magnitudes.
    Debuff,
    /// Specialization-line debuffs, stored as positive magnitudes.
    SpecDebuff,
    /// Multiplicative factors.
    Multiplier,
}

impl BonusCategory {
    /// Fixed aggregation order.
    pub const ORDER: [BonusCategory; 7] = [
        Self::Base,
        Self::SpecBuff,
        Self::Other,
        Self::Ability,
        Self::Debuff,
        Self::SpecDebuff,
        Self::Multiplier,
    ];

    /// Contributions are summed.
    #[must_use]
    pub fn is_additive(self) -> bool {
        matches!(self, Self::Base | Self::SpecBuff | Self::Other | Self::Ability)
    }

    /// Contributions are subtracted magnitudes.
    #[must_use]
    pub fn is_debuff(self) -> bool {
        matches!(self, Self::Debuff | Self::SpecDebuff)
    }

    /// Contributions are multiplied.
    #[must_use]
    pub fn is_multiplicative(self) -> bool {
        self == Self::Multiplier
    }
}

/// Owner of a ledger contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BonusSource {
    /// An active effect instance.
    Effect(EffectId),
    /// An equipped item, by slot or template id.
    Item(u32),
    /// A trained ability.
    Ability(u32),
    /// A realm-wide bonus.
    Realm(u32),
}

impl fmt::Display for BonusSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Effect(id) => write!(f, "{id}"),
            Self::Item(id) => write!(f, "item#{id}"),
            Self::Ability(id) => write!(f, "ability#{id}"),
            Self::Realm(id) => write!(f, "realm#{id}"),
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Per-entity table of stat contributions.
#[derive(Debug, Clone, Default)]
pub struct BonusLedger {
    base: AHashMap<Statistic, f64>,
    entries: AHashMap<(BonusCategory, Statistic), AHashMap<BonusSource, f64>>,
}

impl BonusLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the intrinsic value of a statistic.
    pub fn set_base(&mut self, stat: Statistic, value: f64) {
        self.base.insert(stat, value);
    }

    /// Intrinsic value of a statistic (zero when unset).
    #[must_use]
    pub fn base(&self, stat: Statistic) -> f64 {
        self.base.get(&stat).copied().unwrap_or(0.0)
    }

    /// Upsert a contribution. A second `set` from the same source replaces
    /// the first.
    pub fn set(&mut self, category: BonusCategory, stat: Statistic, source: BonusSource, value: f64) {
        self.entries
            .entry((category, stat))
            .or_default()
            .insert(source, value);
    }

    /// Remove a contribution. Returns false, and logs, if nothing was there.
    pub fn remove(&mut self, category: BonusCategory, stat: Statistic, source: BonusSource) -> bool {
        let key = (category, stat);
        let removed = match self.entries.get_mut(&key) {
            Some(sources) => {
                let removed = sources.remove(&source).is_some();
                if sources.is_empty() {
                    self.entries.remove(&key);
                }
                removed
            }
            None => false,
        };

        if !removed {
            warn!(
                ?category,
                ?stat,
                %source,
                "ledger underflow: remove without a matching set"
            );
        }
        removed
    }

    /// Value contributed by one source, if any.
    #[must_use]
    pub fn contribution(
        &self,
        category: BonusCategory,
        stat: Statistic,
        source: BonusSource,
    ) -> Option<f64> {
        self.entries
            .get(&(category, stat))
            .and_then(|sources| sources.get(&source).copied())
    }

    /// Sum of one category for a statistic (product for `Multiplier`).
    #[must_use]
    pub fn category_total(&self, category: BonusCategory, stat: Statistic) -> f64 {
        let values = self
            .entries
            .get(&(category, stat))
            .into_iter()
            .flat_map(|sources| sources.values().copied());

        if category.is_multiplicative() {
            values.product()
        } else {
            values.sum()
        }
    }

    /// Base plus additive buffs minus debuffs, before multipliers.
    #[must_use]
    pub fn additive_value(&self, stat: Statistic) -> f64 {
        BonusCategory::ORDER
            .iter()
            .fold(self.base(stat), |total, &category| {
                if category.is_additive() {
                    total + self.category_total(category, stat)
                } else if category.is_debuff() {
                    total - self.category_total(category, stat)
                } else {
                    total
                }
            })
    }

    /// Combined multiplier for a statistic (1.0 when none).
    #[must_use]
    pub fn multiplier(&self, stat: Statistic) -> f64 {
        self.category_total(BonusCategory::Multiplier, stat)
    }

    /// Effective value of a statistic across every category.
    #[must_use]
    pub fn effective_value(&self, stat: Statistic) -> f64 {
        self.additive_value(stat) * self.multiplier(stat)
    }

    /// Every contribution currently owned by `source`.
    #[must_use]
    pub fn sources_for(&self, source: BonusSource) -> Vec<(BonusCategory, Statistic, f64)> {
        let mut found: Vec<_> = self
            .entries
            .iter()
            .filter_map(|(&(category, stat), sources)| {
                sources.get(&source).map(|&value| (category, stat, value))
            })
            .collect();
        found.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        found
    }

    /// Drop every contribution owned by `source`. Returns how many were removed.
    pub fn purge_source(&mut self, source: BonusSource) -> usize {
        let mut purged = 0;
        self.entries.retain(|_, sources| {
            if sources.remove(&source).is_some() {
                purged += 1;
            }
            !sources.is_empty()
        });
        purged
    }

    /// Number of stored contributions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(|sources| sources.len()).sum()
    }

    /// True when no contribution is stored. Base values are not counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every contribution, keeping base values.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
