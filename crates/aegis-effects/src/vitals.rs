//! Health state and derived statistics.

use crate::bonus::{BonusLedger, Statistic};
use serde::{Deserialize, Serialize};

/// Health granted per point of effective Constitution.
pub const HEALTH_PER_CONSTITUTION: f64 = 4.0;

/// Lowest max health a living entity can be reduced to.
pub const MIN_MAX_HEALTH: f64 = 1.0;

/// Statistics derived from the ledger. Recomputed by callers after they
/// mutate a statistic the derivation depends on.
pub struct DerivedStats;

impl DerivedStats {
    /// Max health from flat bonuses and Constitution, scaled by the
    /// MaxHealth multiplier.
    #[must_use]
    pub fn max_health(ledger: &BonusLedger) -> f64 {
        let flat = ledger.additive_value(Statistic::MaxHealth)
            + ledger.effective_value(Statistic::Constitution) * HEALTH_PER_CONSTITUTION;
        (flat * ledger.multiplier(Statistic::MaxHealth)).max(MIN_MAX_HEALTH)
    }
}

/// Current health of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    health: f64,
    max_health: f64,
    alive: bool,
}

impl Default for Vitals {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl Vitals {
    /// Create full-health vitals.
    #[must_use]
    pub fn new(max_health: f64) -> Self {
        let max_health = max_health.max(MIN_MAX_HEALTH);
        Self {
            health: max_health,
            max_health,
            alive: true,
        }
    }

    /// Current health.
    #[must_use]
    pub fn health(&self) -> f64 {
        self.health
    }

    /// Maximum health.
    #[must_use]
    pub fn max_health(&self) -> f64 {
        self.max_health
    }

    /// Whether the entity is alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Health as a fraction of max (0.0-1.0).
    #[must_use]
    pub fn health_percent(&self) -> f64 {
        (self.health / self.max_health).clamp(0.0, 1.0)
    }

    /// Restore health, capped at max. Returns the amount actually healed.
    pub fn heal(&mut self, amount: f64) -> f64 {
        if !self.alive || amount <= 0.0 {
            return 0.0;
        }
        let before = self.health;
        self.health = (self.health + amount).min(self.max_health);
        self.health - before
    }

    /// Take damage. Health reaching zero kills. Returns damage dealt.
    pub fn take_damage(&mut self, amount: f64) -> f64 {
        if !self.alive || amount <= 0.0 {
            return 0.0;
        }
        let dealt = amount.min(self.health);
        self.health -= dealt;
        if self.health <= 0.0 {
            self.kill();
        }
        dealt
    }

    /// Mark dead with zero health.
    pub fn kill(&mut self) {
        self.health = 0.0;
        self.alive = false;
    }

    /// Set max health, clamping current health into range.
    pub fn set_max_health(&mut self, max_health: f64) {
        self.max_health = max_health.max(MIN_MAX_HEALTH);
        self.health = self.health.min(self.max_health);
    }

    /// Recompute max health from the ledger.
    pub fn recompute(&mut self, ledger: &BonusLedger) {
        self.set_max_health(DerivedStats::max_health(ledger));
    }
}
