//! Engine tuning.

use serde::{Deserialize, Serialize};

/// Effect engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    /// Capacity of the lifecycle event bus
    pub event_capacity: usize,
    /// Most instances a single entity may hold
    pub max_effects_per_entity: usize,
    /// Force-remove ledger contributions an expire hook left behind
    pub purge_stale_contributions: bool,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            max_effects_per_entity: 64,
            purge_stale_contributions: true,
        }
    }
}

impl EffectsConfig {
    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.event_capacity = self.event_capacity.clamp(16, 1 << 16);
        self.max_effects_per_entity = self.max_effects_per_entity.clamp(1, 1024);
    }
}
