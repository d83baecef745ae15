//! Living entities and their exclusive section.
//!
//! Each entity owns one ledger and one registry behind a single mutex. Every
//! mutation of either happens while that mutex is held, which is what
//! serializes start and expire hooks for one target.

use crate::bonus::{BonusLedger, Statistic};
use crate::effect::ActorKind;
use crate::registry::EffectRegistry;
use crate::vitals::Vitals;
use aegis_common::EntityId;
use parking_lot::{Mutex, MutexGuard};

/// State guarded by an entity's section.
#[derive(Debug)]
pub struct LivingState {
    pub(crate) ledger: BonusLedger,
    pub(crate) registry: EffectRegistry,
    pub(crate) vitals: Vitals,
    pub(crate) despawned: bool,
}

impl LivingState {
    fn new(vitals: Vitals, capacity: usize) -> Self {
        let mut ledger = BonusLedger::new();
        ledger.set_base(Statistic::MaxHealth, vitals.max_health());
        Self {
            ledger,
            registry: EffectRegistry::new(capacity),
            vitals,
            despawned: false,
        }
    }

    /// Bonus ledger.
    #[must_use]
    pub fn ledger(&self) -> &BonusLedger {
        &self.ledger
    }

    /// Bonus ledger, for non-effect sources such as items.
    pub fn ledger_mut(&mut self) -> &mut BonusLedger {
        &mut self.ledger
    }

    /// Effect registry.
    #[must_use]
    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    /// Health.
    #[must_use]
    pub fn vitals(&self) -> &Vitals {
        &self.vitals
    }

    /// Health, mutable.
    pub fn vitals_mut(&mut self) -> &mut Vitals {
        &mut self.vitals
    }

    /// Recompute derived statistics from the ledger.
    pub fn refresh_derived(&mut self) {
        self.vitals.recompute(&self.ledger);
    }

    /// Whether effects may start on or pulse this entity.
    #[must_use]
    pub fn is_valid_target(&self) -> bool {
        !self.despawned && self.vitals.is_alive()
    }

    /// Whether the entity has left the world.
    #[must_use]
    pub fn is_despawned(&self) -> bool {
        self.despawned
    }
}

/// A living entity effects can target.
#[derive(Debug)]
pub struct Living {
    id: EntityId,
    kind: ActorKind,
    state: Mutex<LivingState>,
}

impl Living {
    /// Create a living entity. Max health becomes the MaxHealth base value.
    #[must_use]
    pub fn new(id: EntityId, kind: ActorKind, vitals: Vitals, capacity: usize) -> Self {
        Self {
            id,
            kind,
            state: Mutex::new(LivingState::new(vitals, capacity)),
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Capability class.
    #[must_use]
    pub fn kind(&self) -> ActorKind {
        self.kind
    }

    /// Enter the entity's exclusive section.
    pub fn lock(&self) -> MutexGuard<'_, LivingState> {
        self.state.lock()
    }

    /// Current effective value of a statistic.
    #[must_use]
    pub fn effective_value(&self, stat: Statistic) -> f64 {
        self.state.lock().ledger.effective_value(stat)
    }

    /// Copy of current vitals.
    #[must_use]
    pub fn vitals(&self) -> Vitals {
        self.state.lock().vitals.clone()
    }

    /// Whether effects may target the entity.
    #[must_use]
    pub fn is_valid_target(&self) -> bool {
        self.state.lock().is_valid_target()
    }
}
