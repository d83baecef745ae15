//! Contract-violation errors.
//!
//! Expected races (dead targets, stacking refusals, double cancels) are not
//! errors; they surface as `ApplyOutcome::Rejected` or a `false` return.

use aegis_common::{EffectId, EntityId};
use thiserror::Error;

/// Programming errors in how the engine is driven.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    /// The same instance was scheduled twice.
    #[error("effect {0} is already scheduled")]
    AlreadyScheduled(EffectId),

    /// No handler is registered for a tag.
    #[error("no handler registered for effect tag '{0}'")]
    UnknownHandler(String),

    /// The entity is not in the world.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// Two handlers were registered under one tag.
    #[error("a handler for effect tag '{0}' is already registered")]
    DuplicateHandler(String),
}

/// Result type for engine operations.
pub type EffectResult<T> = Result<T, EffectError>;
