//! # Aegis Effects
//!
//! Effect lifecycle and stat-bonus aggregation for Aegis.
//!
//! This crate hosts timed and instantaneous effects on living entities:
//! - Bonus ledger with fixed category aggregation order
//! - Effect instances and their lifecycle states
//! - Per-entity registry enforcing stacking and exclusivity groups
//! - Scheduler for expiry, pulses and immunity windows
//! - Handler contract and lookup table for effect behaviours
//! - Engine tying entities, handlers and time together
//! - Persistence records for logout and login
//! - Event bus for lifecycle notifications
//! - Generic built-in handlers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod bonus;
pub mod builtin;
pub mod clock;
pub mod config;
pub mod effect;
pub mod engine;
pub mod error;
pub mod events;
pub mod handler;
pub mod living;
pub mod persistence;
pub mod registry;
pub mod scheduler;
pub mod subscription;
pub mod vitals;

#[cfg(test)]
mod scenario_tests;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bonus::*;
    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::effect::*;
    pub use crate::engine::*;
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::handler::*;
    pub use crate::living::*;
    pub use crate::persistence::*;
    pub use crate::registry::*;
    pub use crate::scheduler::*;
    pub use crate::subscription::*;
    pub use crate::vitals::*;
}

pub use prelude::*;
