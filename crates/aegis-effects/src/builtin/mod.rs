//! Generic handlers covering the common effect shapes: stat buffs and
//! debuffs, heal and damage over time, and crowd control.

mod crowd_control;
mod periodic;
mod stat_modifier;

pub use crowd_control::CrowdControlHandler;
pub use periodic::PeriodicHandler;
pub use stat_modifier::StatModifierHandler;
