//! # Aegis Common
//!
//! Common types, utilities, and shared abstractions for Aegis.
//!
//! This crate provides foundational types used across the effect engine and
//! the server binary:
//! - ID types (EntityId, EffectId)
//! - Version information for persisted schemas
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod ids;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::*;
    pub use crate::ids::*;
    pub use crate::version::*;
}

pub use prelude::*;
