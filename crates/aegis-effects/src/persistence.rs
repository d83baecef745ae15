//! Persisted effect records.
//!
//! At logout each active effect is reduced to a [`SavedEffect`] carrying
//! the remaining duration instead of the original one, so a restored
//! instance expires when the original would have.

use crate::effect::{EffectDuration, EffectInstance};
use aegis_common::{AegisError, EntityId, MagicBytes, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while reading or writing effect saves.
#[derive(Debug, Error)]
pub enum SaveError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid magic bytes
    #[error("Invalid effect save format")]
    InvalidFormat,

    /// Version mismatch
    #[error("Incompatible effect save version: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this build writes
        expected: SchemaVersion,
        /// Version found in the data
        found: SchemaVersion,
    },
}

impl From<AegisError> for SaveError {
    fn from(err: AegisError) -> Self {
        match err {
            AegisError::VersionMismatch { expected, actual } => Self::VersionMismatch {
                expected,
                found: actual,
            },
            AegisError::Io(err) => Self::Io(err),
            AegisError::Config(msg) | AegisError::Serialization(msg) => Self::Serialization(msg),
        }
    }
}

/// Result type for save operations.
pub type SaveResult<T> = Result<T, SaveError>;

/// One persisted effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedEffect {
    /// Effect-type tag name.
    pub tag: String,
    /// Remaining ms; negative for effects without expiry.
    pub remaining_ms: i64,
    /// Base magnitude.
    pub magnitude: f64,
    /// Effectiveness at application time.
    pub effectiveness: f64,
    /// Spell line key.
    pub spell_line: String,
}

impl SavedEffect {
    /// Record an instance with the given remaining duration.
    #[must_use]
    pub fn from_instance(instance: &EffectInstance, remaining_ms: i64) -> Self {
        Self {
            tag: instance.tag().name().to_string(),
            remaining_ms,
            magnitude: instance.magnitude(),
            effectiveness: instance.effectiveness(),
            spell_line: instance.spec().spell_line.clone(),
        }
    }

    /// Duration of the restored instance.
    #[must_use]
    pub fn duration(&self) -> EffectDuration {
        EffectDuration::from_millis(self.remaining_ms)
    }
}

/// Every saved effect of one entity, framed for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSaveFile {
    /// Format marker.
    pub magic: MagicBytes,
    /// Record version.
    pub version: SchemaVersion,
    /// Owning entity at save time.
    pub owner: EntityId,
    /// Records.
    pub effects: Vec<SavedEffect>,
}

impl EffectSaveFile {
    /// Frame records for an entity.
    #[must_use]
    pub fn new(owner: EntityId, effects: Vec<SavedEffect>) -> Self {
        Self {
            magic: MagicBytes::EFFECTS,
            version: SchemaVersion::EFFECT_SAVE,
            owner,
            effects,
        }
    }

    /// Serializes to binary format.
    pub fn to_bytes(&self) -> SaveResult<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&MagicBytes::EFFECTS.0);
        let data = bincode::serialize(self).map_err(|e| SaveError::Serialization(e.to_string()))?;
        buffer.extend(data);
        Ok(buffer)
    }

    /// Deserializes from binary format.
    pub fn from_bytes(bytes: &[u8]) -> SaveResult<Self> {
        if bytes.len() < 4 || bytes[0..4] != MagicBytes::EFFECTS.0 {
            return Err(SaveError::InvalidFormat);
        }
        let file: Self = bincode::deserialize(&bytes[4..])
            .map_err(|e| SaveError::Serialization(e.to_string()))?;
        file.check()?;
        Ok(file)
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> SaveResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SaveError::Serialization(e.to_string()))
    }

    /// Deserializes from JSON.
    pub fn from_json(json: &str) -> SaveResult<Self> {
        let file: Self =
            serde_json::from_str(json).map_err(|e| SaveError::Serialization(e.to_string()))?;
        file.check()?;
        Ok(file)
    }

    /// Writes the binary form to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> SaveResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Reads the binary form from `path`.
    pub fn read_from(path: &Path) -> SaveResult<Self> {
        Self::from_bytes(&fs::read(path)?)
    }

    fn check(&self) -> SaveResult<()> {
        if self.magic != MagicBytes::EFFECTS {
            return Err(SaveError::InvalidFormat);
        }
        SchemaVersion::EFFECT_SAVE.ensure_readable(&self.version)?;
        Ok(())
    }
}
