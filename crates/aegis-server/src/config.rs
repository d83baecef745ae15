//! Server configuration.
//!
//! Clock, logging and demo-session settings plus the effect engine's own
//! tuning. Configuration can be loaded from and saved to a TOML file.

use aegis_effects::EffectsConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuration file name.
pub const CONFIG_FILE: &str = "aegis.toml";

/// Server configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // === Clock ===
    /// Logical milliseconds per server tick
    pub tick_interval_ms: u64,

    // === Logging ===
    /// Default tracing directive, extended by `RUST_LOG`
    pub log_filter: String,

    // === Demo ===
    /// Length of the scripted session in logical seconds
    pub demo_duration_secs: u64,
    /// Seed for resist rolls (None = random)
    pub demo_seed: Option<u64>,

    // === Engine ===
    /// Effect engine tuning
    pub effects: EffectsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            log_filter: "aegis=info".to_string(),
            demo_duration_secs: 30,
            demo_seed: None,
            effects: EffectsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the working directory.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        Self::load_from(PathBuf::from(CONFIG_FILE))
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        match fs::File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read config file: {e}");
                    return Self::default();
                }

                match toml::from_str(&contents) {
                    Ok(config) => {
                        info!("Loaded config from {}", path.display());
                        config
                    },
                    Err(e) => {
                        warn!("Failed to parse config file: {e}");
                        Self::default()
                    },
                }
            },
            Err(e) => {
                warn!("Failed to open config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 1000);
        self.demo_duration_secs = self.demo_duration_secs.clamp(1, 3600);
        if self.log_filter.trim().is_empty() {
            self.log_filter = Self::default().log_filter;
        }
        self.effects.validate();
    }

    /// Number of ticks the demo session runs for.
    #[must_use]
    pub fn demo_ticks(&self) -> u64 {
        (self.demo_duration_secs * 1000).div_ceil(self.tick_interval_ms.max(1))
    }
}
