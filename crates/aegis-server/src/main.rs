//! # Aegis Server
//!
//! Hosts the effect engine for the Aegis RPG server.
//!
//! This binary ties together:
//! - Configuration: clock, logging and engine tuning from `aegis.toml`
//! - Effects: handler registration and the logical clock
//! - Events: lifecycle logging
//! - Demo: a scripted session exercising every effect kind

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod config;
mod demo;
mod event_log;

use aegis_effects::EffectEngine;
use anyhow::Result;
use config::{ServerConfig, CONFIG_FILE};
use demo::Session;
use event_log::EventLog;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    let mut config = ServerConfig::load();
    config.validate();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(config.log_filter.parse()?))
        .init();

    info!("Aegis server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if !Path::new(CONFIG_FILE).exists() {
        if let Err(e) = config.save_to(CONFIG_FILE) {
            warn!("Failed to write default config: {e}");
        }
    }

    run(config).await?;

    info!("Aegis server shutdown complete");
    Ok(())
}

/// Drive the engine clock one tick per interval until the demo ends or the
/// process is interrupted.
async fn run(config: ServerConfig) -> Result<()> {
    let handlers = demo::handlers()?;
    info!(handlers = handlers.len(), "registered effect handlers");

    let engine = Arc::new(EffectEngine::new(config.effects.clone(), handlers));
    let seed = config.demo_seed.unwrap_or_else(|| fastrand::u64(..));
    let mut session = Session::new(Arc::clone(&engine), seed);
    let log = EventLog::new();

    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let total_ticks = config.demo_ticks();
    let mut ticks = 0;
    while ticks < total_ticks {
        tokio::select! {
            _ = interval.tick() => {},
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            },
        }

        session.run_due()?;
        engine.advance_by(config.tick_interval_ms);
        engine.events().dispatch(&[&log]);
        ticks += 1;
    }

    let counts = log.counts();
    info!(
        now = %engine.now(),
        script_finished = session.is_finished(),
        relogs = session.relogs(),
        started = counts.started,
        pulsed = counts.pulsed,
        expired = counts.expired,
        rejected = counts.rejected,
        immunity_ended = counts.immunity_ended,
        "session complete"
    );
    Ok(())
}
