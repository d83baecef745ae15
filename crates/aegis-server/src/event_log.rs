//! Logs effect lifecycle events and keeps per-kind counts.

use aegis_effects::{EffectEvent, EffectEventHandler};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Event consumer that writes each event to the log.
#[derive(Debug, Default)]
pub struct EventLog {
    started: AtomicUsize,
    pulsed: AtomicUsize,
    expired: AtomicUsize,
    rejected: AtomicUsize,
    immunity_ended: AtomicUsize,
}

/// Totals seen by an [`EventLog`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    /// Instances started
    pub started: usize,
    /// Pulses
    pub pulsed: usize,
    /// Instances removed
    pub expired: usize,
    /// Refused applications
    pub rejected: usize,
    /// Immunity windows closed
    pub immunity_ended: usize,
}

impl EventLog {
    /// Create a new event log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current totals.
    #[must_use]
    pub fn counts(&self) -> EventCounts {
        EventCounts {
            started: self.started.load(Ordering::Relaxed),
            pulsed: self.pulsed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            immunity_ended: self.immunity_ended.load(Ordering::Relaxed),
        }
    }
}

impl EffectEventHandler for EventLog {
    fn handle(&self, event: &EffectEvent) {
        match event {
            EffectEvent::Started {
                target,
                effect,
                tag,
                restored,
                at,
            } => {
                self.started.fetch_add(1, Ordering::Relaxed);
                info!(entity = %target, %effect, %tag, restored, "[{at}] effect started");
            },
            EffectEvent::Pulsed { target, effect, at } => {
                self.pulsed.fetch_add(1, Ordering::Relaxed);
                debug!(entity = %target, %effect, "[{at}] effect pulsed");
            },
            EffectEvent::Expired {
                target,
                effect,
                tag,
                reason,
                silent,
                at,
            } => {
                self.expired.fetch_add(1, Ordering::Relaxed);
                if *silent {
                    debug!(entity = %target, %effect, %tag, ?reason, "[{at}] effect ended");
                } else {
                    info!(entity = %target, %effect, %tag, ?reason, "[{at}] effect ended");
                }
            },
            EffectEvent::Rejected { target, tag, reason } => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                info!(entity = %target, %tag, ?reason, "effect rejected");
            },
            EffectEvent::ImmunityEnded { target, effect, at } => {
                self.immunity_ended.fetch_add(1, Ordering::Relaxed);
                debug!(entity = %target, %effect, "[{at}] immunity ended");
            },
        }
    }
}
