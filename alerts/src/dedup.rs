//! Alert deduplication.
//!
//! Each `(symbol, rule-set)` key moves through
//!
//! ```text
//! Idle ──offer──▶ Alerted ──confirm──▶ CoolingDown ──(cooldown elapses)──▶ Idle
//!                    │
//!                    └──release──▶ Idle
//! ```
//!
//! A key in `Alerted` or `CoolingDown` suppresses further offers. Expiry is
//! evaluated lazily against the caller's clock, which for the scan pipeline is
//! the quote's own timestamp, so replayed or delayed data cools down on event
//! time rather than wall-clock time.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::model::{Alert, AlertKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Idle,
    /// Handed to the sink, delivery not yet confirmed.
    Alerted { at_ms: u64 },
    CoolingDown { until_ms: u64 },
}

impl AlertPhase {
    fn label(&self) -> &'static str {
        match self {
            AlertPhase::Idle => "Idle",
            AlertPhase::Alerted { .. } => "Alerted",
            AlertPhase::CoolingDown { .. } => "CoolingDown",
        }
    }

    pub fn suppresses(&self) -> bool {
        !matches!(self, AlertPhase::Idle)
    }
}

impl fmt::Display for AlertPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid alert phase: {0}")]
pub struct InvalidPhase(pub String);

/// Parses the bare phase name. Timestamps are not part of the text form, so
/// parsed `Alerted`/`CoolingDown` phases carry zero.
impl FromStr for AlertPhase {
    type Err = InvalidPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Idle" => Ok(AlertPhase::Idle),
            "Alerted" => Ok(AlertPhase::Alerted { at_ms: 0 }),
            "CoolingDown" => Ok(AlertPhase::CoolingDown { until_ms: 0 }),
            other => Err(InvalidPhase(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// First match for its key; publish it, then `confirm` or `release`.
    Emit(Alert),
    Suppressed { key: AlertKey, phase: AlertPhase },
}

#[derive(Debug)]
pub struct AlertDeduplicator {
    cooldown_ms: u64,
    phases: HashMap<AlertKey, AlertPhase>,
}

impl AlertDeduplicator {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            cooldown_ms,
            phases: HashMap::new(),
        }
    }

    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }

    /// Current phase of `key` as of `now_ms`.
    pub fn phase(&self, key: &AlertKey, now_ms: u64) -> AlertPhase {
        self.phases
            .get(key)
            .map_or(AlertPhase::Idle, |p| self.resolve(*p, now_ms))
    }

    fn resolve(&self, phase: AlertPhase, now_ms: u64) -> AlertPhase {
        if lapsed(phase, now_ms, self.cooldown_ms) {
            AlertPhase::Idle
        } else {
            phase
        }
    }

    /// Offer a matching alert. Only an `Idle` key emits; the key moves to
    /// `Alerted` until the caller reports the publish outcome.
    pub fn offer(&mut self, alert: Alert, now_ms: u64) -> Decision {
        let key = alert.key();
        let phase = self.phase(&key, now_ms);

        if phase.suppresses() {
            debug!(key = %key, phase = %phase, "alert suppressed");
            return Decision::Suppressed { key, phase };
        }

        self.phases.insert(key, AlertPhase::Alerted { at_ms: now_ms });
        Decision::Emit(alert)
    }

    /// The sink accepted the alert: start the cooldown.
    ///
    /// Returns the cooldown deadline, or `None` when `key` was not awaiting
    /// confirmation.
    pub fn confirm(&mut self, key: &AlertKey, now_ms: u64) -> Option<u64> {
        let slot = self.phases.get_mut(key)?;
        match *slot {
            AlertPhase::Alerted { .. } => {
                let until_ms = now_ms.saturating_add(self.cooldown_ms);
                *slot = AlertPhase::CoolingDown { until_ms };
                Some(until_ms)
            }
            _ => None,
        }
    }

    /// The sink rejected the alert: return the key to `Idle` so the next match
    /// can try again.
    pub fn release(&mut self, key: &AlertKey) -> bool {
        match self.phases.get(key) {
            Some(AlertPhase::Alerted { .. }) => {
                self.phases.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Drop entries that have returned to `Idle` as of `now_ms`.
    pub fn prune(&mut self, now_ms: u64) -> usize {
        self.prune_by(|_| Some(now_ms))
    }

    /// Drop entries that have returned to `Idle`, judging each key by its own
    /// symbol's clock. Keys whose symbol has no clock are kept.
    pub fn prune_by<C>(&mut self, clock: C) -> usize
    where
        C: Fn(&str) -> Option<u64>,
    {
        let before = self.phases.len();
        let cooldown_ms = self.cooldown_ms;
        self.phases.retain(|key, phase| match clock(key.symbol.as_str()) {
            Some(now_ms) => !lapsed(*phase, now_ms, cooldown_ms),
            None => true,
        });
        before - self.phases.len()
    }

    /// Drop an evicted symbol's entries that no longer suppress at `now_ms`,
    /// the symbol's own event clock. Entries still cooling down survive
    /// eviction, so a symbol that comes back inside its cooldown stays quiet.
    pub fn forget_symbol(&mut self, symbol: &str, now_ms: u64) -> usize {
        let before = self.phases.len();
        let cooldown_ms = self.cooldown_ms;
        self.phases
            .retain(|key, phase| key.symbol != symbol || !lapsed(*phase, now_ms, cooldown_ms));
        before - self.phases.len()
    }

    /// Whether any entry for `symbol` is still held.
    pub fn tracks_symbol(&self, symbol: &str) -> bool {
        self.phases.keys().any(|key| key.symbol == symbol)
    }

    /// Symbols with at least one held entry. May repeat a symbol.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.phases.keys().map(|key| key.symbol.as_str())
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

/// True once `phase` no longer suppresses at `now_ms`. An unconfirmed alert
/// older than a full cooldown is treated as lost.
fn lapsed(phase: AlertPhase, now_ms: u64, cooldown_ms: u64) -> bool {
    match phase {
        AlertPhase::Idle => true,
        AlertPhase::Alerted { at_ms } => now_ms >= at_ms.saturating_add(cooldown_ms),
        AlertPhase::CoolingDown { until_ms } => now_ms >= until_ms,
    }
}
