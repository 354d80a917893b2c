//! Rolling Stats Tracker
//!
//! Keeps one [`SymbolState`] per symbol: a bounded window of volume samples
//! for the average-volume baseline, the session reference price for percent
//! change, and alert bookkeeping. States are created on first sighting and
//! evicted after an inactivity timeout.
//!
//! [`SymbolTracker`] is the single-partition map and assumes one sequential
//! writer per symbol. [`ShardedTracker`] is the shared handle: symbols are
//! hashed onto shards that are locked independently, so an update never locks
//! the whole map.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::rolling_window::RollingWindow;
use crate::types::{Quote, SymbolSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Maximum number of volume samples per symbol.
    pub volume_window: usize,

    /// Symbols unseen for longer than this are evicted.
    pub eviction_ms: u64,

    /// Optional time bound on volume samples, in addition to the count bound.
    pub window_max_age_ms: Option<u64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            volume_window: 30,
            eviction_ms: 15 * 60 * 1_000,
            window_max_age_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("symbol {symbol} was evicted before the alert was recorded")]
    EvictionRaceIgnored { symbol: String },
}

/// What happened to a quote offered to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    Applied(SymbolSnapshot),
    /// Same timestamp, price and volume as the last applied tick (redelivery).
    Duplicate,
    /// Older than the last applied tick for this symbol.
    Stale { last_ts_ms: u64 },
}

/// Per-symbol mutable state. Only the tracker touches it.
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub symbol: String,
    window: RollingWindow,
    reference_price: Option<f64>,
    reference_from_open: bool,
    float_shares: Option<u64>,
    last_price: f64,
    last_volume: u64,
    last_ts_ms: u64,
    last_baseline: f64,
    last_seen_ms: u64,
    last_alert_ms: Option<u64>,
    cooldown_until_ms: Option<u64>,
}

impl SymbolState {
    fn new(quote: &Quote, cfg: &TrackerConfig, now_ms: u64) -> Self {
        let mut window = RollingWindow::new(cfg.volume_window);
        if let Some(age) = cfg.window_max_age_ms {
            window = window.with_max_age(age);
        }

        Self {
            symbol: quote.symbol.clone(),
            window,
            reference_price: None,
            reference_from_open: false,
            float_shares: None,
            last_price: quote.price,
            last_volume: quote.volume,
            last_ts_ms: 0,
            last_baseline: 0.0,
            last_seen_ms: now_ms,
            last_alert_ms: None,
            cooldown_until_ms: None,
        }
    }

    fn adopt_reference(&mut self, quote: &Quote) {
        match (self.reference_price, quote.session_open) {
            (None, Some(open)) => {
                self.reference_price = Some(open);
                self.reference_from_open = true;
            }
            (None, None) => {
                self.reference_price = Some(quote.price);
                self.reference_from_open = false;
            }
            // Vendor open beats a first-price fallback.
            (Some(_), Some(open)) if !self.reference_from_open => {
                self.reference_price = Some(open);
                self.reference_from_open = true;
            }
            _ => {}
        }
    }

    fn snapshot(&self, as_of_ms: u64) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: self.symbol.clone(),
            ts_ms: self.last_ts_ms,
            price: self.last_price,
            volume: self.last_volume,
            float_shares: self.float_shares,
            reference_price: self.reference_price.unwrap_or(0.0),
            rolling_average_volume: self.last_baseline,
            samples: self.window.len(),
            last_alert_ms: self.last_alert_ms,
            cooling_down: self.cooldown_until_ms.is_some_and(|until| as_of_ms < until),
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

/// Single-partition symbol map.
#[derive(Debug, Default)]
pub struct SymbolTracker {
    cfg: TrackerConfig,
    states: HashMap<String, SymbolState>,
}

impl SymbolTracker {
    pub fn new(cfg: TrackerConfig) -> Self {
        Self {
            cfg,
            states: HashMap::new(),
        }
    }

    /// Fold a quote into its symbol's state.
    ///
    /// `now_ms` is the arrival (wall-clock) time used for eviction; the quote's
    /// own timestamp drives ordering and cooldown.
    pub fn update(&mut self, quote: &Quote, now_ms: u64) -> TrackOutcome {
        let cfg = self.cfg;
        let state = self
            .states
            .entry(quote.symbol.clone())
            .or_insert_with(|| SymbolState::new(quote, &cfg, now_ms));

        // Normalized quotes always carry ts > 0, so 0 means "nothing applied yet".
        if state.last_ts_ms > 0 {
            if quote.ts_ms < state.last_ts_ms {
                return TrackOutcome::Stale {
                    last_ts_ms: state.last_ts_ms,
                };
            }
            if quote.ts_ms == state.last_ts_ms
                && quote.price == state.last_price
                && quote.volume == state.last_volume
            {
                return TrackOutcome::Duplicate;
            }
        }

        state.adopt_reference(quote);
        if quote.float_shares.is_some() {
            state.float_shares = quote.float_shares;
        }

        // Baseline excludes the current sample.
        state.window.expire(quote.ts_ms);
        state.last_baseline = state.window.mean().unwrap_or(0.0);
        state.window.push(quote.ts_ms, quote.volume);

        state.last_price = quote.price;
        state.last_volume = quote.volume;
        state.last_ts_ms = quote.ts_ms;
        state.last_seen_ms = now_ms;

        TrackOutcome::Applied(state.snapshot(quote.ts_ms))
    }

    /// Stamp a published alert on the symbol.
    pub fn record_alert(
        &mut self,
        symbol: &str,
        alert_ts_ms: u64,
        cooldown_ms: u64,
    ) -> Result<(), TrackerError> {
        let state = self
            .states
            .get_mut(symbol)
            .ok_or_else(|| TrackerError::EvictionRaceIgnored {
                symbol: symbol.to_string(),
            })?;

        state.last_alert_ms = Some(alert_ts_ms);
        state.cooldown_until_ms = Some(alert_ts_ms.saturating_add(cooldown_ms));
        Ok(())
    }

    /// Remove symbols idle for longer than the eviction timeout.
    pub fn evict_idle(&mut self, now_ms: u64) -> Vec<String> {
        let timeout = self.cfg.eviction_ms;
        let mut evicted = Vec::new();

        self.states.retain(|symbol, s| {
            let keep = now_ms.saturating_sub(s.last_seen_ms) <= timeout;
            if !keep {
                evicted.push(symbol.clone());
            }
            keep
        });

        if !evicted.is_empty() {
            debug!(count = evicted.len(), remaining = self.states.len(), "evicted idle symbols");
        }
        evicted
    }

    /// Forget every reference price; the next tick per symbol sets a new one.
    pub fn reset_session(&mut self) {
        for s in self.states.values_mut() {
            s.reference_price = None;
            s.reference_from_open = false;
        }
    }

    pub fn snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        self.states.get(symbol).map(|s| s.snapshot(s.last_ts_ms))
    }

    pub fn snapshots(&self) -> Vec<SymbolSnapshot> {
        self.states
            .values()
            .map(|s| s.snapshot(s.last_ts_ms))
            .collect()
    }

    pub fn state(&self, symbol: &str) -> Option<&SymbolState> {
        self.states.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.states.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Stable symbol → partition mapping shared by the tracker shards and the
/// worker router, so a symbol's shard is only ever written by one worker.
pub fn partition_of(symbol: &str, partitions: usize) -> usize {
    let mut h = DefaultHasher::new();
    symbol.hash(&mut h);
    (h.finish() % partitions.max(1) as u64) as usize
}

/// Cloneable handle over lock-per-shard [`SymbolTracker`]s.
#[derive(Clone)]
pub struct ShardedTracker {
    cfg: TrackerConfig,
    shards: Arc<[Mutex<SymbolTracker>]>,
}

impl ShardedTracker {
    pub fn new(cfg: TrackerConfig, shards: usize) -> Self {
        let shards: Vec<_> = (0..shards.max(1))
            .map(|_| Mutex::new(SymbolTracker::new(cfg)))
            .collect();

        Self {
            cfg,
            shards: shards.into(),
        }
    }

    pub fn config(&self) -> TrackerConfig {
        self.cfg
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, symbol: &str) -> usize {
        partition_of(symbol, self.shards.len())
    }

    fn shard(&self, symbol: &str) -> &Mutex<SymbolTracker> {
        &self.shards[self.shard_for(symbol)]
    }

    pub fn update(&self, quote: &Quote, now_ms: u64) -> TrackOutcome {
        self.shard(&quote.symbol).lock().update(quote, now_ms)
    }

    pub fn record_alert(
        &self,
        symbol: &str,
        alert_ts_ms: u64,
        cooldown_ms: u64,
    ) -> Result<(), TrackerError> {
        self.shard(symbol)
            .lock()
            .record_alert(symbol, alert_ts_ms, cooldown_ms)
    }

    /// Sweep shards one at a time.
    pub fn evict_idle(&self, now_ms: u64) -> Vec<String> {
        let mut evicted = Vec::new();
        for shard in self.shards.iter() {
            evicted.extend(shard.lock().evict_idle(now_ms));
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "tracker sweep evicted idle symbols");
        }
        evicted
    }

    pub fn reset_session(&self) {
        for shard in self.shards.iter() {
            shard.lock().reset_session();
        }
    }

    pub fn snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        self.shard(symbol).lock().snapshot(symbol)
    }

    /// Whether `symbol` currently has live state, e.g. after an eviction
    /// raced with a fresh tick.
    pub fn contains(&self, symbol: &str) -> bool {
        self.shard(symbol).lock().contains(symbol)
    }

    pub fn snapshots(&self) -> Vec<SymbolSnapshot> {
        self.shards
            .iter()
            .flat_map(|s| s.lock().snapshots())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
