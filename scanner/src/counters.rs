use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rules::ScreenHit;
use serde::Serialize;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub ticks_received: Arc<AtomicU64>,
    pub ticks_malformed: Arc<AtomicU64>,
    pub ticks_duplicate: Arc<AtomicU64>,
    pub ticks_stale: Arc<AtomicU64>,
    pub quotes_applied: Arc<AtomicU64>,

    pub matches: Arc<AtomicU64>,
    pub alerts_emitted: Arc<AtomicU64>,
    pub alerts_suppressed: Arc<AtomicU64>,
    pub alerts_rejected: Arc<AtomicU64>,

    pub symbols_evicted: Arc<AtomicU64>,
    pub eviction_races: Arc<AtomicU64>,
    pub feed_reconnects: Arc<AtomicU64>,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl Counters {
    pub fn report(&self, ticks_dropped: u64, symbols_tracked: usize) -> ScanReport {
        ScanReport {
            ticks_received: read(&self.ticks_received),
            ticks_dropped,
            ticks_malformed: read(&self.ticks_malformed),
            ticks_duplicate: read(&self.ticks_duplicate),
            ticks_stale: read(&self.ticks_stale),
            quotes_applied: read(&self.quotes_applied),
            matches: read(&self.matches),
            alerts_emitted: read(&self.alerts_emitted),
            alerts_suppressed: read(&self.alerts_suppressed),
            alerts_rejected: read(&self.alerts_rejected),
            symbols_evicted: read(&self.symbols_evicted),
            eviction_races: read(&self.eviction_races),
            feed_reconnects: read(&self.feed_reconnects),
            symbols_tracked,
            top_matches: Vec::new(),
        }
    }
}

/// Counter snapshot taken when a scan run ends.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub ticks_received: u64,
    /// Payloads displaced by the drop-oldest policy.
    pub ticks_dropped: u64,
    pub ticks_malformed: u64,
    pub ticks_duplicate: u64,
    pub ticks_stale: u64,
    pub quotes_applied: u64,
    pub matches: u64,
    pub alerts_emitted: u64,
    pub alerts_suppressed: u64,
    pub alerts_rejected: u64,
    pub symbols_evicted: u64,
    pub eviction_races: u64,
    pub feed_reconnects: u64,
    pub symbols_tracked: usize,
    /// Final on-demand screen over whatever was still tracked.
    pub top_matches: Vec<ScreenHit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_same_cells() {
        let c = Counters::default();
        let c2 = c.clone();
        bump(&c.ticks_received);
        bump(&c2.ticks_received);
        bump(&c2.alerts_emitted);

        let r = c.report(3, 7);
        assert_eq!(r.ticks_received, 2);
        assert_eq!(r.alerts_emitted, 1);
        assert_eq!(r.ticks_dropped, 3);
        assert_eq!(r.symbols_tracked, 7);
    }
}
