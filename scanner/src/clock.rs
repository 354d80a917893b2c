//! Arrival clock for the dispatcher and the eviction sweeper.

use common::time::now_ms;
use tokio::time::Instant;

/// Epoch milliseconds read once at start, then advanced on tokio's monotonic
/// clock. Arrival stamps and eviction sweeps share it, and a paused test
/// runtime moves it along with `tokio::time`.
#[derive(Debug, Clone, Copy)]
pub struct ArrivalClock {
    base_ms: u64,
    started: Instant,
}

impl ArrivalClock {
    pub fn start() -> Self {
        Self {
            base_ms: now_ms(),
            started: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.base_ms.saturating_add(elapsed)
    }
}
