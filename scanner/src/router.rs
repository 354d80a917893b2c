//! Partition router and workers.
//!
//! The dispatcher hands every normalized quote to the worker owning
//! `partition_of(symbol, workers)`, the same mapping the tracker uses for its
//! shards. Each worker drains its queue in FIFO order, so ticks for one symbol
//! are processed sequentially and a shard is never written by two workers.
//! Workers own their slice of the alert deduplicator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use alerts::{Alert, AlertDeduplicator, AlertSink, Decision};
use common::logger::{annotate_span, child_span, warn_if_slow};
use market::tracker::{ShardedTracker, TrackOutcome, partition_of};
use market::types::Quote;
use rules::{RuleConfig, evaluate};
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::counters::{Counters, bump};

/// Backlog per partition before the dispatcher waits.
pub const WORKER_QUEUE_CAPACITY: usize = 256;

const SLOW_PUBLISH: Duration = Duration::from_millis(250);

pub enum WorkerMsg {
    Quote { quote: Quote, arrived_ms: u64 },
    /// Symbols this partition lost to the eviction sweep.
    Sweep { evicted: Vec<String> },
}

#[derive(Debug, Error)]
#[error("partition worker {0} has stopped")]
pub struct WorkerGone(pub usize);

/// Shared, read-only wiring for every worker.
pub struct PipelineCtx<S: AlertSink> {
    pub tracker: ShardedTracker,
    pub rules: RuleConfig,
    pub cooldown_ms: u64,
    pub sink: Arc<S>,
    pub counters: Counters,
}

/// Sender side of the partition queues. Workers exit once every clone is
/// dropped and their queue is drained.
#[derive(Clone)]
pub struct SymbolRouter {
    txs: Arc<[Sender<WorkerMsg>]>,
}

impl SymbolRouter {
    pub fn spawn<S: AlertSink>(
        ctx: Arc<PipelineCtx<S>>,
        parent: &Span,
        capacity: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let partitions = ctx.tracker.shard_count();
        let mut txs = Vec::with_capacity(partitions);
        let mut handles = Vec::with_capacity(partitions);

        for idx in 0..partitions {
            let (tx, rx) = mpsc::channel(capacity.max(8));
            let worker = PartitionWorker::new(idx, Arc::clone(&ctx));
            let span = info_span!(parent: parent, "partition", partition = idx);

            handles.push(tokio::spawn(worker.run(rx).instrument(span)));
            txs.push(tx);
        }

        info!(partitions, "partition workers started");
        (Self { txs: txs.into() }, handles)
    }

    pub fn partitions(&self) -> usize {
        self.txs.len()
    }

    pub async fn route(&self, quote: Quote, arrived_ms: u64) -> Result<(), WorkerGone> {
        let idx = partition_of(&quote.symbol, self.txs.len());
        self.txs[idx]
            .send(WorkerMsg::Quote { quote, arrived_ms })
            .await
            .map_err(|_| WorkerGone(idx))
    }

    /// Tell each partition which of its symbols were evicted. Every partition
    /// gets a message so it can also prune expired cooldowns.
    pub async fn sweep(&self, evicted: Vec<String>) -> Result<(), WorkerGone> {
        let mut per_partition = vec![Vec::new(); self.txs.len()];
        for symbol in evicted {
            per_partition[partition_of(&symbol, self.txs.len())].push(symbol);
        }

        for (idx, evicted) in per_partition.into_iter().enumerate() {
            self.txs[idx]
                .send(WorkerMsg::Sweep { evicted })
                .await
                .map_err(|_| WorkerGone(idx))?;
        }
        Ok(())
    }
}

/// Processes one partition's quotes sequentially.
pub struct PartitionWorker<S: AlertSink> {
    idx: usize,
    ctx: Arc<PipelineCtx<S>>,
    dedup: AlertDeduplicator,
    /// Latest event time per symbol. Cooldowns expire on the symbol's own
    /// clock, so one feed running ahead never ages out another's entries.
    clocks: HashMap<String, u64>,
}

impl<S: AlertSink> PartitionWorker<S> {
    pub fn new(idx: usize, ctx: Arc<PipelineCtx<S>>) -> Self {
        let dedup = AlertDeduplicator::new(ctx.cooldown_ms);
        Self {
            idx,
            ctx,
            dedup,
            clocks: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut rx: Receiver<WorkerMsg>) {
        debug!(partition = self.idx, "worker started");

        while let Some(msg) = rx.recv().await {
            match msg {
                WorkerMsg::Quote { quote, arrived_ms } => self.on_quote(quote, arrived_ms).await,
                WorkerMsg::Sweep { evicted } => self.on_sweep(evicted),
            }
        }

        debug!(
            partition = self.idx,
            pending_keys = self.dedup.len(),
            "worker drained"
        );
    }

    async fn on_quote(&mut self, quote: Quote, arrived_ms: u64) {
        let counters = &self.ctx.counters;
        let clock = self.clocks.entry(quote.symbol.clone()).or_default();
        *clock = (*clock).max(quote.ts_ms);

        let snapshot = match self.ctx.tracker.update(&quote, arrived_ms) {
            TrackOutcome::Applied(s) => s,
            TrackOutcome::Duplicate => {
                bump(&counters.ticks_duplicate);
                debug!(symbol = %quote.symbol, ts_ms = quote.ts_ms, "duplicate tick ignored");
                return;
            }
            TrackOutcome::Stale { last_ts_ms } => {
                bump(&counters.ticks_stale);
                debug!(symbol = %quote.symbol, ts_ms = quote.ts_ms, last_ts_ms, "stale tick ignored");
                return;
            }
        };
        bump(&counters.quotes_applied);

        let evaluation = evaluate(&snapshot, &self.ctx.rules);
        if !evaluation.is_match() {
            return;
        }
        bump(&counters.matches);

        let now_ms = quote.ts_ms;
        let alert = match self.dedup.offer(Alert::new(quote, &evaluation), now_ms) {
            Decision::Emit(alert) => alert,
            Decision::Suppressed { .. } => {
                bump(&counters.alerts_suppressed);
                return;
            }
        };

        let span = child_span("alert");
        self.publish(alert, now_ms).instrument(span).await;
    }

    async fn publish(&mut self, alert: Alert, now_ms: u64) {
        let counters = &self.ctx.counters;
        let key = alert.key();
        let alert_id = alert.alert_id;
        annotate_span(&key.symbol);

        let published = warn_if_slow("sink_publish", SLOW_PUBLISH, self.ctx.sink.publish(alert)).await;

        match published {
            Ok(()) => {
                self.dedup.confirm(&key, now_ms);
                bump(&counters.alerts_emitted);
                info!(%alert_id, key = %key, "alert published");

                if let Err(e) = self
                    .ctx
                    .tracker
                    .record_alert(&key.symbol, now_ms, self.ctx.cooldown_ms)
                {
                    bump(&counters.eviction_races);
                    info!(error = %e, "alert stamp skipped");
                }
            }
            Err(e) => {
                self.dedup.release(&key);
                bump(&counters.alerts_rejected);
                warn!(%alert_id, key = %key, error = %e, "sink rejected alert; will retry on next match");
            }
        }
    }

    fn on_sweep(&mut self, evicted: Vec<String>) {
        let eviction_ms = self.ctx.tracker.config().eviction_ms;
        let mut forgotten = 0;
        for symbol in &evicted {
            // Re-created by a tick that overtook the sweep.
            if self.ctx.tracker.contains(symbol) {
                continue;
            }
            // Idle for at least the eviction timeout since its last event.
            let clock = self
                .clocks
                .get(symbol)
                .map_or(0, |ms| ms.saturating_add(eviction_ms));
            forgotten += self.dedup.forget_symbol(symbol, clock);
        }

        let clocks = &self.clocks;
        let pruned = self.dedup.prune_by(|symbol| clocks.get(symbol).copied());

        // Keep a clock while its symbol is live or still has a cooldown to serve.
        let held: HashSet<&str> = self.dedup.symbols().collect();
        let tracker = &self.ctx.tracker;
        self.clocks
            .retain(|symbol, _| held.contains(symbol.as_str()) || tracker.contains(symbol));

        if forgotten + pruned > 0 {
            debug!(
                partition = self.idx,
                evicted = evicted.len(),
                forgotten,
                pruned,
                "dedup entries dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerts::{ChannelSink, SinkError, channel_sink};
    use async_trait::async_trait;
    use futures::future::join_all;
    use market::tracker::TrackerConfig;
    use rules::PriceRange;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing_test::traced_test;

    fn rules() -> RuleConfig {
        RuleConfig {
            min_price_change_pct: Some(0.10),
            min_volume_multiple: Some(5.0),
            max_float: Some(2e9),
            price_range: Some(PriceRange {
                low: 1.0,
                high: 1000.0,
            }),
        }
    }

    fn q(symbol: &str, ts_ms: u64, price: f64, volume: u64) -> Quote {
        Quote {
            symbol: symbol.into(),
            ts_ms,
            price,
            volume,
            float_shares: Some(1_000_000_000),
            session_open: Some(100.0),
        }
    }

    /// Every in-range print matches, so one quote is enough to alert.
    fn range_only() -> RuleConfig {
        RuleConfig {
            min_price_change_pct: None,
            min_volume_multiple: None,
            max_float: None,
            price_range: Some(PriceRange {
                low: 1.0,
                high: 1000.0,
            }),
        }
    }

    fn ctx<S: AlertSink>(sink: S, tracker: ShardedTracker) -> Arc<PipelineCtx<S>> {
        ctx_with(sink, tracker, rules())
    }

    fn ctx_with<S: AlertSink>(
        sink: S,
        tracker: ShardedTracker,
        rules: RuleConfig,
    ) -> Arc<PipelineCtx<S>> {
        Arc::new(PipelineCtx {
            tracker,
            rules,
            cooldown_ms: 300_000,
            sink: Arc::new(sink),
            counters: Counters::default(),
        })
    }

    fn evicting_after(eviction_ms: u64) -> ShardedTracker {
        ShardedTracker::new(
            TrackerConfig {
                eviction_ms,
                ..Default::default()
            },
            1,
        )
    }

    fn range_worker(tracker: ShardedTracker) -> (PartitionWorker<ChannelSink>, Receiver<Alert>) {
        let (sink, rx) = channel_sink(16);
        (PartitionWorker::new(0, ctx_with(sink, tracker, range_only())), rx)
    }

    fn drain(rx: &mut Receiver<Alert>) -> Vec<(String, u64)> {
        let mut out = Vec::new();
        while let Ok(a) = rx.try_recv() {
            out.push((a.symbol, a.ts_ms));
        }
        out
    }

    fn count(c: &AtomicU64) -> u64 {
        c.load(Ordering::Relaxed)
    }

    async fn warm_and_spike(router: &SymbolRouter, symbol: &str) {
        for i in 1..=10 {
            router.route(q(symbol, i * 1_000, 100.0, 100_000), 0).await.unwrap();
        }
        router.route(q(symbol, 11_000, 110.0, 500_000), 0).await.unwrap();
    }

    #[tokio::test]
    async fn spike_produces_one_alert_per_symbol() {
        let (sink, mut rx) = channel_sink(16);
        let ctx = ctx(sink, ShardedTracker::new(TrackerConfig::default(), 3));
        let (router, workers) = SymbolRouter::spawn(Arc::clone(&ctx), &Span::none(), 16);

        warm_and_spike(&router, "AAPL").await;
        warm_and_spike(&router, "MSFT").await;
        // Redelivered spike: dropped by the tracker, not the deduplicator.
        router.route(q("AAPL", 11_000, 110.0, 500_000), 0).await.unwrap();

        drop(router);
        join_all(workers).await;

        let mut symbols = vec![rx.recv().await.unwrap().symbol, rx.recv().await.unwrap().symbol];
        symbols.sort();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
        assert!(rx.try_recv().is_err());

        let c = &ctx.counters;
        assert_eq!(c.alerts_emitted.load(Ordering::Relaxed), 2);
        assert_eq!(c.ticks_duplicate.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.tracker.snapshot("AAPL").unwrap().last_alert_ms, Some(11_000));
    }

    #[tokio::test]
    async fn sweep_reaches_every_partition() {
        let (sink, mut rx) = channel_sink(32);
        let tracker = ShardedTracker::new(
            TrackerConfig {
                eviction_ms: 60_000,
                ..Default::default()
            },
            4,
        );
        let ctx = ctx_with(sink, tracker, range_only());
        let (router, workers) = SymbolRouter::spawn(Arc::clone(&ctx), &Span::none(), 16);
        assert_eq!(router.partitions(), 4);

        let symbols = ["AAPL", "MSFT", "TSLA", "NVDA", "META", "AMZN"];
        let mut partitions: Vec<_> = symbols.iter().map(|s| partition_of(s, 4)).collect();
        partitions.sort();
        partitions.dedup();
        assert!(partitions.len() > 1);

        for sym in symbols {
            router.route(q(sym, 1_000, 100.0, 10), 1_000).await.unwrap();
        }
        // Wait for every alert so the tracker has seen every symbol.
        for _ in symbols {
            rx.recv().await.unwrap();
        }

        let evicted = ctx.tracker.evict_idle(61_001);
        assert_eq!(evicted.len(), symbols.len());
        router.sweep(evicted).await.unwrap();

        // Back inside the cooldown: every partition still remembers its alerts.
        for sym in symbols {
            router.route(q(sym, 62_000, 100.0, 10), 62_000).await.unwrap();
        }

        drop(router);
        join_all(workers).await;

        assert!(drain(&mut rx).is_empty());
        let c = &ctx.counters;
        assert_eq!(count(&c.alerts_emitted), symbols.len() as u64);
        assert_eq!(count(&c.alerts_suppressed), symbols.len() as u64);
        assert_eq!(ctx.tracker.len(), symbols.len());
    }

    #[tokio::test]
    async fn lagging_symbol_keeps_its_cooldown_when_another_runs_ahead() {
        let (mut w, mut rx) = range_worker(ShardedTracker::new(TrackerConfig::default(), 1));

        w.on_quote(q("AAA", 1_000, 100.0, 10), 0).await;
        w.on_quote(q("BBB", 400_000, 100.0, 10), 0).await;
        w.on_sweep(Vec::new());
        w.on_quote(q("AAA", 2_000, 100.0, 10), 0).await;

        assert_eq!(
            drain(&mut rx),
            vec![("AAA".to_string(), 1_000), ("BBB".to_string(), 400_000)]
        );
        assert_eq!(count(&w.ctx.counters.alerts_suppressed), 1);
        assert!(w.dedup.tracks_symbol("AAA"));
        assert!(w.dedup.tracks_symbol("BBB"));
    }

    #[tokio::test]
    async fn eviction_shorter_than_cooldown_keeps_the_symbol_quiet() {
        let (mut w, mut rx) = range_worker(evicting_after(60_000));

        w.on_quote(q("AAA", 1_000, 100.0, 10), 1_000).await;
        let evicted = w.ctx.tracker.evict_idle(61_001);
        assert_eq!(evicted, vec!["AAA".to_string()]);
        w.on_sweep(evicted);

        assert!(w.dedup.tracks_symbol("AAA"));
        assert_eq!(w.clocks.get("AAA"), Some(&1_000));

        w.on_quote(q("AAA", 62_000, 100.0, 10), 62_000).await;
        assert_eq!(count(&w.ctx.counters.alerts_suppressed), 1);

        // The cooldown ends on the symbol's own clock.
        w.on_quote(q("AAA", 301_000, 100.0, 10), 301_000).await;
        assert_eq!(
            drain(&mut rx),
            vec![("AAA".to_string(), 1_000), ("AAA".to_string(), 301_000)]
        );
    }

    #[tokio::test]
    async fn symbol_recreated_before_the_sweep_keeps_its_entries() {
        let (mut w, mut rx) = range_worker(evicting_after(300_000));

        w.on_quote(q("AAA", 1_000, 100.0, 10), 1_000).await;
        let evicted = w.ctx.tracker.evict_idle(301_001);
        assert_eq!(evicted, vec!["AAA".to_string()]);

        // A fresh tick lands before the worker hears about the eviction.
        w.on_quote(q("AAA", 2_000, 100.0, 10), 301_001).await;
        w.on_sweep(evicted);
        w.on_quote(q("AAA", 3_000, 100.0, 10), 301_002).await;

        assert_eq!(drain(&mut rx), vec![("AAA".to_string(), 1_000)]);
        assert_eq!(count(&w.ctx.counters.alerts_suppressed), 2);
        assert!(w.ctx.tracker.contains("AAA"));
        assert_eq!(w.clocks.get("AAA"), Some(&3_000));
    }

    #[tokio::test]
    async fn evicted_symbols_release_their_entries_once_cooled() {
        let (mut w, mut rx) = range_worker(evicting_after(300_000));

        w.on_quote(q("AAA", 1_000, 100.0, 10), 1_000).await;
        w.on_quote(q("BBB", 500_000, 100.0, 10), 500_000).await;
        let evicted = w.ctx.tracker.evict_idle(301_001);
        assert_eq!(evicted, vec!["AAA".to_string()]);
        w.on_sweep(evicted);

        assert!(!w.dedup.tracks_symbol("AAA"));
        assert!(!w.clocks.contains_key("AAA"));
        assert!(w.dedup.tracks_symbol("BBB"));

        // Gone for good: a return after the cooldown alerts again.
        w.on_quote(q("AAA", 302_000, 100.0, 10), 302_000).await;
        assert_eq!(drain(&mut rx).len(), 3);
    }

    /// Evicts everything while an alert is in flight.
    struct EvictingSink {
        tracker: ShardedTracker,
    }

    #[async_trait]
    impl AlertSink for EvictingSink {
        async fn publish(&self, _alert: Alert) -> Result<(), SinkError> {
            self.tracker.evict_idle(u64::MAX);
            Ok(())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn eviction_during_publish_is_benign() {
        let tracker = ShardedTracker::new(TrackerConfig::default(), 1);
        let ctx = ctx(
            EvictingSink {
                tracker: tracker.clone(),
            },
            tracker,
        );
        let (router, workers) = SymbolRouter::spawn(Arc::clone(&ctx), &Span::none(), 16);

        warm_and_spike(&router, "AAPL").await;
        drop(router);
        join_all(workers).await;

        assert_eq!(ctx.counters.alerts_emitted.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.counters.eviction_races.load(Ordering::Relaxed), 1);
        assert!(logs_contain("evicted before the alert was recorded"));
    }

    struct RejectingSink;

    #[async_trait]
    impl AlertSink for RejectingSink {
        async fn publish(&self, _alert: Alert) -> Result<(), SinkError> {
            Err(SinkError::Failed("downstream offline".into()))
        }
    }

    #[tokio::test]
    async fn rejected_alerts_are_retried_on_the_next_match() {
        let ctx = ctx(RejectingSink, ShardedTracker::new(TrackerConfig::default(), 1));
        let (router, workers) = SymbolRouter::spawn(Arc::clone(&ctx), &Span::none(), 16);

        warm_and_spike(&router, "AAPL").await;
        // Still 5x the (now higher) baseline and +10% on the open.
        router.route(q("AAPL", 12_000, 111.0, 1_000_000), 0).await.unwrap();

        drop(router);
        join_all(workers).await;

        let c = &ctx.counters;
        assert_eq!(c.alerts_rejected.load(Ordering::Relaxed), 2);
        assert_eq!(c.alerts_suppressed.load(Ordering::Relaxed), 0);
        assert_eq!(c.alerts_emitted.load(Ordering::Relaxed), 0);
    }
}
