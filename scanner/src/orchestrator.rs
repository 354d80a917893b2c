//! Scan Orchestrator
//!
//! Wires one scan run:
//!
//! ```text
//! feed ──▶ TickQueue ──▶ dispatcher ──▶ partition workers ──▶ AlertSink
//!  ▲        (bounded)    (normalize)     (track, evaluate,
//!  │                                      dedup, publish)
//! supervisor (reconnect / backoff)        sweeper (evict idle symbols)
//! ```
//!
//! Stopping is cooperative: the supervisor halts the feed and closes the
//! queue, the dispatcher drains what was already accepted, workers drain their
//! partitions, and the sink is flushed last.

use std::sync::Arc;
use std::time::Duration;

use alerts::AlertSink;
use common::logger::{TraceId, root_span};
use futures::future::join_all;
use market::feed::MarketFeed;
use market::normalizer::normalize_payload;
use market::queue::{TickReceiver, TickSender, tick_queue};
use market::tracker::ShardedTracker;
use rules::{RuleConfig, ScreenHit, screen};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::backoff::ReconnectPolicy;
use crate::clock::ArrivalClock;
use crate::config::ScanConfig;
use crate::counters::{Counters, ScanReport, bump};
use crate::error::ScanError;
use crate::health::ScanHealth;
use crate::router::{PipelineCtx, SymbolRouter, WORKER_QUEUE_CAPACITY};

pub struct ScanOrchestrator<F: MarketFeed, S: AlertSink> {
    cfg: ScanConfig,
    feed: Arc<F>,
    sink: Arc<S>,
}

impl<F: MarketFeed, S: AlertSink> ScanOrchestrator<F, S> {
    pub fn new(cfg: ScanConfig, feed: F, sink: S) -> Result<Self, ScanError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            feed: Arc::new(feed),
            sink: Arc::new(sink),
        })
    }

    /// Spawn the run on the current tokio runtime.
    pub fn start(self) -> ScanHandle {
        let Self { cfg, feed, sink } = self;

        let trace_id = TraceId::new();
        let root = root_span("scan", &trace_id);

        let tracker = ShardedTracker::new(cfg.tracker(), cfg.workers);
        let counters = Counters::default();
        let rules = cfg.rules();
        let clock = ArrivalClock::start();

        let (stop_tx, stop_rx) = watch::channel(false);
        let (health_tx, health_rx) = watch::channel(ScanHealth::Starting);
        let health_tx = Arc::new(health_tx);
        let (tick_tx, tick_rx) = tick_queue(cfg.queue_capacity, cfg.overflow_policy);

        let ctx = Arc::new(PipelineCtx {
            tracker: tracker.clone(),
            rules: rules.clone(),
            cooldown_ms: cfg.cooldown_ms(),
            sink: Arc::clone(&sink),
            counters: counters.clone(),
        });
        let (router, workers) = SymbolRouter::spawn(ctx, &root, WORKER_QUEUE_CAPACITY);

        let supervisor = tokio::spawn(
            supervise_feed(
                feed,
                tick_tx.clone(),
                cfg.reconnect,
                Arc::clone(&health_tx),
                counters.clone(),
                stop_rx,
            )
            .instrument(info_span!(parent: &root, "feed_supervisor")),
        );

        let dispatcher = tokio::spawn(
            dispatch(tick_rx, router.clone(), counters.clone(), health_tx, clock)
                .instrument(info_span!(parent: &root, "dispatcher")),
        );

        let sweeper = tokio::spawn(
            sweep_idle(
                tracker.clone(),
                router,
                counters.clone(),
                Duration::from_secs(cfg.sweep_interval_seconds),
                clock,
            )
            .instrument(info_span!(parent: &root, "sweeper")),
        );

        info!(
            parent: &root,
            workers = cfg.workers,
            queue_capacity = cfg.queue_capacity,
            overflow_policy = ?cfg.overflow_policy,
            rules = %rules.configured(),
            cooldown_seconds = cfg.cooldown_seconds,
            "scan started"
        );

        let run = tokio::spawn(
            finish(Finish {
                supervisor,
                dispatcher,
                sweeper,
                workers,
                sink,
                tick_tx,
                tracker: tracker.clone(),
                counters: counters.clone(),
                rules: rules.clone(),
                results_limit: cfg.results_limit,
            })
            .instrument(root),
        );

        ScanHandle {
            stop: StopSignal {
                tx: Arc::new(stop_tx),
            },
            health: health_rx,
            tracker,
            counters,
            rules,
            results_limit: cfg.results_limit,
            run,
        }
    }
}

/// Cloneable trigger for a cooperative stop.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct ScanHandle {
    stop: StopSignal,
    health: watch::Receiver<ScanHealth>,
    tracker: ShardedTracker,
    counters: Counters,
    rules: RuleConfig,
    results_limit: usize,
    run: JoinHandle<Result<ScanReport, ScanError>>,
}

impl ScanHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn health(&self) -> watch::Receiver<ScanHealth> {
        self.health.clone()
    }

    pub fn tracker(&self) -> &ShardedTracker {
        &self.tracker
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// On-demand screen over the symbols tracked right now.
    pub fn top_matches(&self) -> Vec<ScreenHit> {
        screen(self.tracker.snapshots(), &self.rules, self.results_limit)
    }

    /// Wait for the run to end, either because the feed finished, a stop was
    /// requested, or the feed could not be reconnected.
    pub async fn join(self) -> Result<ScanReport, ScanError> {
        self.run
            .await
            .map_err(|e| ScanError::TaskFailed(e.to_string()))?
    }
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    // A dropped handle never stops the run; only an explicit stop does.
    if stop.wait_for(|s| *s).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn supervise_feed<F: MarketFeed>(
    feed: Arc<F>,
    tx: TickSender,
    policy: ReconnectPolicy,
    health: Arc<watch::Sender<ScanHealth>>,
    counters: Counters,
    mut stop: watch::Receiver<bool>,
) -> Result<(), ScanError> {
    let mut failures: u32 = 0;

    let result = loop {
        if failures == 0 {
            health.send_replace(ScanHealth::Healthy);
        }
        let accepted_before = tx.accepted();

        let outcome = tokio::select! {
            r = feed.stream(tx.clone()) => r,
            _ = stop_requested(&mut stop) => {
                info!("stop requested; feed halted");
                break Ok(());
            }
        };

        let err = match outcome {
            Ok(()) => {
                info!(accepted = tx.accepted(), "feed finished");
                break Ok(());
            }
            Err(e) => e,
        };

        // A session that delivered anything starts the count over.
        if tx.accepted() > accepted_before {
            failures = 0;
        }
        failures += 1;

        if policy.exhausted(failures) {
            error!(attempts = failures, error = %err, "feed reconnect attempts exhausted");
            health.send_replace(ScanHealth::Degraded {
                reason: err.to_string(),
            });
            break Err(ScanError::FeedDisconnected {
                attempts: failures,
                last_error: err.to_string(),
            });
        }

        let delay = policy.delay_for(failures);
        warn!(
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "feed disconnected; reconnecting"
        );
        health.send_replace(ScanHealth::Reconnecting { attempt: failures });
        bump(&counters.feed_reconnects);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_requested(&mut stop) => {
                info!("stop requested during backoff");
                break Ok(());
            }
        }
    };

    tx.close();
    result
}

async fn dispatch(
    mut rx: TickReceiver,
    router: SymbolRouter,
    counters: Counters,
    health: Arc<watch::Sender<ScanHealth>>,
    clock: ArrivalClock,
) {
    while let Some(raw) = rx.pop().await {
        bump(&counters.ticks_received);
        mark_recovered(&health);

        let quote = match normalize_payload(&raw) {
            Ok(q) => q,
            Err(e) => {
                bump(&counters.ticks_malformed);
                debug!(reason = e.reason(), error = %e, "malformed tick dropped");
                continue;
            }
        };

        if let Err(e) = router.route(quote, clock.now_ms()).await {
            error!(error = %e, "dispatcher stopping");
            rx.close();
            break;
        }
    }

    debug!(dropped = rx.dropped(), "dispatcher drained");
}

/// Ticks flowing again after a reconnect mean the feed is back.
fn mark_recovered(health: &watch::Sender<ScanHealth>) {
    if matches!(*health.borrow(), ScanHealth::Reconnecting { .. }) {
        health.send_if_modified(|h| {
            if matches!(h, ScanHealth::Reconnecting { .. }) {
                *h = ScanHealth::Healthy;
                true
            } else {
                false
            }
        });
    }
}

async fn sweep_idle(
    tracker: ShardedTracker,
    router: SymbolRouter,
    counters: Counters,
    every: Duration,
    clock: ArrivalClock,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let evicted = tracker.evict_idle(clock.now_ms());
        counters
            .symbols_evicted
            .fetch_add(evicted.len() as u64, std::sync::atomic::Ordering::Relaxed);

        if router.sweep(evicted).await.is_err() {
            break;
        }
    }
}

struct Finish<S: AlertSink> {
    supervisor: JoinHandle<Result<(), ScanError>>,
    dispatcher: JoinHandle<()>,
    sweeper: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    sink: Arc<S>,
    tick_tx: TickSender,
    tracker: ShardedTracker,
    counters: Counters,
    rules: RuleConfig,
    results_limit: usize,
}

async fn finish<S: AlertSink>(f: Finish<S>) -> Result<ScanReport, ScanError> {
    let feed_result = match f.supervisor.await {
        Ok(r) => r,
        Err(e) => Err(ScanError::TaskFailed(e.to_string())),
    };
    // Already closed unless the supervisor panicked.
    f.tick_tx.close();

    if let Err(e) = f.dispatcher.await {
        error!(error = %e, "dispatcher task failed");
    }

    // The sweeper holds router senders; workers only exit once it is gone.
    f.sweeper.abort();
    let _ = f.sweeper.await;

    for r in join_all(f.workers).await {
        if let Err(e) = r {
            error!(error = %e, "partition worker failed");
        }
    }

    if let Err(e) = f.sink.flush().await {
        warn!(error = %e, "alert sink flush failed");
    }

    let mut report = f.counters.report(f.tick_tx.dropped(), f.tracker.len());
    report.top_matches = screen(f.tracker.snapshots(), &f.rules, f.results_limit);

    info!(
        ticks_received = report.ticks_received,
        ticks_dropped = report.ticks_dropped,
        ticks_malformed = report.ticks_malformed,
        alerts_emitted = report.alerts_emitted,
        alerts_suppressed = report.alerts_suppressed,
        symbols_tracked = report.symbols_tracked,
        ok = feed_result.is_ok(),
        "scan finished"
    );

    feed_result.map(|()| report)
}
