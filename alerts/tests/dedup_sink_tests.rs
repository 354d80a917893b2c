use alerts::{AlertDeduplicator, AlertSink, Decision, SinkError, channel_sink};
use alerts::Alert;
use market::types::Quote;
use rules::{Evaluation, RuleId, RuleSet};

fn matched(symbol: &str, ts_ms: u64) -> Alert {
    let set: RuleSet = [RuleId::Volume, RuleId::Range].into_iter().collect();
    Alert::new(
        Quote {
            symbol: symbol.into(),
            ts_ms,
            price: 4.0,
            volume: 900_000,
            float_shares: Some(8_000_000),
            session_open: Some(3.5),
        },
        &Evaluation {
            configured: set,
            triggered: set,
            price_change_pct: Some(4.0 / 3.5 - 1.0),
            volume_multiple: Some(9.0),
        },
    )
}

/// Offer, publish, then confirm or release; the worker's sequence.
async fn deliver(
    dedup: &mut AlertDeduplicator,
    sink: &impl AlertSink,
    alert: Alert,
) -> Option<Result<(), SinkError>> {
    let now = alert.ts_ms;
    let Decision::Emit(alert) = dedup.offer(alert, now) else {
        return None;
    };
    let key = alert.key();
    let res = sink.publish(alert).await;
    match res {
        Ok(()) => {
            dedup.confirm(&key, now);
        }
        Err(_) => {
            dedup.release(&key);
        }
    }
    Some(res)
}

#[tokio::test]
async fn repeated_matches_reach_the_sink_once_per_cooldown() {
    let (sink, mut rx) = channel_sink(16);
    let mut dedup = AlertDeduplicator::new(300_000);

    for ts in [1_000, 30_000, 120_000, 299_999] {
        deliver(&mut dedup, &sink, matched("GME", ts)).await;
    }
    deliver(&mut dedup, &sink, matched("GME", 301_000)).await;

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.ts_ms, 1_000);
    assert_eq!(second.ts_ms, 301_000);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn rejected_publish_is_retried_on_next_match() {
    let (sink, mut rx) = channel_sink(1);
    let mut dedup = AlertDeduplicator::new(300_000);

    // Fill the channel with another symbol's alert.
    assert!(matches!(deliver(&mut dedup, &sink, matched("AMC", 1)).await, Some(Ok(()))));
    assert!(matches!(
        deliver(&mut dedup, &sink, matched("GME", 2)).await,
        Some(Err(SinkError::Full))
    ));

    rx.recv().await.unwrap();
    assert!(matches!(deliver(&mut dedup, &sink, matched("GME", 3)).await, Some(Ok(()))));
    assert_eq!(rx.recv().await.unwrap().ts_ms, 3);
}
