//! Alert sinks.
//!
//! The pipeline hands each deduplicated alert to an [`AlertSink`]. Publishing
//! must not block the partition worker for long; a sink that cannot accept
//! an alert reports it and the deduplicator releases the key.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::model::Alert;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("alert sink is full")]
    Full,

    #[error("alert sink is closed")]
    Closed,

    #[error("alert sink failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    async fn publish(&self, alert: Alert) -> Result<(), SinkError>;

    /// Called once on shutdown after the last publish.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Forwards alerts into a bounded channel without waiting for room.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Alert>,
}

pub fn channel_sink(capacity: usize) -> (ChannelSink, mpsc::Receiver<Alert>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink { tx }, rx)
}

#[async_trait]
impl AlertSink for ChannelSink {
    async fn publish(&self, alert: Alert) -> Result<(), SinkError> {
        self.tx.try_send(alert).map_err(|e| match e {
            mpsc::error::TrySendError::Full(a) => {
                warn!(symbol = %a.symbol, "alert channel full");
                SinkError::Full
            }
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Writes each alert as a structured log event on the `alerts` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn publish(&self, alert: Alert) -> Result<(), SinkError> {
        info!(
            target: "alerts",
            alert_id = %alert.alert_id,
            symbol = %alert.symbol,
            rules = %alert.triggered_rule_ids,
            price = alert.quote.price,
            volume = alert.quote.volume,
            price_change_pct = ?alert.price_change_pct,
            volume_multiple = ?alert.volume_multiple,
            ts_ms = alert.ts_ms,
            "screen alert"
        );
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        info!(target: "alerts", "alert log flushed");
        Ok(())
    }
}
