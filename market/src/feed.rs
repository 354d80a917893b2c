//! Feed collaborator.
//!
//! A feed pushes raw vendor payloads into the scan queue. Returning `Err`
//! means the connection dropped and the caller may reconnect; returning
//! `Ok` means the feed is exhausted or the queue was closed underneath it.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};

use crate::queue::{Pushed, TickSender};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed connection failed: {0}")]
    Connect(String),

    #[error("feed disconnected: {0}")]
    Disconnected(String),

    #[error("feed io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MarketFeed: Send + Sync + 'static {
    /// Push payloads into `out` until the feed ends, disconnects, or `out` closes.
    async fn stream(&self, out: TickSender) -> Result<(), FeedError>;
}

#[derive(Debug, Clone)]
pub enum LineSource {
    Stdin,
    File(PathBuf),
}

/// One JSON payload per line, read from a file or stdin.
#[derive(Debug, Clone)]
pub struct JsonLinesFeed {
    source: LineSource,
}

impl JsonLinesFeed {
    pub fn new(source: LineSource) -> Self {
        Self { source }
    }

    pub fn stdin() -> Self {
        Self::new(LineSource::Stdin)
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(LineSource::File(path.into()))
    }
}

#[async_trait]
impl MarketFeed for JsonLinesFeed {
    async fn stream(&self, out: TickSender) -> Result<(), FeedError> {
        match &self.source {
            LineSource::Stdin => pump_lines(tokio::io::stdin(), out).await,
            LineSource::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    FeedError::Connect(format!("cannot open {}: {e}", path.display()))
                })?;
                info!(path = %path.display(), "reading ticks from file");
                pump_lines(file, out).await
            }
        }
    }
}

async fn pump_lines<R>(reader: R, out: TickSender) -> Result<(), FeedError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(reader).lines();
    let mut forwarded: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match out.push(line.to_string()).await {
            Ok(Pushed::Queued) => {}
            Ok(Pushed::DisplacedOldest) => debug!("queue full; oldest tick displaced"),
            Err(_) => {
                debug!(forwarded, "queue closed; feed stopping");
                return Ok(());
            }
        }
        forwarded += 1;
    }

    info!(forwarded, "line feed exhausted");
    Ok(())
}
