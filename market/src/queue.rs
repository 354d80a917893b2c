//! Bounded tick queue between the feed and the scan pipeline.
//!
//! When the queue is full the producer either waits for room
//! ([`OverflowPolicy::Block`]) or displaces the oldest queued payload
//! ([`OverflowPolicy::DropOldest`]). Both sides suspend on a `Notify`; nothing
//! spins.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    Block,
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("tick queue closed")]
pub struct QueueClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    Queued,
    /// Accepted, but the oldest queued payload was discarded to make room.
    DisplacedOldest,
}

struct Inner {
    items: VecDeque<String>,
    closed: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}

/// Producer half, handed to the feed. Cheap to clone.
#[derive(Clone)]
pub struct TickSender {
    shared: Arc<Shared>,
}

/// Consumer half, owned by the pipeline dispatcher.
pub struct TickReceiver {
    shared: Arc<Shared>,
}

pub fn tick_queue(capacity: usize, policy: OverflowPolicy) -> (TickSender, TickReceiver) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            items: VecDeque::with_capacity(capacity),
            closed: false,
        }),
        not_empty: Notify::new(),
        not_full: Notify::new(),
        capacity,
        policy,
        accepted: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });

    (
        TickSender {
            shared: Arc::clone(&shared),
        },
        TickReceiver { shared },
    )
}

impl TickSender {
    /// Enqueue one raw payload, applying the overflow policy when full.
    pub async fn push(&self, payload: String) -> Result<Pushed, QueueClosed> {
        let mut payload = Some(payload);

        loop {
            // Register interest before checking, so a pop between the check
            // and the await is not missed.
            let room = self.shared.not_full.notified();

            {
                let mut inner = self.shared.inner.lock();
                if inner.closed {
                    return Err(QueueClosed);
                }

                let outcome = if inner.items.len() < self.shared.capacity {
                    Some(Pushed::Queued)
                } else if self.shared.policy == OverflowPolicy::DropOldest {
                    inner.items.pop_front();
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    Some(Pushed::DisplacedOldest)
                } else {
                    None
                };

                if let Some(outcome) = outcome {
                    if let Some(p) = payload.take() {
                        inner.items.push_back(p);
                    }
                    drop(inner);
                    self.shared.accepted.fetch_add(1, Ordering::Relaxed);
                    self.shared.not_empty.notify_one();
                    return Ok(outcome);
                }
            }

            room.await;
        }
    }

    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    /// Payloads accepted by `push` so far, including ones later displaced.
    pub fn accepted(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Payloads discarded by the drop-oldest policy so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.shared.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TickReceiver {
    /// Next payload, or `None` once the queue is closed and drained.
    pub async fn pop(&mut self) -> Option<String> {
        loop {
            let ready = self.shared.not_empty.notified();

            {
                let mut inner = self.shared.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.shared.not_full.notify_one();
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }

            ready.await;
        }
    }

    /// Stop accepting payloads. Already queued payloads can still be popped.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.shared.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TickReceiver {
    fn drop(&mut self) {
        // Unblock producers waiting for room that will never come.
        self.shared.close();
    }
}
