//! Subscriber and mailbox types
//!
//! A mailbox is a bounded `mpsc` channel. The registry keeps the sending
//! half ([`SubscriberHandle`]); the connection handler owns the receiving
//! half ([`Subscriber`]).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::config::OverflowPolicy;

/// Registry-assigned subscriber identity, never reused
pub type SubscriberId = u64;

/// Counters shared between both halves of a mailbox
#[derive(Debug, Default)]
struct MailboxCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// Outcome of enqueueing a payload into one mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Delivery {
    Enqueued,
    Dropped,
    Closed,
}

/// Producing half of a subscriber mailbox, held by the registry
#[derive(Debug)]
pub struct SubscriberHandle {
    id: SubscriberId,
    tx: mpsc::Sender<Bytes>,
    counters: Arc<MailboxCounters>,
}

impl SubscriberHandle {
    /// Subscriber this handle delivers to
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Number of payloads waiting in the mailbox
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub(super) async fn deliver(&self, payload: Bytes, policy: OverflowPolicy) -> Delivery {
        let delivery = match policy {
            OverflowPolicy::Block => match self.tx.send(payload).await {
                Ok(()) => Delivery::Enqueued,
                Err(_) => Delivery::Closed,
            },
            OverflowPolicy::DropNewest => match self.tx.try_send(payload) {
                Ok(()) => Delivery::Enqueued,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
        };

        match delivery {
            Delivery::Enqueued => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Dropped => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Closed => {}
        }

        delivery
    }
}

/// Per-connection subscriber: the consuming half of a mailbox
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    rx: mpsc::Receiver<Bytes>,
    counters: Arc<MailboxCounters>,
}

impl Subscriber {
    /// Create a mailbox with the given capacity, returning both halves
    pub fn mailbox(id: SubscriberId, capacity: usize) -> (SubscriberHandle, Subscriber) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(MailboxCounters::default());

        let handle = SubscriberHandle {
            id,
            tx,
            counters: Arc::clone(&counters),
        };
        let subscriber = Subscriber { id, rx, counters };

        (handle, subscriber)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next payload
    ///
    /// Returns `None` once the registry has released its handle and the
    /// mailbox is drained. Cancel safe.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a payload if one is ready
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting payloads
    ///
    /// Any broadcaster blocked on this mailbox is released and sees it as
    /// closed.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Total payloads accepted into this mailbox
    pub fn enqueued(&self) -> u64 {
        self.counters.enqueued.load(Ordering::Relaxed)
    }

    /// Payloads discarded because the mailbox was full
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}
