//! Subscriber registry implementation
//!
//! The authoritative set of subscribers currently willing to receive
//! broadcasts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::Mutex;

use super::config::RegistryConfig;
use super::subscriber::{Delivery, Subscriber, SubscriberHandle, SubscriberId};

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Mailboxes that accepted the payload
    pub delivered: usize,
    /// Mailboxes that were full under a drop policy
    pub dropped: usize,
    /// Closed mailboxes removed during the pass
    pub pruned: usize,
}

/// Registry of active subscribers
///
/// Every read and write goes through one async mutex. A broadcast keeps the
/// lock for its whole fan-out, so a subscriber added concurrently either
/// receives the payload or it does not; there is no partial pass.
pub struct SubscriberRegistry {
    /// Producing halves keyed by subscriber ID
    subscribers: Mutex<HashMap<SubscriberId, SubscriberHandle>>,

    /// Next subscriber ID to hand out
    next_id: AtomicU64,

    /// Set by `close_all`; only read or written while holding the lock
    closed: AtomicBool,

    /// Configuration
    config: RegistryConfig,
}

impl SubscriberRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Allocate a fresh subscriber with an empty mailbox
    ///
    /// The subscriber does not receive anything until its handle is passed
    /// to [`add`](Self::add).
    pub fn subscriber(&self) -> (SubscriberHandle, Subscriber) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Subscriber::mailbox(id, self.config.mailbox_capacity)
    }

    /// Allocate and register a subscriber in one step
    ///
    /// After [`close_all`](Self::close_all) the returned mailbox is already
    /// ended.
    pub async fn register(&self) -> Subscriber {
        let (handle, subscriber) = self.subscriber();
        self.add(handle).await;
        subscriber
    }

    /// Register a subscriber
    ///
    /// Returns `false` once the registry has been closed. The handle is
    /// dropped in that case, which ends the subscriber's mailbox.
    pub async fn add(&self, handle: SubscriberHandle) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let id = handle.id();

        if self.closed.load(Ordering::Relaxed) {
            tracing::debug!(subscriber = id, "Registry closed, subscriber refused");
            return false;
        }

        subscribers.insert(id, handle);

        tracing::info!(
            subscriber = id,
            subscribers = subscribers.len(),
            "Subscriber added"
        );
        true
    }

    /// Unregister a subscriber
    ///
    /// Removing an absent subscriber is a no-op. Returns whether an entry
    /// was removed.
    pub async fn remove(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let removed = subscribers.remove(&id).is_some();

        if removed {
            tracing::info!(
                subscriber = id,
                subscribers = subscribers.len(),
                "Subscriber removed"
            );
        }

        removed
    }

    /// Enqueue a payload into every registered mailbox
    ///
    /// Mailboxes whose subscriber has gone away are pruned in the same pass.
    pub async fn broadcast(&self, payload: Bytes) -> BroadcastReport {
        let mut subscribers = self.subscribers.lock().await;
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        for (id, handle) in subscribers.iter() {
            match handle.deliver(payload.clone(), self.config.overflow).await {
                Delivery::Enqueued => report.delivered += 1,
                Delivery::Dropped => {
                    report.dropped += 1;
                    tracing::debug!(subscriber = id, "Payload dropped (mailbox full)");
                }
                Delivery::Closed => closed.push(*id),
            }
        }

        for id in closed {
            subscribers.remove(&id);
            report.pruned += 1;
            tracing::debug!(subscriber = id, "Closed subscriber pruned during broadcast");
        }

        report
    }

    /// Release every mailbox and refuse later registrations
    ///
    /// Handlers see the end of their mailbox and shut down. Returns the
    /// number of subscribers released.
    pub async fn close_all(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        self.closed.store(true, Ordering::Relaxed);
        let count = subscribers.len();
        subscribers.clear();

        if count > 0 {
            tracing::info!(subscribers = count, "All subscribers released");
        }

        count
    }

    /// Whether [`close_all`](Self::close_all) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Number of registered subscribers
    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Whether no subscriber is registered
    pub async fn is_empty(&self) -> bool {
        self.subscribers.lock().await.is_empty()
    }

    /// Whether the given subscriber is registered
    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().await.contains_key(&id)
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
