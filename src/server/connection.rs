//! Per-connection delivery loop
//!
//! A connection is Active from the moment its subscriber is registered. It
//! then waits on two things at once: the next payload in its mailbox and
//! the transport's closure signal. Every exit path goes through the same
//! teardown, which unregisters the subscriber exactly once.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::registry::{Subscriber, SubscriberRegistry};
use crate::session::{CloseReason, ConnectionState};
use crate::stats::ServerMetrics;

use super::transport::Transport;

/// Connection handler for one subscriber
pub struct Connection<T: Transport> {
    state: ConnectionState,
    transport: T,
    subscriber: Subscriber,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<ServerMetrics>,
    write_deadline: Duration,
}

impl<T: Transport> Connection<T> {
    /// Create a handler for an already registered subscriber
    pub fn new(
        state: ConnectionState,
        transport: T,
        subscriber: Subscriber,
        registry: Arc<SubscriberRegistry>,
        metrics: Arc<ServerMetrics>,
        write_deadline: Duration,
    ) -> Self {
        Self {
            state,
            transport,
            subscriber,
            registry,
            metrics,
            write_deadline,
        }
    }

    /// Pump payloads until the connection ends
    ///
    /// Returns the close reason when the peer went away or the server shut
    /// down, and the error when a write failed or timed out.
    pub async fn run(mut self) -> Result<CloseReason> {
        let outcome = self.pump().await;
        self.teardown(&outcome).await;
        outcome
    }

    async fn pump(&mut self) -> Result<CloseReason> {
        loop {
            tokio::select! {
                payload = self.subscriber.recv() => match payload {
                    Some(payload) => self.write(payload).await?,
                    None => return Ok(CloseReason::ServerShutdown),
                },
                reason = self.transport.closed() => return Ok(reason),
            }
        }
    }

    async fn write(&mut self, payload: Bytes) -> Result<()> {
        let len = payload.len();

        match tokio::time::timeout(self.write_deadline, self.transport.send(payload)).await {
            Ok(Ok(())) => {
                self.state.on_delivered(len);
                self.metrics.payload_sent();
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::WriteTimeout(self.write_deadline)),
        }
    }

    async fn teardown(&mut self, outcome: &Result<CloseReason>) {
        if !self.state.close() {
            return;
        }

        // Closing the mailbox first releases a broadcaster that may be
        // blocked on it while holding the registry lock.
        self.subscriber.close();
        self.registry.remove(self.subscriber.id()).await;

        let reason = outcome.as_ref().ok();
        if tokio::time::timeout(self.write_deadline, self.transport.close(reason))
            .await
            .is_err()
        {
            tracing::debug!(connection = self.state.id, "Transport close timed out");
        }

        self.metrics.connection_closed();

        match outcome {
            Ok(reason) => {
                tracing::info!(
                    connection = self.state.id,
                    subscriber = self.subscriber.id(),
                    peer = ?self.state.peer_addr,
                    reason = %reason,
                    payloads = self.state.stats.payloads_sent,
                    bitrate = self.state.stats.bitrate(),
                    duration_ms = self.state.stats.duration.as_millis() as u64,
                    "Connection closed"
                );
            }
            Err(e) => {
                self.metrics.write_failed();
                tracing::warn!(
                    connection = self.state.id,
                    subscriber = self.subscriber.id(),
                    peer = ?self.state.peer_addr,
                    error = %e,
                    payloads = self.state.stats.payloads_sent,
                    "Connection closed on write failure"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use crate::server::transport::mock::{self, MockClient, MockRequest, WriteMode};
    use crate::server::transport::ConnectionRequest;

    struct Harness {
        registry: Arc<SubscriberRegistry>,
        metrics: Arc<ServerMetrics>,
    }

    impl Harness {
        fn new(config: RegistryConfig) -> Self {
            Self {
                registry: Arc::new(SubscriberRegistry::with_config(config)),
                metrics: Arc::new(ServerMetrics::new()),
            }
        }

        async fn connect(
            &self,
            id: u64,
        ) -> (
            tokio::task::JoinHandle<Result<CloseReason>>,
            MockClient,
        ) {
            let (request, client): (MockRequest, MockClient) = mock::connection();
            let transport = request.handshake().await.unwrap();

            let subscriber = self.registry.register().await;
            let mut state = ConnectionState::new(id, None);
            state.activate(subscriber.id());
            self.metrics.connection_opened();

            let connection = Connection::new(
                state,
                transport,
                subscriber,
                Arc::clone(&self.registry),
                Arc::clone(&self.metrics),
                Duration::from_secs(1),
            );
            (tokio::spawn(connection.run()), client)
        }
    }

    #[tokio::test]
    async fn test_delivers_in_order_until_client_closes() {
        let h = Harness::new(RegistryConfig::default());
        let (task, mut client) = h.connect(1).await;

        for p in ["p1", "p2", "p3"] {
            h.registry.broadcast(Bytes::from_static(p.as_bytes())).await;
        }
        assert_eq!(client.frames.recv().await.unwrap(), "p1");
        assert_eq!(client.frames.recv().await.unwrap(), "p2");
        assert_eq!(client.frames.recv().await.unwrap(), "p3");

        client.disconnect(CloseReason::ClientClosed);
        let reason = task.await.unwrap().unwrap();

        assert_eq!(reason, CloseReason::ClientClosed);
        assert!(h.registry.is_empty().await);
        assert!(client.is_closed());

        let stats = h.metrics.snapshot();
        assert_eq!(stats.payloads_sent, 3);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.write_failures, 0);
    }

    #[tokio::test]
    async fn test_write_failure_unregisters_and_isolates() {
        let h = Harness::new(RegistryConfig::default());
        let (failing_task, failing) = h.connect(1).await;
        let (healthy_task, mut healthy) = h.connect(2).await;

        failing.set_write_mode(WriteMode::Fail);
        h.registry.broadcast(Bytes::from_static(b"p1")).await;

        let err = failing_task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(failing.is_closed());
        assert_eq!(h.registry.len().await, 1);

        h.registry.broadcast(Bytes::from_static(b"p2")).await;
        assert_eq!(healthy.frames.recv().await.unwrap(), "p1");
        assert_eq!(healthy.frames.recv().await.unwrap(), "p2");
        assert!(!healthy_task.is_finished());

        assert_eq!(h.metrics.snapshot().write_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out() {
        let h = Harness::new(RegistryConfig::default());
        let (task, client) = h.connect(1).await;

        client.set_write_mode(WriteMode::Stall);
        h.registry.broadcast(Bytes::from_static(b"p1")).await;

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::WriteTimeout(d) if d == Duration::from_secs(1)));
        assert!(h.registry.is_empty().await);
        assert!(client.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_releases_blocked_broadcast() {
        let h = Harness::new(RegistryConfig::default().mailbox_capacity(1));
        let (stalled_task, stalled) = h.connect(1).await;
        let (_healthy_task, mut healthy) = h.connect(2).await;

        stalled.set_write_mode(WriteMode::Stall);

        // p1 is taken by the stalled writer, p2 fills its mailbox, p3 blocks
        // until the write deadline tears the stalled connection down.
        for p in ["p1", "p2", "p3"] {
            h.registry.broadcast(Bytes::from_static(p.as_bytes())).await;
        }

        assert!(stalled_task.await.unwrap().is_err());
        assert_eq!(healthy.frames.recv().await.unwrap(), "p1");
        assert_eq!(healthy.frames.recv().await.unwrap(), "p2");
        assert_eq!(healthy.frames.recv().await.unwrap(), "p3");
        assert_eq!(h.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_read_error_is_a_clean_close() {
        let h = Harness::new(RegistryConfig::default());
        let (task, client) = h.connect(1).await;

        client.disconnect(CloseReason::ReadError("connection reset".into()));
        let reason = task.await.unwrap().unwrap();

        assert_eq!(reason, CloseReason::ReadError("connection reset".into()));
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_registry_shutdown_ends_connection() {
        let h = Harness::new(RegistryConfig::default());
        let (task, client) = h.connect(1).await;

        h.registry.close_all().await;
        let reason = task.await.unwrap().unwrap();

        assert_eq!(reason, CloseReason::ServerShutdown);
        assert!(client.is_closed());
    }
}
