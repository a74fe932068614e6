//! Broadcast server
//!
//! Owns the subscriber registry, accepts connections and fans out each
//! sampled payload to every active subscriber.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::registry::{RegistryConfig, SubscriberRegistry};
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::transport::{ConnectionRequest, Transport, WsRequest};
use crate::session::{CloseReason, ConnectionState};
use crate::stats::{ServerMetrics, ServerStats};

/// Broadcast server
pub struct BroadcastServer {
    config: ServerConfig,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<ServerMetrics>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl BroadcastServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry_config(config, RegistryConfig::default())
    }

    /// Create a new server with custom registry configuration
    pub fn with_registry_config(config: ServerConfig, registry_config: RegistryConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            registry: Arc::new(SubscriberRegistry::with_config(registry_config)),
            metrics: Arc::new(ServerMetrics::new()),
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Get a reference to the subscriber registry
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Snapshot of the server counters
    pub fn stats(&self) -> ServerStats {
        self.metrics.snapshot()
    }

    /// Fan a freshly sampled payload out to every active subscriber
    pub async fn tick(&self, payload: Bytes) {
        let size = payload.len();
        let report = self.registry.broadcast(payload).await;
        self.metrics.record_broadcast(&report);

        tracing::debug!(
            bytes = size,
            delivered = report.delivered,
            dropped = report.dropped,
            pruned = report.pruned,
            "Broadcast"
        );
    }

    /// Serve one connection from handshake to teardown
    ///
    /// Resolves once the connection has fully terminated. A failed
    /// handshake returns its error without creating a subscriber.
    pub async fn accept<R: ConnectionRequest>(&self, request: R) -> Result<CloseReason> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let mut state = ConnectionState::new(id, request.peer_addr());

        let timeout = self.config.handshake_timeout;
        let transport = match tokio::time::timeout(timeout, request.handshake()).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                self.metrics.handshake_failed();
                tracing::debug!(
                    connection = id,
                    peer = ?state.peer_addr,
                    error = %e,
                    "Handshake failed"
                );
                return Err(e);
            }
            Err(_) => {
                self.metrics.handshake_failed();
                tracing::debug!(
                    connection = id,
                    peer = ?state.peer_addr,
                    "Handshake timed out"
                );
                return Err(Error::HandshakeTimeout(timeout));
            }
        };

        // Registered before the first mailbox read, so no broadcast after
        // this point is missed.
        let (handle, subscriber) = self.registry.subscriber();
        if !self.registry.add(handle).await {
            return Ok(self.refuse_after_shutdown(&mut state, transport).await);
        }
        state.activate(subscriber.id());
        self.metrics.connection_opened();

        tracing::debug!(
            connection = id,
            subscriber = subscriber.id(),
            peer = ?state.peer_addr,
            "Connection active"
        );

        Connection::new(
            state,
            transport,
            subscriber,
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
            self.config.write_deadline,
        )
        .run()
        .await
    }

    /// Close a transport whose handshake finished after shutdown began
    async fn refuse_after_shutdown<T: Transport>(
        &self,
        state: &mut ConnectionState,
        mut transport: T,
    ) -> CloseReason {
        let reason = CloseReason::ServerShutdown;
        state.close();

        let deadline = self.config.write_deadline;
        if tokio::time::timeout(deadline, transport.close(Some(&reason)))
            .await
            .is_err()
        {
            tracing::debug!(connection = state.id, "Transport close timed out");
        }

        tracing::debug!(
            connection = state.id,
            peer = ?state.peer_addr,
            "Connection refused: server shutting down"
        );
        reason
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails to bind.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(self: &Arc<Self>, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already bound listener until `shutdown`
    /// resolves
    ///
    /// Returns once every connection task has finished. Tasks still running
    /// after the handshake timeout plus the write deadline are aborted.
    pub async fn serve<F>(self: &Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, path = %self.config.path, "Broadcast server listening");

        let mut connections = JoinSet::new();

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
            }
            _ = self.accept_loop(&listener, &mut connections) => {}
        }

        // Handlers see their mailbox end and close their transports. Those
        // still in the handshake are refused once it completes.
        self.registry.close_all().await;

        let grace = self.config.handshake_timeout + self.config.write_deadline;
        let drain = async { while connections.join_next().await.is_some() {} };
        let drained = tokio::time::timeout(grace, drain).await.is_ok();
        if !drained {
            tracing::warn!(
                remaining = connections.len(),
                "Connections still open after shutdown, aborting"
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        Ok(())
    }

    async fn accept_loop(
        self: &Arc<Self>,
        listener: &TcpListener,
        connections: &mut JoinSet<()>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        self.handle_connection(socket, peer_addr, connections);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                },
                // Reap finished connection tasks
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }

    fn handle_connection(
        self: &Arc<Self>,
        socket: TcpStream,
        peer_addr: SocketAddr,
        connections: &mut JoinSet<()>,
    ) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.metrics.connection_rejected();
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let server = Arc::clone(self);
        let request = WsRequest::new(socket, peer_addr, self.config.path.clone());

        connections.spawn(async move {
            let _permit = permit;

            match server.accept(request).await {
                Ok(reason) => {
                    tracing::debug!(peer = %peer_addr, reason = %reason, "Connection finished");
                }
                Err(e) => {
                    tracing::debug!(peer = %peer_addr, error = %e, "Connection error");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::server::transport::mock::{self, WriteMode};

    async fn wait_for_subscribers(server: &BroadcastServer, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while server.registry().len().await != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscribers did not register");
    }

    #[tokio::test]
    async fn test_three_clients_one_disconnects() {
        let server = Arc::new(BroadcastServer::new(ServerConfig::default()));

        let mut clients = Vec::new();
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let (request, client) = mock::connection();
            let server = Arc::clone(&server);
            tasks.push(tokio::spawn(async move { server.accept(request).await }));
            clients.push(client);
        }
        wait_for_subscribers(&server, 3).await;

        server.tick(Bytes::from_static(b"P1")).await;
        for client in clients.iter_mut() {
            assert_eq!(client.frames.recv().await.unwrap(), "P1");
            assert!(client.frames.try_recv().is_err());
        }

        // Client 2's transport fails
        clients[1].set_write_mode(WriteMode::Fail);
        clients[1].disconnect(CloseReason::ReadError("connection reset".into()));
        let task2 = tasks.remove(1);
        assert!(matches!(
            task2.await.unwrap(),
            Ok(CloseReason::ReadError(_)) | Err(_)
        ));
        wait_for_subscribers(&server, 2).await;

        server.tick(Bytes::from_static(b"P2")).await;
        assert_eq!(clients[0].frames.recv().await.unwrap(), "P2");
        assert_eq!(clients[2].frames.recv().await.unwrap(), "P2");
        assert!(clients[1].frames.try_recv().is_err());

        assert_eq!(server.registry().len().await, 2);
        for task in &tasks {
            assert!(!task.is_finished());
        }

        let stats = server.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.broadcasts, 2);
        assert_eq!(stats.payloads_enqueued, 5);
    }

    #[tokio::test]
    async fn test_handshake_failure_creates_no_subscriber() {
        let server = BroadcastServer::new(ServerConfig::default());
        let (request, _client) = mock::connection();

        let result = server.accept(request.failing_handshake()).await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(server.registry().is_empty().await);

        let stats = server.stats();
        assert_eq!(stats.handshake_failures, 1);
        assert_eq!(stats.total_connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_creates_no_subscriber() {
        let config = ServerConfig::default().handshake_timeout(Duration::from_secs(5));
        let server = BroadcastServer::new(config);
        let (request, _client) = mock::connection();

        let start = tokio::time::Instant::now();
        let result = server.accept(request.stalled_handshake()).await;

        assert!(matches!(result, Err(Error::HandshakeTimeout(d)) if d == Duration::from_secs(5)));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(server.registry().is_empty().await);

        let stats = server.stats();
        assert_eq!(stats.handshake_failures, 1);
        assert_eq!(stats.total_connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_completing_after_shutdown_is_refused() {
        let server = Arc::new(BroadcastServer::new(ServerConfig::default()));
        let (request, client) = mock::connection();

        let task = {
            let server = Arc::clone(&server);
            let request = request.slow_handshake(Duration::from_millis(100));
            tokio::spawn(async move { server.accept(request).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        server.registry().close_all().await;

        let reason = task.await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::ServerShutdown);
        assert!(server.registry().is_empty().await);
        assert!(client.is_closed());

        // Later broadcasts reach nobody
        server.tick(Bytes::from_static(b"late")).await;
        let stats = server.stats();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.payloads_enqueued, 0);
    }

    #[tokio::test]
    async fn test_reconnect_only_sees_new_payloads() {
        let server = Arc::new(BroadcastServer::new(ServerConfig::default()));

        let (request, client) = mock::connection();
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.accept(request).await })
        };
        wait_for_subscribers(&server, 1).await;
        server.tick(Bytes::from_static(b"old")).await;
        client.disconnect(CloseReason::ClientClosed);
        task.await.unwrap().unwrap();

        server.tick(Bytes::from_static(b"missed")).await;

        let (request, mut client) = mock::connection();
        let _task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.accept(request).await })
        };
        wait_for_subscribers(&server, 1).await;
        server.tick(Bytes::from_static(b"new")).await;

        assert_eq!(client.frames.recv().await.unwrap(), "new");
        assert!(client.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tick_without_subscribers() {
        let server = BroadcastServer::new(ServerConfig::default());

        server.tick(Bytes::from_static(b"nobody")).await;

        let stats = server.stats();
        assert_eq!(stats.broadcasts, 1);
        assert_eq!(stats.payloads_enqueued, 0);
    }
}
