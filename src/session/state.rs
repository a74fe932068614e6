//! Connection state machine
//!
//! Tracks a subscriber connection from accept to teardown.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::registry::SubscriberId;
use crate::stats::SessionStats;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Accepted, transport handshake in progress
    Connecting,
    /// Registered and pumping payloads
    Active,
    /// Terminal
    Closed,
}

/// Why a connection stopped without a write error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed the connection
    ClientClosed,
    /// Client sent data on a send-only stream
    UnexpectedData,
    /// Reading from the transport failed
    ReadError(String),
    /// The registry released the mailbox (server shutdown)
    ServerShutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "client closed"),
            CloseReason::UnexpectedData => write!(f, "unexpected data from client"),
            CloseReason::ReadError(e) => write!(f, "read error: {}", e),
            CloseReason::ServerShutdown => write!(f, "server shutdown"),
        }
    }
}

/// Per-connection state
#[derive(Debug)]
pub struct ConnectionState {
    /// Unique connection ID (assigned by the listener)
    pub id: u64,

    /// Remote peer address, if the transport has one
    pub peer_addr: Option<SocketAddr>,

    /// Current phase
    pub phase: ConnectionPhase,

    /// Subscriber serving this connection (set on activation)
    pub subscriber: Option<SubscriberId>,

    /// When the connection was accepted
    pub connected_at: Instant,

    /// When the handshake completed and the subscriber was registered
    pub activated_at: Option<Instant>,

    /// When the connection closed
    pub closed_at: Option<Instant>,

    /// Delivery statistics
    pub stats: SessionStats,
}

impl ConnectionState {
    pub fn new(id: u64, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer_addr,
            phase: ConnectionPhase::Connecting,
            subscriber: None,
            connected_at: Instant::now(),
            activated_at: None,
            closed_at: None,
            stats: SessionStats::default(),
        }
    }

    /// Handshake complete and subscriber registered
    pub fn activate(&mut self, subscriber: SubscriberId) {
        if self.phase == ConnectionPhase::Connecting {
            self.phase = ConnectionPhase::Active;
            self.subscriber = Some(subscriber);
            self.activated_at = Some(Instant::now());
        }
    }

    /// Enter the terminal phase
    ///
    /// Returns `false` if the connection was already closed.
    pub fn close(&mut self) -> bool {
        if self.phase == ConnectionPhase::Closed {
            return false;
        }
        self.phase = ConnectionPhase::Closed;
        self.closed_at = Some(Instant::now());
        self.stats.duration = self.duration();
        true
    }

    /// Record a payload written to the transport
    pub fn on_delivered(&mut self, bytes: usize) {
        self.stats.payloads_sent += 1;
        self.stats.bytes_sent += bytes as u64;
    }

    /// Time since accept, frozen once closed
    pub fn duration(&self) -> Duration {
        match self.closed_at {
            Some(closed) => closed.duration_since(self.connected_at),
            None => self.connected_at.elapsed(),
        }
    }
}
