//! Statistics for connections and the broadcast server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::registry::BroadcastReport;

/// Connection-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Payloads written to the transport
    pub payloads_sent: u64,
    /// Total payload bytes written
    pub bytes_sent: u64,
    /// Connection duration
    pub duration: Duration,
}

impl SessionStats {
    /// Average delivery rate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }
}

/// Server-wide counters, updated concurrently by every connection task
#[derive(Debug)]
pub struct ServerMetrics {
    started_at: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
    handshake_failures: AtomicU64,
    write_failures: AtomicU64,
    broadcasts: AtomicU64,
    payloads_enqueued: AtomicU64,
    payloads_dropped: AtomicU64,
    payloads_sent: AtomicU64,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            payloads_enqueued: AtomicU64::new(0),
            payloads_dropped: AtomicU64::new(0),
            payloads_sent: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payload_sent(&self) {
        self.payloads_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, report: &BroadcastReport) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.payloads_enqueued
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.payloads_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            payloads_enqueued: self.payloads_enqueued.load(Ordering::Relaxed),
            payloads_dropped: self.payloads_dropped.load(Ordering::Relaxed),
            payloads_sent: self.payloads_sent.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// Server-wide statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Connections that completed the handshake
    pub total_connections: u64,
    /// Connections currently registered
    pub active_connections: u64,
    /// Connections refused by the connection limit
    pub rejected_connections: u64,
    /// Failed or timed-out handshakes
    pub handshake_failures: u64,
    /// Connections terminated by a failed or timed-out write
    pub write_failures: u64,
    /// Broadcast passes
    pub broadcasts: u64,
    /// Payloads accepted into mailboxes
    pub payloads_enqueued: u64,
    /// Payloads discarded by a drop policy
    pub payloads_dropped: u64,
    /// Payloads written to transports
    pub payloads_sent: u64,
    /// Uptime
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_default() {
        let stats = SessionStats::default();
        assert_eq!(stats.payloads_sent, 0);
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.bitrate(), 0);
    }

    #[test]
    fn test_session_stats_bitrate() {
        let stats = SessionStats {
            payloads_sent: 10,
            bytes_sent: 1_000_000,
            duration: Duration::from_secs(10),
        };

        // 1,000,000 bytes * 8 bits / 10 seconds
        assert_eq!(stats.bitrate(), 800_000);
    }

    #[test]
    fn test_connection_counters() {
        let metrics = ServerMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.handshake_failed();
        metrics.connection_rejected();

        let stats = metrics.snapshot();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.handshake_failures, 1);
        assert_eq!(stats.rejected_connections, 1);
    }

    #[test]
    fn test_record_broadcast() {
        let metrics = ServerMetrics::new();

        metrics.record_broadcast(&BroadcastReport {
            delivered: 3,
            dropped: 1,
            pruned: 0,
        });
        metrics.record_broadcast(&BroadcastReport {
            delivered: 2,
            dropped: 0,
            pruned: 1,
        });

        let stats = metrics.snapshot();
        assert_eq!(stats.broadcasts, 2);
        assert_eq!(stats.payloads_enqueued, 5);
        assert_eq!(stats.payloads_dropped, 1);
    }
}
