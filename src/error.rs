//! Error types
//!
//! Every per-connection failure is returned as a value from the connection's
//! own task. Metric collection has its own error type so that sampler
//! failures never travel into the broadcast path.

use std::fmt;
use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket level I/O error
    Io(std::io::Error),
    /// WebSocket protocol or handshake error
    WebSocket(tungstenite::Error),
    /// Transport handshake did not complete in time
    HandshakeTimeout(Duration),
    /// A single payload write exceeded the write deadline
    WriteTimeout(Duration),
    /// Transport was already closed when a write was attempted
    TransportClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            Error::HandshakeTimeout(d) => {
                write!(f, "Handshake timed out after {}ms", d.as_millis())
            }
            Error::WriteTimeout(d) => write!(f, "Write timed out after {}ms", d.as_millis()),
            Error::TransportClosed => write!(f, "Transport closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Error::TransportClosed
            }
            tungstenite::Error::Io(io) => Error::Io(io),
            other => Error::WebSocket(other),
        }
    }
}

/// Metric collection errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricError {
    /// The host did not report the requested data
    Unavailable(&'static str),
    /// The collector failed for a section
    Collector {
        section: &'static str,
        message: String,
    },
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricError::Unavailable(what) => write!(f, "{} unavailable", what),
            MetricError::Collector { section, message } => {
                write!(f, "{} section failed: {}", section, message)
            }
        }
    }
}

impl std::error::Error for MetricError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_websocket_maps_to_transport_closed() {
        let err: Error = tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, Error::TransportClosed));

        let err: Error = tungstenite::Error::AlreadyClosed.into();
        assert!(matches!(err, Error::TransportClosed));
    }

    #[test]
    fn test_display() {
        let err = Error::WriteTimeout(Duration::from_secs(1));
        assert_eq!(err.to_string(), "Write timed out after 1000ms");

        let err = MetricError::Unavailable("root disk");
        assert_eq!(err.to_string(), "root disk unavailable");

        let err = MetricError::Collector {
            section: "system",
            message: "host reported no memory".into(),
        };
        assert_eq!(err.to_string(), "system section failed: host reported no memory");
    }
}
