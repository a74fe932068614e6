//! Broadcast server, connection handling and transports

pub mod config;
pub mod connection;
pub mod listener;
pub mod transport;

pub use config::ServerConfig;
pub use connection::Connection;
pub use listener::BroadcastServer;
pub use transport::{ConnectionRequest, Transport, WsRequest, WsTransport};
