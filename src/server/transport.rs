//! Transport abstraction
//!
//! A [`ConnectionRequest`] is an inbound connection that has not completed
//! its handshake yet. Completing the handshake yields a [`Transport`], which
//! the connection handler uses to push payloads and to watch for closure.
//!
//! The WebSocket implementation serves a single path and treats the stream
//! as send-only: any data message from the client closes the connection.

use std::borrow::Cow;
use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::Result;
use crate::session::CloseReason;

/// An accepted connection whose handshake has not run yet
pub trait ConnectionRequest: Send + 'static {
    /// Transport produced by a successful handshake
    type Transport: Transport + 'static;

    /// Remote address, if the underlying connection has one
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Run the transport handshake
    fn handshake(self) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// Live, send-only connection to a subscriber
pub trait Transport: Send {
    /// Write one payload
    ///
    /// The caller bounds this with the write deadline.
    fn send(&mut self, payload: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Resolve once the peer has gone away
    ///
    /// Must be cancel safe: the handler drops this future whenever a
    /// payload is ready and calls it again afterwards.
    fn closed(&mut self) -> impl Future<Output = CloseReason> + Send;

    /// Release the connection
    fn close(&mut self, reason: Option<&CloseReason>) -> impl Future<Output = ()> + Send;
}

/// Inbound TCP connection waiting for a WebSocket upgrade
pub struct WsRequest {
    stream: TcpStream,
    peer_addr: SocketAddr,
    path: String,
}

impl WsRequest {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, path: impl Into<String>) -> Self {
        Self {
            stream,
            peer_addr,
            path: path.into(),
        }
    }
}

impl ConnectionRequest for WsRequest {
    type Transport = WsTransport;

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }

    async fn handshake(self) -> Result<WsTransport> {
        let path = self.path;
        let check_path = move |req: &Request, resp: Response| {
            if req.uri().path() == path {
                Ok(resp)
            } else {
                let mut err = ErrorResponse::new(Some(format!(
                    "no stream at {}",
                    req.uri().path()
                )));
                *err.status_mut() = StatusCode::NOT_FOUND;
                Err(err)
            }
        };

        let ws = tokio_tungstenite::accept_hdr_async(self.stream, check_path).await?;
        let (sink, stream) = ws.split();

        Ok(WsTransport { sink, stream })
    }
}

/// WebSocket transport over TCP
pub struct WsTransport {
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    stream: SplitStream<WebSocketStream<TcpStream>>,
}

impl Transport for WsTransport {
    async fn send(&mut self, payload: Bytes) -> Result<()> {
        let message = match std::str::from_utf8(&payload) {
            Ok(text) => Message::Text(text.to_owned()),
            Err(_) => Message::Binary(payload.to_vec()),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn closed(&mut self) -> CloseReason {
        // Each `next()` is cancel safe, and skipped control frames carry no
        // state between iterations.
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Close(_))) | None => return CloseReason::ClientClosed,
                Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                    return CloseReason::UnexpectedData
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return CloseReason::ReadError(e.to_string()),
            }
        }
    }

    async fn close(&mut self, reason: Option<&CloseReason>) {
        if let Some(CloseReason::UnexpectedData) = reason {
            let frame = CloseFrame {
                code: CloseCode::Policy,
                reason: Cow::Borrowed("stream is send-only"),
            };
            if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
                tracing::trace!(error = %e, "Failed to send close frame");
            }
        }

        if let Err(e) = self.sink.close().await {
            tracing::trace!(error = %e, "WebSocket close failed");
        }
    }
}
