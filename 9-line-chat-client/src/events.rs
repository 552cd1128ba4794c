//! The event surface a front end subscribes to.
//!
//! The core never renders anything. It reports status changes, decoded lines
//! and disconnects through [`ChatEvents`], which any front end (terminal, web,
//! desktop) can implement. Callbacks run on the connection's background tasks
//! and must return quickly; [`ChannelEvents`] queues them for consumers that
//! cannot promise that.

use std::{fmt, net::SocketAddr};

use tokio::sync::mpsc;
use tracing::debug;

use crate::address::Address;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Connecting(Address),
    Connected(SocketAddr),
    Disconnected(DisconnectReason),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect` was called.
    Requested,
    /// A new `connect` superseded this connection.
    Replaced,
    /// The peer closed its side of the stream.
    PeerClosed,
    /// The peer broke the line framing.
    Framing(String),
    /// Read or write failure.
    Transport(String),
}

impl DisconnectReason {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            DisconnectReason::Framing(_) | DisconnectReason::Transport(_)
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "disconnected by user"),
            DisconnectReason::Replaced => write!(f, "replaced by a new connection"),
            DisconnectReason::PeerClosed => write!(f, "server closed the connection"),
            DisconnectReason::Framing(message) => write!(f, "protocol violation: {message}"),
            DisconnectReason::Transport(message) => write!(f, "transport failure: {message}"),
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::Connecting(address) => write!(f, "connecting to {address}"),
            StatusEvent::Connected(peer) => write!(f, "connected to {peer}"),
            StatusEvent::Disconnected(reason) => write!(f, "disconnected: {reason}"),
            StatusEvent::Error(message) => write!(f, "error: {message}"),
        }
    }
}

pub trait ChatEvents: Send + Sync + 'static {
    fn on_status(&self, _event: StatusEvent) {}

    fn on_line(&self, _line: String) {}

    fn on_disconnect(&self, _reason: DisconnectReason) {}
}

/// One callback, as delivered through [`ChannelEvents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Status(StatusEvent),
    Line(String),
    Disconnect(DisconnectReason),
}

/// Forwards every callback into an unbounded channel so the read loop never
/// waits on the consumer.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelEvents {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ClientEvent) {
        if let Err(error) = self.tx.send(event) {
            debug!(event = ?error.0, "event receiver dropped");
        }
    }
}

impl ChatEvents for ChannelEvents {
    fn on_status(&self, event: StatusEvent) {
        self.forward(ClientEvent::Status(event));
    }

    fn on_line(&self, line: String) {
        self.forward(ClientEvent::Line(line));
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        self.forward(ClientEvent::Disconnect(reason));
    }
}
