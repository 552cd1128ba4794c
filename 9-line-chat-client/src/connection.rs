//! Lifecycle of the single server connection.
//!
//! ```text
//! Disconnected -[connect]-> Connecting -[ok]-> Connected -[disconnect | error]-> Closing -> Disconnected
//!                           Connecting -[failure]-> Disconnected
//! ```
//!
//! [`ConnectionManager`] owns the live connection and serializes `connect` and
//! `disconnect` behind an async mutex. Replacing a connection tears the old
//! reader and writer down completely before the new socket is opened, so two
//! readers are never attached at the same time.
//!
//! Each connection carries a [`Link`]: a one-way "closed" flag shared by the
//! manager, the reader and the writer. Whoever flips it first reports the
//! disconnect, which is what makes `on_disconnect` fire exactly once.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    net::TcpStream,
    sync::{Mutex, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    address::Address,
    config::ClientConfig,
    error::ChatError,
    events::{ChatEvents, DisconnectReason, StatusEvent},
    reader::InboundReader,
    writer::{OutboundWriter, WriterTask},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

pub(crate) type ConnectionId = u64;

/// Shared liveness flag of one connection. Flips from open to closed once.
#[derive(Debug)]
pub(crate) struct Link {
    id: ConnectionId,
    closed: watch::Sender<bool>,
}

impl Link {
    pub(crate) fn new(id: ConnectionId) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self { id, closed })
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    /// Marks the link closed. Returns `true` only for the call that closed it.
    pub(crate) fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the link is closed.
    pub(crate) async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so this cannot fail while we are borrowed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// What the background tasks need in order to report on the connection.
pub(crate) struct SessionContext {
    events: Arc<dyn ChatEvents>,
    state: watch::Sender<ConnectionState>,
}

impl SessionContext {
    pub(crate) fn new(events: Arc<dyn ChatEvents>) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self { events, state })
    }

    pub(crate) fn events(&self) -> &dyn ChatEvents {
        self.events.as_ref()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = ?*current, to = ?next, "connection state changed");
            *current = next;
            true
        });
    }

    /// Called by the reader or writer when the transport goes away underneath
    /// them. A no-op if someone else already closed the link.
    pub(crate) fn connection_lost(&self, link: &Link, reason: DisconnectReason) {
        if !link.close() {
            return;
        }
        self.set_state(ConnectionState::Closing);
        if reason.is_error() {
            warn!(connection = link.id(), %reason, "connection lost");
            self.events.on_status(StatusEvent::Error(reason.to_string()));
        } else {
            info!(connection = link.id(), %reason, "connection closed");
        }
        self.report_disconnect(reason);
        self.set_state(ConnectionState::Disconnected);
    }

    pub(crate) fn report_disconnect(&self, reason: DisconnectReason) {
        self.events.on_status(StatusEvent::Disconnected(reason.clone()));
        self.events.on_disconnect(reason);
    }
}

/// Puts the state back to `Disconnected` if a `connect` future is dropped
/// while the socket is still being opened.
struct ConnectAttempt<'a> {
    context: &'a SessionContext,
    address: &'a Address,
    pending: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn new(context: &'a SessionContext, address: &'a Address) -> Self {
        Self {
            context,
            address,
            pending: true,
        }
    }

    fn finish(mut self) {
        self.pending = false;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        warn!(address = %self.address, "connect cancelled");
        self.context.set_state(ConnectionState::Disconnected);
        self.context.events().on_status(StatusEvent::Error(format!(
            "connect to {} was cancelled",
            self.address
        )));
    }
}

/// One live connection: the socket halves live inside the two tasks.
struct Connection {
    link: Arc<Link>,
    peer: SocketAddr,
    reader: InboundReader,
    writer: WriterTask,
}

pub struct ConnectionManager {
    config: ClientConfig,
    context: Arc<SessionContext>,
    active: Mutex<Option<Connection>>,
    // Current write route, readable by `send` without taking `active`.
    route: watch::Sender<Option<OutboundWriter>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig, events: Arc<dyn ChatEvents>) -> Self {
        let (route, _) = watch::channel(None);
        Self {
            config,
            context: SessionContext::new(events),
            active: Mutex::new(None),
            route,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.context.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.context.subscribe_state()
    }

    /// The writer of the current connection, if it is still accepting lines.
    pub fn writer(&self) -> Option<OutboundWriter> {
        self.route
            .borrow()
            .as_ref()
            .filter(|writer| writer.is_open())
            .cloned()
    }

    /// Opens a connection to `address`, first tearing down any existing one.
    pub async fn connect(&self, address: Address) -> Result<SocketAddr, ChatError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(
                connection = previous.link.id(),
                peer = %previous.peer,
                next = %address,
                "replacing active connection"
            );
            self.teardown(previous, DisconnectReason::Replaced).await;
        }

        self.context.set_state(ConnectionState::Connecting);
        self.context
            .events()
            .on_status(StatusEvent::Connecting(address.clone()));
        let attempt = ConnectAttempt::new(&self.context, &address);

        let (stream, peer) = match self.open(&address).await {
            Ok(opened) => opened,
            Err(err) => {
                warn!(%address, error = %err, "connect failed");
                attempt.finish();
                self.context.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
        };
        attempt.finish();

        let link = Link::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(connection = link.id(), %peer, "connected");
        self.context.set_state(ConnectionState::Connected);
        self.context.events().on_status(StatusEvent::Connected(peer));

        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = OutboundWriter::spawn(
            write_half,
            Arc::clone(&link),
            Arc::clone(&self.context),
            &self.config,
        );
        let reader = InboundReader::spawn(
            read_half,
            self.config.codec(),
            self.config.read_buffer_size,
            Arc::clone(&link),
            Arc::clone(&self.context),
        );

        self.route.send_replace(Some(writer));
        *active = Some(Connection {
            link,
            peer,
            reader,
            writer: writer_task,
        });

        Ok(peer)
    }

    /// Closes the current connection. Idempotent: returns `false` when there
    /// was no live connection to close.
    ///
    /// Returns only after the reader and writer have stopped, so no callback
    /// for this connection can fire afterwards.
    pub async fn disconnect(&self) -> bool {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(connection) => self.teardown(connection, DisconnectReason::Requested).await,
            None => false,
        }
    }

    async fn open(&self, address: &Address) -> Result<(TcpStream, SocketAddr), ChatError> {
        let connect = TcpStream::connect((address.host(), address.port()));
        let stream = match timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ChatError::Connect {
                    address: address.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(ChatError::Connect {
                    address: address.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no answer within {:?}", self.config.connect_timeout),
                    ),
                });
            }
        };

        if let Err(error) = stream.set_nodelay(true) {
            debug!(?error, "failed to disable nagle");
        }
        let peer = stream.peer_addr().map_err(|source| ChatError::Connect {
            address: address.clone(),
            source,
        })?;
        Ok((stream, peer))
    }

    /// Stops both tasks of `connection`. Reports `reason` unless the reader or
    /// writer already reported their own. Returns whether this call closed it.
    async fn teardown(&self, connection: Connection, reason: DisconnectReason) -> bool {
        let Connection {
            link,
            peer,
            reader,
            writer,
        } = connection;

        self.route.send_replace(None);
        let closed_here = link.close();
        if closed_here {
            self.context.set_state(ConnectionState::Closing);
        }

        reader.stop().await;
        writer.stop(self.config.shutdown_timeout).await;

        if closed_here {
            info!(connection = link.id(), %peer, %reason, "connection closed");
            self.context.report_disconnect(reason);
        }
        self.context.set_state(ConnectionState::Disconnected);
        closed_here
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_closes_exactly_once() {
        let link = Link::new(7);
        assert_eq!(link.id(), 7);
        assert!(!link.is_closed());
        assert!(link.close());
        assert!(!link.close());
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn closed_resolves_for_already_closed_link() {
        let link = Link::new(1);
        link.close();
        link.closed().await;
    }

    #[tokio::test]
    async fn closed_wakes_waiters() {
        let link = Link::new(1);
        let waiter = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.closed().await })
        };
        tokio::task::yield_now().await;
        link.close();
        waiter.await.expect("waiter task");
    }

    #[tokio::test]
    async fn connection_lost_reports_once() {
        let (events, mut rx) = crate::events::ChannelEvents::new();
        let context = SessionContext::new(Arc::new(events));
        context.set_state(ConnectionState::Connected);
        let link = Link::new(3);

        context.connection_lost(&link, DisconnectReason::PeerClosed);
        context.connection_lost(&link, DisconnectReason::Transport("late".into()));

        assert_eq!(context.state(), ConnectionState::Disconnected);
        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            received.push(event);
        }
        assert_eq!(
            received,
            vec![
                crate::events::ClientEvent::Status(StatusEvent::Disconnected(
                    DisconnectReason::PeerClosed
                )),
                crate::events::ClientEvent::Disconnect(DisconnectReason::PeerClosed),
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_no_op() {
        let (events, mut rx) = crate::events::ChannelEvents::new();
        let manager = ConnectionManager::new(ClientConfig::default(), Arc::new(events));
        assert!(!manager.disconnect().await);
        assert!(!manager.disconnect().await);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.writer().is_none());
        assert!(rx.try_recv().is_err());
    }
}
