use std::{net::SocketAddr, sync::Arc};

use tokio::sync::watch;
use tracing::warn;

use crate::{
    address::Address,
    config::ClientConfig,
    connection::{ConnectionManager, ConnectionState},
    error::ChatError,
    events::{ChatEvents, StatusEvent},
    protocol,
};

/// The chat client core a front end drives.
///
/// `connect`, `send` and `disconnect` may be called from any task; results
/// come back as return values and everything else (status changes, received
/// lines, disconnects) through the [`ChatEvents`] given at construction.
/// Every error a method returns is also reported as
/// [`StatusEvent::Error`], so a front end that only renders events still
/// sees it.
pub struct ChatClient {
    config: ClientConfig,
    events: Arc<dyn ChatEvents>,
    manager: ConnectionManager,
}

impl ChatClient {
    pub fn new<E>(config: ClientConfig, events: E) -> Self
    where
        E: ChatEvents,
    {
        Self::with_shared_events(config, Arc::new(events))
    }

    pub fn with_shared_events(config: ClientConfig, events: Arc<dyn ChatEvents>) -> Self {
        let manager = ConnectionManager::new(config.clone(), Arc::clone(&events));
        Self {
            config,
            events,
            manager,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe_state()
    }

    /// Parses `address` (`host:port`, or just `host` for the default port)
    /// and connects to it, replacing any live connection.
    pub async fn connect(&self, address: &str) -> Result<SocketAddr, ChatError> {
        let address = Address::parse_with_default_port(address, self.config.default_port)
            .map_err(|err| self.report(err))?;
        self.connect_to(address).await
    }

    pub async fn connect_to(&self, address: Address) -> Result<SocketAddr, ChatError> {
        self.manager
            .connect(address)
            .await
            .map_err(|err| self.report(err))
    }

    /// Closes the live connection, if any. Returns whether there was one.
    pub async fn disconnect(&self) -> bool {
        self.manager.disconnect().await
    }

    /// Sends `text` verbatim as one line.
    pub async fn send(&self, text: &str) -> Result<(), ChatError> {
        let Some(writer) = self.manager.writer() else {
            return Err(self.report(ChatError::NotConnected));
        };
        writer.send(text).await.map_err(|err| self.report(err))
    }

    /// Sends `text` as a relay chat message.
    pub async fn send_chat(&self, text: &str) -> Result<(), ChatError> {
        self.send(&protocol::chat_line(text)).await
    }

    pub async fn ping(&self) -> Result<(), ChatError> {
        self.send(protocol::PING).await
    }

    fn report(&self, err: ChatError) -> ChatError {
        warn!(error = %err, "chat operation failed");
        self.events.on_status(StatusEvent::Error(err.to_string()));
        err
    }
}
