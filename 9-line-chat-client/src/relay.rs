use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    select,
    sync::{Mutex, broadcast, watch},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{
    codec::{DEFAULT_MAX_LINE_LENGTH, LineCodec, LineEncoder, PartialLinePolicy},
    protocol::{self, RelayCommand},
};

type ClientId = u64;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub max_line_length: usize,
    /// Lines kept for slow clients before they start missing some.
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            broadcast_capacity: 128,
        }
    }
}

/// Line relay: every chat line one client sends is delivered to all clients,
/// the sender included.
pub struct Relay {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl Relay {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            state: Arc::new(RelayState::new(config)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for observing the relay after `run_until` has taken it.
    pub fn monitor(&self) -> RelayMonitor {
        RelayMonitor {
            state: Arc::clone(&self.state),
        }
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, state } = self;
        let (stop, stopped) = watch::channel(false);
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    let clients = state.client_count().await;
                    info!(clients, "relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state, &stopped, &mut sessions);
                }
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_end(finished);
                }
            }
        }

        // Sessions end with the relay.
        stop.send_replace(true);
        while let Some(finished) = sessions.join_next().await {
            log_session_end(finished);
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

#[derive(Clone)]
pub struct RelayMonitor {
    state: Arc<RelayState>,
}

impl RelayMonitor {
    pub async fn client_count(&self) -> usize {
        self.state.client_count().await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<RelayState>,
    stopped: &watch::Receiver<bool>,
    sessions: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state, stopped, sessions),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(
    stream: TcpStream,
    peer: SocketAddr,
    state: &Arc<RelayState>,
    stopped: &watch::Receiver<bool>,
    sessions: &mut JoinSet<()>,
) {
    let state = Arc::clone(state);
    let stopped = stopped.clone();
    // Subscribe before the handler runs so nothing broadcast after accept is missed.
    let inbox = state.subscribe();
    sessions.spawn(async move {
        if let Err(err) = handle_connection(stream, peer, inbox, stopped, state).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

fn log_session_end(result: Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        warn!(?error, "client session panicked");
    }
}

struct RelayState {
    config: RelayConfig,
    clients: Mutex<HashMap<ClientId, SocketAddr>>,
    broadcaster: broadcast::Sender<Arc<str>>,
    next_id: AtomicU64,
}

impl RelayState {
    fn new(config: RelayConfig) -> Self {
        let (broadcaster, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
            broadcaster,
            next_id: AtomicU64::new(1),
        }
    }

    async fn register_client(&self, peer: SocketAddr) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut clients = self.clients.lock().await;
        clients.insert(id, peer);
        id
    }

    async fn remove_client(&self, id: ClientId) -> Option<SocketAddr> {
        let mut clients = self.clients.lock().await;
        clients.remove(&id)
    }

    async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    fn broadcast(&self, line: &str) {
        if let Err(error) = self.broadcaster.send(Arc::from(line)) {
            debug!(?error, "no clients to relay to");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.broadcaster.subscribe()
    }

    fn codec(&self) -> LineCodec {
        LineCodec::new(self.config.max_line_length, PartialLinePolicy::Discard)
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    mut inbox: broadcast::Receiver<Arc<str>>,
    mut stopped: watch::Receiver<bool>,
    state: Arc<RelayState>,
) -> Result<()> {
    let client_id = state.register_client(peer).await;
    let clients = state.client_count().await;
    info!(%peer, clients, "client connected");

    let (mut reader, mut writer) = stream.into_split();
    let result =
        run_client_session(&state, &mut reader, &mut writer, &mut inbox, &mut stopped).await;

    if let Some(peer) = state.remove_client(client_id).await {
        info!(%peer, "client disconnected");
    }
    if let Err(error) = writer.shutdown().await {
        debug!(%peer, ?error, "failed to shut down client writer");
    }
    result
}

async fn run_client_session<R, W>(
    state: &RelayState,
    reader: &mut R,
    writer: &mut W,
    inbox: &mut broadcast::Receiver<Arc<str>>,
    stopped: &mut watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut codec = state.codec();
    let encoder = codec.encoder();
    let mut buffer = vec![0u8; 4096];

    loop {
        select! {
            read = reader.read(&mut buffer) => {
                let read = read?;
                if read == 0 {
                    return Ok(());
                }
                for line in codec.feed(&buffer[..read]) {
                    handle_client_line(state, &line?);
                }
            }
            relayed = inbox.recv() => {
                if !handle_broadcast_line(relayed, writer, &encoder).await? {
                    return Ok(());
                }
            }
            _ = relay_stopped(stopped) => {
                return Ok(());
            }
        }
    }
}

async fn relay_stopped(stopped: &mut watch::Receiver<bool>) {
    // An error means the relay itself is gone, which counts as stopped too.
    let _ = stopped.wait_for(|stopped| *stopped).await;
}

fn handle_client_line(state: &RelayState, line: &str) {
    match protocol::parse(line) {
        RelayCommand::Chat(text) => {
            if text.trim().is_empty() {
                return;
            }
            debug!(bytes = text.len(), "relaying chat line");
            state.broadcast(text);
        }
        RelayCommand::Ping => {}
        RelayCommand::Unknown(line) => {
            debug!(%line, "ignoring unknown command");
        }
    }
}

async fn handle_broadcast_line<W>(
    relayed: Result<Arc<str>, broadcast::error::RecvError>,
    writer: &mut W,
    encoder: &LineEncoder,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    match relayed {
        Ok(line) => {
            let frame = encoder.encode(&line)?;
            writer.write_all(&frame).await?;
            writer.flush().await?;
            Ok(true)
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "client fell behind; lines were dropped");
            Ok(true)
        }
        Err(broadcast::error::RecvError::Closed) => Ok(false),
    }
}
