use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tracing::{debug, warn};

use crate::{
    codec::LineEncoder,
    config::ClientConfig,
    connection::{Link, SessionContext},
    error::ChatError,
    events::DisconnectReason,
    protocol::PING_FRAME,
};

/// Sending side of a connection's outbound queue.
///
/// Cheap to clone; every clone feeds the same FIFO queue, which a single
/// writer task drains onto the socket. Lines from concurrent `send` calls are
/// therefore written whole and in the order they were queued.
#[derive(Debug, Clone)]
pub struct OutboundWriter {
    queue: mpsc::Sender<Vec<u8>>,
    encoder: LineEncoder,
    link: Arc<Link>,
}

/// Handle on the writer task, held by the connection manager.
#[derive(Debug)]
pub(crate) struct WriterTask {
    task: JoinHandle<()>,
}

impl OutboundWriter {
    pub(crate) fn spawn<W>(
        sink: W,
        link: Arc<Link>,
        context: Arc<SessionContext>,
        config: &ClientConfig,
    ) -> (Self, WriterTask)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (queue, pending) = mpsc::channel(config.outbound_queue_capacity.max(1));
        let encoder = config.encoder();
        let keepalive = config.keepalive_interval;

        let task = {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                run(sink, pending, keepalive, link, context).await;
            })
        };

        (
            Self {
                queue,
                encoder,
                link,
            },
            WriterTask { task },
        )
    }

    /// Validates `text` and queues it for transmission.
    ///
    /// Framing problems are caught here, before anything is queued. Success
    /// means the line is queued behind every line sent before it; a later
    /// write failure is reported through `on_disconnect`.
    pub async fn send(&self, text: &str) -> Result<(), ChatError> {
        let frame = self.encoder.encode(text)?;
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }
        self.queue
            .send(frame)
            .await
            .map_err(|_| ChatError::NotConnected)
    }

    pub fn is_open(&self) -> bool {
        !self.link.is_closed() && !self.queue.is_closed()
    }
}

impl WriterTask {
    /// Waits for the writer to notice the closed link and shut its half of
    /// the socket down. Aborts it if that takes longer than `grace`.
    pub(crate) async fn stop(mut self, grace: Duration) {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!(?grace, "outbound writer did not stop in time; aborting");
            self.task.abort();
            let _ = (&mut self.task).await;
        }
    }
}

impl Drop for WriterTask {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<W>(
    mut sink: W,
    mut pending: mpsc::Receiver<Vec<u8>>,
    keepalive: Option<Duration>,
    link: Arc<Link>,
    context: Arc<SessionContext>,
) where
    W: AsyncWrite + Unpin,
{
    if let Err(err) = write_lines(&mut sink, &mut pending, keepalive, &link).await {
        context.connection_lost(&link, DisconnectReason::Transport(err.to_string()));
    }
    // No more sends once we are gone.
    pending.close();

    if let Err(error) = sink.shutdown().await {
        debug!(connection = link.id(), ?error, "failed to shut down writer cleanly");
    }
}

async fn write_lines<W>(
    sink: &mut W,
    pending: &mut mpsc::Receiver<Vec<u8>>,
    keepalive: Option<Duration>,
    link: &Link,
) -> Result<(), ChatError>
where
    W: AsyncWrite + Unpin,
{
    let mut keepalive = keepalive.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        select! {
            biased;
            _ = link.closed() => {
                drain(sink, pending, link).await;
                return Ok(());
            }
            frame = pending.recv() => {
                let Some(frame) = frame else {
                    return Ok(());
                };
                write_frame(sink, &frame).await?;
                if let Some(ticker) = keepalive.as_mut() {
                    ticker.reset();
                }
            }
            _ = next_tick(&mut keepalive) => {
                debug!(connection = link.id(), "sending keepalive");
                // A protocol frame, not a user line: the line cap does not apply.
                write_frame(sink, PING_FRAME).await?;
            }
        }
    }
}

/// Writes out lines queued before the link closed. Best effort: the peer may
/// already be gone, and the manager bounds how long this may take.
async fn drain<W>(sink: &mut W, pending: &mut mpsc::Receiver<Vec<u8>>, link: &Link)
where
    W: AsyncWrite + Unpin,
{
    while let Ok(frame) = pending.try_recv() {
        if let Err(error) = write_frame(sink, &frame).await {
            debug!(connection = link.id(), %error, "dropping queued lines after close");
            return;
        }
    }
}

async fn write_frame<W>(sink: &mut W, frame: &[u8]) -> Result<(), ChatError>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(frame).await?;
    sink.flush().await?;
    Ok(())
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
