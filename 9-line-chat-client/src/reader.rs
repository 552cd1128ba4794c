use std::sync::Arc;

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    select,
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    codec::LineCodec,
    connection::{Link, SessionContext},
    error::ChatError,
    events::DisconnectReason,
};

/// Background task pulling bytes off one connection and handing decoded lines
/// to `on_line`, in wire order.
///
/// Spawned exactly once per connection. It ends on EOF, on a read or framing
/// error, or when the link is closed by someone else; only in the first two
/// cases does it report the disconnect itself.
#[derive(Debug)]
pub struct InboundReader {
    task: JoinHandle<()>,
}

impl InboundReader {
    pub(crate) fn spawn<R>(
        source: R,
        codec: LineCodec,
        buffer_size: usize,
        link: Arc<Link>,
        context: Arc<SessionContext>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let task = tokio::spawn(async move {
            run(source, codec, buffer_size, link, context).await;
        });
        Self { task }
    }

    /// Aborts the task, which drops the read half and with it our side of the
    /// socket, then waits until it is really gone.
    pub(crate) async fn stop(mut self) {
        self.task.abort();
        if let Err(err) = (&mut self.task).await {
            if err.is_panic() {
                warn!(error = ?err, "inbound reader panicked");
            }
        }
    }
}

impl Drop for InboundReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<R>(
    mut source: R,
    mut codec: LineCodec,
    buffer_size: usize,
    link: Arc<Link>,
    context: Arc<SessionContext>,
) where
    R: AsyncRead + Unpin,
{
    let outcome = read_lines(&mut source, &mut codec, buffer_size, &link, &context).await;
    let reason = match outcome {
        Ok(ReadOutcome::PeerClosed) => DisconnectReason::PeerClosed,
        Ok(ReadOutcome::LinkClosed) => {
            debug!(connection = link.id(), "reader stopped after link closed");
            return;
        }
        Err(ChatError::Framing(err)) => DisconnectReason::Framing(err.to_string()),
        Err(err) => DisconnectReason::Transport(err.to_string()),
    };
    context.connection_lost(&link, reason);
}

enum ReadOutcome {
    PeerClosed,
    LinkClosed,
}

async fn read_lines<R>(
    source: &mut R,
    codec: &mut LineCodec,
    buffer_size: usize,
    link: &Link,
    context: &SessionContext,
) -> Result<ReadOutcome, ChatError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];

    loop {
        let read = select! {
            read = source.read(&mut buffer) => read?,
            _ = link.closed() => return Ok(ReadOutcome::LinkClosed),
        };

        if read == 0 {
            if let Some(line) = codec.finish()? {
                context.events().on_line(line);
            }
            return Ok(ReadOutcome::PeerClosed);
        }

        for line in codec.feed(&buffer[..read]) {
            let line = line?;
            // Nothing may reach the consumer once the connection is closed.
            if link.is_closed() {
                return Ok(ReadOutcome::LinkClosed);
            }
            context.events().on_line(line);
        }
    }
}
