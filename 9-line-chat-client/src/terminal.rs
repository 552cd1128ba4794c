use anyhow::Result;
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    select,
    sync::mpsc::UnboundedReceiver,
};
use tracing::warn;

use crate::{
    cli::ClientArgs,
    client::ChatClient,
    events::{ChannelEvents, ClientEvent, StatusEvent},
};

/// Terminal front end: stdin lines go out, received lines and status changes
/// are printed.
pub async fn run(args: ClientArgs) -> Result<()> {
    let (events, mut inbox) = ChannelEvents::new();
    let client = ChatClient::new(args.config(), events);

    if let Err(err) = client.connect(&args.server).await {
        drain_events(&mut inbox).await?;
        return Err(err.into());
    }

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    run_client_loop(&client, &args, &mut inbox, &mut input).await?;
    client.disconnect().await;

    Ok(())
}

async fn run_client_loop<R>(
    client: &ChatClient,
    args: &ClientArgs,
    inbox: &mut UnboundedReceiver<ClientEvent>,
    input: &mut Lines<R>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        // `next_line` keeps a partially typed line buffered when another
        // branch wins.
        select! {
            event = inbox.recv() => {
                let Some(event) = event else {
                    break;
                };
                render_event(event).await?;
            }
            line = input.next_line() => {
                if !handle_stdin_input(line, client, args).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_stdin_input(
    line: io::Result<Option<String>>,
    client: &ChatClient,
    args: &ClientArgs,
) -> Result<bool> {
    let Some(line) = line? else {
        return Ok(false);
    };

    let text = line.trim_end_matches('\r');
    if text.trim().is_empty() {
        return Ok(true);
    }

    match parse_input(text) {
        Input::Quit => {
            write_stdout("*** leaving chat").await?;
            return Ok(false);
        }
        Input::Connect(address) => {
            // Failures are already on their way as status events.
            let _ = client.connect(address).await;
        }
        Input::Disconnect => {
            if !client.disconnect().await {
                write_stdout("*** not connected").await?;
            }
        }
        Input::Ping => {
            let _ = client.ping().await;
        }
        Input::Message(text) if args.raw => {
            let _ = client.send(text).await;
        }
        Input::Message(text) => {
            let _ = client.send_chat(text).await;
        }
    }
    Ok(true)
}

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Connect(&'a str),
    Disconnect,
    Ping,
    Message(&'a str),
}

fn parse_input(text: &str) -> Input<'_> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("/quit") {
        return Input::Quit;
    }
    if trimmed.eq_ignore_ascii_case("/disconnect") {
        return Input::Disconnect;
    }
    if trimmed.eq_ignore_ascii_case("/ping") {
        return Input::Ping;
    }
    if let Some(address) = trimmed.strip_prefix("/connect ") {
        return Input::Connect(address.trim());
    }
    Input::Message(text)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn drain_events(inbox: &mut UnboundedReceiver<ClientEvent>) -> io::Result<()> {
    while let Ok(event) = inbox.try_recv() {
        render_event(event).await?;
    }
    Ok(())
}

async fn render_event(event: ClientEvent) -> io::Result<()> {
    match event {
        ClientEvent::Line(line) => write_stdout(&line).await,
        ClientEvent::Status(StatusEvent::Error(message)) => {
            write_stderr(&format!("!!! {message}")).await
        }
        ClientEvent::Status(status) => write_stdout(&format!("*** {status}")).await,
        // Already rendered through the matching status event.
        ClientEvent::Disconnect(_) => Ok(()),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
