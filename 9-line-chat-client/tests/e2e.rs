use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn terminal_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("line-chat-client");

    let (mut relay_child, mut relay_stdout) = spawn_relay(&binary).await?;
    let addr = read_relay_addr(&mut relay_stdout).await?;

    // Drain relay logs in the background so the pipe never fills.
    let relay_log_task = tokio::spawn(async move {
        drain_stdout(relay_stdout).await;
    });

    // Each client waits for its own echo, which proves the relay has
    // subscribed it before anyone else talks.
    let mut alice = spawn_client(&binary, &addr).await?;
    alice.send_line("alice ready").await?;
    assert_eq!(alice.read_line("alice ready echo").await?, "alice ready");

    let mut bob = spawn_client(&binary, &addr).await?;
    bob.send_line("bob ready").await?;
    assert_eq!(bob.read_line("bob ready echo").await?, "bob ready");
    assert_eq!(alice.read_line("alice sees bob").await?, "bob ready");

    alice.send_line("Hello from Alice").await?;
    assert_eq!(bob.read_line("bob hears alice").await?, "Hello from Alice");
    assert_eq!(alice.read_line("alice echo").await?, "Hello from Alice");

    alice.send_line("/quit").await?;
    assert_eq!(alice.read_line("alice quit").await?, "*** leaving chat");
    ensure_success(&mut alice.child, "alice client").await?;

    bob.send_line("/disconnect").await?;
    assert_eq!(
        bob.read_line("bob disconnect notice").await?,
        "*** disconnected: disconnected by user"
    );
    bob.send_line("/disconnect").await?;
    assert_eq!(
        bob.read_line("bob second disconnect").await?,
        "*** not connected"
    );
    bob.send_line("/quit").await?;
    assert_eq!(bob.read_line("bob quit").await?, "*** leaving chat");
    ensure_success(&mut bob.child, "bob client").await?;

    // The relay stays up after clients leave; terminate it manually.
    let _ = relay_child.kill().await;
    let _ = relay_child.wait().await;
    let _ = relay_log_task.await;

    Ok(())
}

#[tokio::test]
async fn unreachable_server_fails_the_client() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("line-chat-client");

    // Grab a free port, then release it so nothing listens there.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    drop(listener);

    let mut child = client_command(&binary, &addr)
        .stdin(Stdio::null())
        .spawn()
        .context("failed to spawn client")?;
    let stdout = child.stdout.take().context("client stdout missing")?;
    let mut stdout = BufReader::new(stdout);

    let connecting = read_line_expect(&mut stdout, "connecting banner").await?;
    assert_eq!(connecting, format!("*** connecting to {addr}"));

    let status = timeout(READ_TIMEOUT, child.wait()).await??;
    assert!(!status.success(), "client should fail when nobody listens");
    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self, description: &str) -> Result<String> {
        read_line_expect(&mut self.stdout, description).await
    }
}

async fn spawn_relay(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("relay")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .env("RUST_LOG_STYLE", "never")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn relay")?;
    let stdout = child
        .stdout
        .take()
        .context("relay stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_relay_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("relay did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected relay banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("relay banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

fn client_command(binary: &Path, addr: &str) -> Command {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--server")
        .arg(addr)
        .arg("--connect-timeout-ms")
        .arg("1000")
        .env("RUST_LOG", "error")
        .env("RUST_LOG_STYLE", "never")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd
}

async fn spawn_client(binary: &Path, addr: &str) -> Result<ClientProcess> {
    let mut child = client_command(binary, addr)
        .stdin(Stdio::piped())
        .spawn()
        .context("failed to spawn client")?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    let connecting = process.read_line("connecting banner").await?;
    if connecting != format!("*** connecting to {addr}") {
        return Err(anyhow!("unexpected connecting banner '{connecting}'"));
    }
    let connected = process.read_line("connected banner").await?;
    if connected != format!("*** connected to {addr}") {
        return Err(anyhow!("unexpected connected banner '{connected}'"));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let bytes = match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(result) => result?,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while let Ok(bytes) = reader.read_line(&mut buffer).await {
        if bytes == 0 {
            break;
        }
        buffer.clear();
    }
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
