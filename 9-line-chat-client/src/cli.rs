use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{
    codec::{DEFAULT_MAX_LINE_LENGTH, PartialLinePolicy},
    config::ClientConfig,
    relay::RelayConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a line relay that broadcasts chat lines to every connected client.
    Relay(RelayArgs),
    /// Connect to a server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:10001")]
    pub listen: SocketAddr,

    /// Longest line a client may send before it is disconnected.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    pub max_line_length: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Server to connect to, as `host:port` or just `host`.
    #[arg(long, default_value = "127.0.0.1:10001")]
    pub server: String,

    /// Give up connecting after this many milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Longest line sent or accepted.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    pub max_line_length: usize,

    /// Send a keepalive `ping` after this many idle seconds.
    #[arg(long)]
    pub keepalive_secs: Option<u64>,

    /// Print an unterminated last line when the server hangs up instead of dropping it.
    #[arg(long)]
    pub flush_partial: bool,

    /// Send input lines verbatim instead of as relay chat messages.
    #[arg(long)]
    pub raw: bool,
}

impl ClientArgs {
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_line_length: self.max_line_length,
            partial_line_policy: if self.flush_partial {
                PartialLinePolicy::Flush
            } else {
                PartialLinePolicy::Discard
            },
            keepalive_interval: self.keepalive_secs.map(Duration::from_secs),
            ..ClientConfig::default()
        }
    }
}

impl RelayArgs {
    pub fn config(&self) -> RelayConfig {
        RelayConfig {
            max_line_length: self.max_line_length,
            ..RelayConfig::default()
        }
    }
}
