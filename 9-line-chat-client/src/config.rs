use std::time::Duration;

use crate::{
    address::DEFAULT_PORT,
    codec::{DEFAULT_MAX_LINE_LENGTH, LineCodec, LineEncoder, PartialLinePolicy},
};

/// Tunables for [`ChatClient`](crate::client::ChatClient).
///
/// The line terminator is always `\n` and the encoding always UTF-8; only the
/// limits and timing around them are configurable.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Upper bound for the writer to flush and shut down on disconnect.
    pub shutdown_timeout: Duration,
    /// Longest line accepted or sent, excluding the terminator.
    pub max_line_length: usize,
    pub partial_line_policy: PartialLinePolicy,
    /// Lines `send` may queue ahead of the writer before it waits.
    pub outbound_queue_capacity: usize,
    pub read_buffer_size: usize,
    /// Send `ping` after this much outbound silence. `None` disables it.
    pub keepalive_interval: Option<Duration>,
    /// Port used when an address string does not name one.
    pub default_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(2),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            partial_line_policy: PartialLinePolicy::default(),
            outbound_queue_capacity: 64,
            read_buffer_size: 4096,
            keepalive_interval: None,
            default_port: DEFAULT_PORT,
        }
    }
}

impl ClientConfig {
    pub(crate) fn codec(&self) -> LineCodec {
        LineCodec::new(self.max_line_length, self.partial_line_policy)
    }

    pub(crate) fn encoder(&self) -> LineEncoder {
        LineEncoder::new(self.max_line_length)
    }
}
