//! The relay's tiny command language, layered on top of line framing.
//!
//! A line starting with `!` is a chat message whose remainder is broadcast to
//! every participant. The line `ping` keeps an idle connection alive. Anything
//! else is unknown and ignored by the relay.

pub const CHAT_PREFIX: char = '!';
pub const PING: &str = "ping";
/// `PING` as it goes on the wire.
pub const PING_FRAME: &[u8] = b"ping\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand<'a> {
    Chat(&'a str),
    Ping,
    Unknown(&'a str),
}

pub fn parse(line: &str) -> RelayCommand<'_> {
    if let Some(text) = line.strip_prefix(CHAT_PREFIX) {
        RelayCommand::Chat(text)
    } else if line == PING {
        RelayCommand::Ping
    } else {
        RelayCommand::Unknown(line)
    }
}

/// Wraps `text` as a chat command.
pub fn chat_line(text: &str) -> String {
    format!("{CHAT_PREFIX}{text}")
}
