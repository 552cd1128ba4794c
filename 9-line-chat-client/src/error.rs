use std::io;

use thiserror::Error;

use crate::address::Address;

/// Everything the client core can fail with. Raw transport errors never leave
/// the core; they are folded into one of these kinds at the component boundary.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The host/port string was rejected before any I/O took place.
    #[error("invalid address '{input}': {reason}")]
    InvalidAddress { input: String, reason: &'static str },

    /// The transport-level connect failed or timed out. Retrying is up to the caller.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: Address,
        #[source]
        source: io::Error,
    },

    /// A line violated the framing rules; the connection it came from is dropped.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Read or write failure in the middle of a session.
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    /// The operation needs a live connection and there is none.
    #[error("not connected")]
    NotConnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("line contains an embedded terminator")]
    EmbeddedTerminator,

    #[error("line exceeds the maximum length of {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

impl ChatError {
    pub(crate) fn invalid_address(input: &str, reason: &'static str) -> Self {
        ChatError::InvalidAddress {
            input: input.to_string(),
            reason,
        }
    }
}
