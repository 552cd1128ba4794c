//! Line-oriented TCP chat client core.
//!
//! The core speaks newline-delimited UTF-8 text over a plain TCP stream and
//! leaves all rendering to whatever front end drives it. Each module owns one
//! piece of that:
//!
//! - [`codec`] splits inbound bytes into lines and frames outbound ones,
//!   enforcing a line-length cap.
//! - [`connection`] runs the connect/disconnect state machine and guarantees
//!   that replacing a connection fully stops the old one first.
//! - [`reader`] and [`writer`] are the per-connection background tasks: one
//!   decoding lines off the socket, one draining a FIFO queue onto it.
//! - [`client`] composes the above into [`ChatClient`], the `connect` /
//!   `send` / `disconnect` surface, reporting through [`events::ChatEvents`].
//! - [`protocol`] and [`relay`] implement the relay's `!message` / `ping`
//!   commands and a broadcast relay server speaking them.
//! - [`cli`] and [`terminal`] are the command-line front end.

pub mod address;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod protocol;
pub mod reader;
pub mod relay;
pub mod terminal;
pub mod writer;

pub use address::Address;
pub use client::ChatClient;
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use error::{ChatError, FramingError};
pub use events::{ChannelEvents, ChatEvents, ClientEvent, DisconnectReason, StatusEvent};
