//! Unified error types for the punchcard client.
//!
//! A single `Error` enum that every subsystem converts into, so callers of
//! [`Client::query`](crate::client::Client::query) can tell "the server
//! answered badly" ([`Error::Decode`]) from "the server could not be
//! reached" ([`Error::Transport`]) and "the client is shut down"
//! ([`Error::ChannelClosed`]).

use core::fmt;
use std::io;

// ---------------------------------------------------------------------------
// Top-level client error
// ---------------------------------------------------------------------------

/// Every fallible client operation funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The channel failed below the payload level.
    Transport(TransportError),
    /// A reply arrived but does not match the requested type.
    Decode(DecodeError),
    /// The client was shut down; no further queries may be issued.
    ChannelClosed,
    /// Configuration is invalid or could not be loaded.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::ChannelClosed => write!(f, "channel closed"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Channel-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint could not be reached.
    Connect(io::ErrorKind),
    /// Socket read or write failed on an established connection.
    Io(io::ErrorKind),
    /// The peer violated the wire protocol.
    Protocol(&'static str),
    /// No reply arrived before the reply deadline.
    Timeout,
    /// The peer closed the connection.
    Disconnected,
    /// A send was attempted while awaiting a reply, or a receive while
    /// ready to send.
    OutOfSequence,
    /// The transport cannot perform the requested operation.
    Unsupported,
    /// The channel was closed locally.
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(kind) => write!(f, "connect failed ({kind})"),
            Self::Io(kind) => write!(f, "socket I/O failed ({kind})"),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
            Self::Timeout => write!(f, "timed out waiting for reply"),
            Self::Disconnected => write!(f, "peer disconnected"),
            Self::OutOfSequence => write!(f, "request/reply out of sequence"),
            Self::Unsupported => write!(f, "operation not supported by transport"),
            Self::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => Self::ChannelClosed,
            other => Self::Transport(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Decode errors
// ---------------------------------------------------------------------------

/// A reply that does not match the schema expected at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DecodeError {}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Client-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
