//! Transport abstraction for any message-oriented request/reply channel.
//!
//! Concrete implementations:
//! - ZMTP REQ over TCP ([`TcpTransport`](super::tcp::TcpTransport))
//! - scripted fakes in the test suites
//!
//! The session and worker are generic over `Transport`, so adding a new
//! transport requires zero changes to the polling logic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TransportError;

/// Message-oriented transport channel.
///
/// Callers never interleave: every `send` is followed by exactly one
/// `recv` before the next `send`. [`ChannelSession`](super::session::ChannelSession)
/// enforces that ordering; implementations may assume it.
pub trait Transport: Send {
    /// Send one request payload.
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Block until the reply to the last request arrives.
    ///
    /// Implementations must return [`TransportError::Closed`] promptly
    /// once the [`ShutdownSignal`] they were built with fires.
    fn recv(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Re-establish the channel after a failed exchange left it
    /// desynchronised.
    fn recover(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }

    /// Release the channel. Called once.
    fn close(&mut self);
}

/// Shared shutdown flag.
///
/// Cloned into the transport so a blocked receive can notice shutdown
/// without anyone touching the transport itself.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn trigger(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
