//! Strict request/reply session.
//!
//! Wraps one [`Transport`] and enforces the alternation a REQ socket
//! requires:
//!
//! ```text
//!            send ok                   recv ok
//! ReadyToSend ──────▶ AwaitingReply ──────────▶ ReadyToSend
//!      ▲                    │ send / recv error
//!      │ recover ok         ▼
//!      └──────────── Desynchronized
//!
//! any state ── close ──▶ Closed (terminal)
//! ```
//!
//! Out-of-sequence calls fail immediately; they never touch the
//! transport.

use log::{debug, info, warn};

use super::transport::{ShutdownSignal, Transport};
use crate::error::{Error, Result, TransportError};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No request outstanding.
    ReadyToSend,
    /// One request sent, its reply not yet received.
    AwaitingReply,
    /// An exchange failed half-way; the peer's view of the sequence is
    /// unknown until the transport is recovered.
    Desynchronized,
    /// Closed locally. Terminal.
    Closed,
}

/// Single owner of the channel. Not `Sync`: the worker thread holds it.
pub struct ChannelSession<T: Transport> {
    transport: T,
    state: SessionState,
    signal: ShutdownSignal,
    exchanges: u64,
}

impl<T: Transport> ChannelSession<T> {
    pub fn new(transport: T, signal: ShutdownSignal) -> Self {
        Self {
            transport,
            state: SessionState::ReadyToSend,
            signal,
            exchanges: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Completed request/reply exchanges.
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn check_open(&self) -> Result<()> {
        if self.state == SessionState::Closed || self.signal.is_triggered() {
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    /// Send one request. Only legal in `ReadyToSend`.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.check_open()?;
        match self.state {
            SessionState::ReadyToSend => {}
            SessionState::Desynchronized => {
                return Err(TransportError::Disconnected.into());
            }
            _ => return Err(TransportError::OutOfSequence.into()),
        }

        match self.transport.send(payload) {
            Ok(()) => {
                self.state = SessionState::AwaitingReply;
                Ok(())
            }
            Err(e) => {
                // A partial write leaves the peer mid-frame.
                self.state = SessionState::Desynchronized;
                Err(e.into())
            }
        }
    }

    /// Receive the reply to the last request. Only legal in `AwaitingReply`.
    pub fn recv(&mut self) -> Result<Vec<u8>> {
        self.check_open()?;
        if self.state != SessionState::AwaitingReply {
            return Err(TransportError::OutOfSequence.into());
        }

        match self.transport.recv() {
            Ok(reply) => {
                self.state = SessionState::ReadyToSend;
                self.exchanges += 1;
                Ok(reply)
            }
            Err(e) => {
                self.state = SessionState::Desynchronized;
                Err(e.into())
            }
        }
    }

    /// One full exchange.
    pub fn request_reply(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.send(payload)?;
        self.recv()
    }

    /// Try to bring a desynchronised session back to `ReadyToSend`.
    pub fn recover(&mut self) -> Result<()> {
        self.check_open()?;
        if self.state != SessionState::Desynchronized {
            return Ok(());
        }
        match self.transport.recover() {
            Ok(()) => {
                info!("session recovered after {} exchanges", self.exchanges);
                self.state = SessionState::ReadyToSend;
                Ok(())
            }
            Err(e) => {
                debug!("session recovery failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Close the transport. Only the first call has an effect.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state == SessionState::AwaitingReply {
            warn!("closing session with a reply outstanding");
        }
        self.transport.close();
        self.state = SessionState::Closed;
    }
}
