//! ZMTP over TCP.
//!
//! [`ZmtpStream`] handles the greeting, the READY handshake and framed
//! reads/writes on one `TcpStream`. Both the client transport and the
//! demo [`ReplyServer`](crate::server::ReplyServer) use it.
//!
//! Reads use a short socket timeout (the I/O tick) and re-check the
//! shutdown flag and the reply deadline between ticks, so a blocked
//! receive never outlives shutdown by more than one tick.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use log::{debug, info};

use super::codec::{self, Frame, FrameDecoder, GREETING_SIZE, MessageAssembler};
use super::transport::{ShutdownSignal, Transport};
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::TransportError;

const READ_BUF_SIZE: usize = 4096;

fn io_error(e: &io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => TransportError::Disconnected,
        kind => TransportError::Io(kind),
    }
}

/// A TCP stream that has (or is about to) complete the ZMTP handshake.
pub struct ZmtpStream {
    stream: TcpStream,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl ZmtpStream {
    pub fn new(stream: TcpStream, io_tick: Duration) -> Result<Self, TransportError> {
        stream
            .set_read_timeout(Some(io_tick))
            .map_err(|e| io_error(&e))?;
        stream.set_nodelay(true).map_err(|e| io_error(&e))?;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
            read_buf: vec![0; READ_BUF_SIZE],
        })
    }

    /// Exchange greetings and READY commands.
    ///
    /// Announces `socket_type` and returns the peer's socket type, which
    /// must be one of `accept`.
    pub fn handshake(
        &mut self,
        socket_type: &str,
        accept: &[&str],
        deadline: Option<Instant>,
        signal: &ShutdownSignal,
    ) -> Result<String, TransportError> {
        self.write_all(&codec::greeting())?;
        let greeting = self.read_raw(GREETING_SIZE, deadline, signal)?;
        codec::check_greeting(&greeting)?;

        self.write_all(&codec::ready_command(socket_type))?;
        let frame = self.read_frame(deadline, signal)?;
        if !frame.is_command() {
            return Err(TransportError::Protocol("expected READY command"));
        }
        let peer = codec::parse_ready(&frame.body)?;
        if !accept.iter().any(|a| a.eq_ignore_ascii_case(&peer)) {
            return Err(TransportError::Protocol("incompatible peer socket type"));
        }
        debug!("ZMTP handshake done: {} <-> {}", socket_type, peer);
        Ok(peer)
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes).map_err(|e| io_error(&e))?;
        self.stream.flush().map_err(|e| io_error(&e))
    }

    /// Read one complete multipart message, skipping command frames.
    /// The parts together may not exceed [`codec::MAX_FRAME_SIZE`].
    pub fn read_message(
        &mut self,
        deadline: Option<Instant>,
        signal: &ShutdownSignal,
    ) -> Result<Vec<Vec<u8>>, TransportError> {
        let mut message = MessageAssembler::new();
        loop {
            let frame = self.read_frame(deadline, signal)?;
            if frame.is_command() {
                continue;
            }
            if let Some(parts) = message.push(frame)? {
                return Ok(parts);
            }
        }
    }

    /// Shut down both directions; unblocks any pending read.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn read_raw(
        &mut self,
        n: usize,
        deadline: Option<Instant>,
        signal: &ShutdownSignal,
    ) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(bytes) = self.decoder.take_raw(n) {
                return Ok(bytes);
            }
            self.fill(deadline, signal)?;
        }
    }

    fn read_frame(
        &mut self,
        deadline: Option<Instant>,
        signal: &ShutdownSignal,
    ) -> Result<Frame, TransportError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(frame);
            }
            self.fill(deadline, signal)?;
        }
    }

    /// Block (in I/O ticks) until at least one byte arrives.
    fn fill(
        &mut self,
        deadline: Option<Instant>,
        signal: &ShutdownSignal,
    ) -> Result<(), TransportError> {
        loop {
            if signal.is_triggered() {
                return Err(TransportError::Closed);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(TransportError::Timeout);
            }
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => {
                    self.decoder.feed(&self.read_buf[..n]);
                    return Ok(());
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(io_error(&e)),
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// TcpTransport
// ───────────────────────────────────────────────────────────────

/// REQ peer on a single TCP connection.
pub struct TcpTransport {
    addr: SocketAddr,
    conn: Option<ZmtpStream>,
    signal: ShutdownSignal,
    connect_timeout: Duration,
    reply_timeout: Duration,
    io_tick: Duration,
}

impl TcpTransport {
    /// Resolve `endpoint` once and complete the handshake.
    pub fn connect(
        endpoint: &Endpoint,
        config: &ClientConfig,
        signal: ShutdownSignal,
    ) -> crate::error::Result<Self> {
        let addr = endpoint.resolve()?;
        let mut transport = Self {
            addr,
            conn: None,
            signal,
            connect_timeout: Duration::from_millis(u64::from(config.connect_timeout_ms)),
            reply_timeout: Duration::from_millis(u64::from(config.reply_timeout_ms)),
            io_tick: Duration::from_millis(u64::from(config.io_tick_ms)),
        };
        transport.open()?;
        info!("connected to {} ({})", endpoint, addr);
        Ok(transport)
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let stream = TcpStream::connect_timeout(&self.addr, self.connect_timeout)
            .map_err(|e| TransportError::Connect(e.kind()))?;
        let mut conn = ZmtpStream::new(stream, self.io_tick)?;
        let deadline = Instant::now() + self.reply_timeout;
        conn.handshake("REQ", &["REP", "ROUTER"], Some(deadline), &self.signal)?;
        self.conn = Some(conn);
        Ok(())
    }

    fn conn(&mut self) -> Result<&mut ZmtpStream, TransportError> {
        self.conn.as_mut().ok_or(TransportError::Disconnected)
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let bytes = codec::envelope(payload);
        self.conn()?.write_all(&bytes)
    }

    fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let deadline = Some(Instant::now() + self.reply_timeout);
        let signal = self.signal.clone();
        let parts = self.conn()?.read_message(deadline, &signal)?;
        codec::open_envelope(parts)
    }

    fn recover(&mut self) -> Result<(), TransportError> {
        if let Some(old) = self.conn.take() {
            old.shutdown();
        }
        self.open()?;
        info!("reconnected to {}", self.addr);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.shutdown();
        }
    }
}
