//! Demo REP server.
//!
//! Speaks the same ZMTP framing as the client, as a REP peer: every
//! request gets exactly one reply from a handler closure. Each
//! connection is served on its own thread; all of them stop when the
//! server's [`ShutdownSignal`] fires.
//!
//! [`entity_handler`] answers `entity:*` with a JSON [`Entity`] and
//! everything else with `YES!`.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::entity::Entity;
use crate::error::{Error, Result, TransportError};
use crate::rpc::codec;
use crate::rpc::tcp::ZmtpStream;
use crate::rpc::transport::ShutdownSignal;

const IO_TICK: Duration = Duration::from_millis(20);

/// A bound, not yet serving, REP endpoint.
pub struct ReplyServer {
    listener: TcpListener,
    addr: SocketAddr,
    signal: ShutdownSignal,
}

impl ReplyServer {
    /// Bind `endpoint`. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        let addr = endpoint.resolve()?;
        let bind_err = |e: io::Error| Error::Transport(TransportError::Connect(e.kind()));
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let addr = listener.local_addr().map_err(bind_err)?;
        Ok(Self {
            listener,
            addr,
            signal: ShutdownSignal::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `tcp://` endpoint clients should connect to.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::tcp(self.addr.ip().to_string(), self.addr.port())
    }

    /// Serve until the shutdown signal fires.
    pub fn serve<F>(self, handler: F)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        info!("listening on {}", self.endpoint());

        while !self.signal.is_triggered() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("server: client {} connected", peer);
                    let handler = Arc::clone(&handler);
                    let signal = self.signal.clone();
                    connections.push(std::thread::spawn(move || {
                        serve_connection(stream, peer, handler.as_ref(), &signal);
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(IO_TICK);
                }
                Err(e) => {
                    warn!("server: accept failed: {}", e);
                    std::thread::sleep(IO_TICK);
                }
            }
            connections.retain(|c| !c.is_finished());
        }

        for connection in connections {
            let _ = connection.join();
        }
        info!("server on {} stopped", self.addr);
    }

    /// Serve on a background thread.
    pub fn spawn<F>(self, handler: F) -> ServerHandle
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        let signal = self.signal.clone();
        let endpoint = self.endpoint();
        let thread = std::thread::spawn(move || self.serve(handler));
        ServerHandle {
            signal,
            endpoint,
            thread: Some(thread),
        }
    }
}

fn serve_connection<F>(stream: TcpStream, peer: SocketAddr, handler: &F, signal: &ShutdownSignal)
where
    F: Fn(&[u8]) -> Vec<u8>,
{
    match answer_requests(stream, handler, signal) {
        Ok(never) => match never {},
        Err(TransportError::Disconnected | TransportError::Closed) => {
            debug!("server: client {} gone", peer);
        }
        Err(e) => warn!("server: client {}: {}", peer, e),
    }
}

/// Handshake, then one reply per request until the connection ends.
fn answer_requests<F>(
    stream: TcpStream,
    handler: &F,
    signal: &ShutdownSignal,
) -> core::result::Result<core::convert::Infallible, TransportError>
where
    F: Fn(&[u8]) -> Vec<u8>,
{
    stream
        .set_nonblocking(false)
        .map_err(|e| TransportError::Io(e.kind()))?;
    let mut conn = ZmtpStream::new(stream, IO_TICK)?;
    conn.handshake("REP", &["REQ", "DEALER"], None, signal)?;
    loop {
        let request = codec::open_envelope(conn.read_message(None, signal)?)?;
        let reply = handler(&request);
        conn.write_all(&codec::envelope(&reply))?;
    }
}

/// Running server; stops and joins on [`stop`](Self::stop) or drop.
pub struct ServerHandle {
    signal: ShutdownSignal,
    endpoint: Endpoint,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn stop(&mut self) {
        self.signal.trigger();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Demo handler: `entity:*` → JSON entity with a fresh id, anything else `YES!`.
pub fn entity_handler() -> impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static {
    let next_id = AtomicI64::new(1);
    move |request: &[u8]| match core::str::from_utf8(request) {
        Ok(s) if s.starts_with("entity:") => {
            let entity = Entity::new("test", next_id.fetch_add(1, Ordering::Relaxed));
            serde_json::to_vec(&entity).unwrap_or_default()
        }
        Ok(_) => b"YES!".to_vec(),
        Err(_) => {
            warn!("server: request is not valid UTF-8");
            Vec::new()
        }
    }
}
