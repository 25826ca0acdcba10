//! Scripted transport for integration tests.
//!
//! Records every send and receive so tests can assert on the full
//! exchange history. Clones share state, so a test keeps one clone to
//! inspect after handing the other to the client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use punchcard::{ShutdownSignal, Transport, TransportError};

// ── Call record ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send(String),
    Recv(String),
    Recover,
    Close,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    replies: HashMap<String, Vec<u8>>,
    counters: HashMap<String, i64>,
    pending: Option<String>,
    fail_next: Vec<String>,
    latency: Duration,
    hang: bool,
    outstanding: usize,
    max_outstanding: usize,
}

// ── MockTransport ─────────────────────────────────────────────

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
    in_call: Arc<AtomicUsize>,
    max_in_call: Arc<AtomicUsize>,
    signal: ShutdownSignal,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new(signal: ShutdownSignal) -> Self {
        Self {
            state: Arc::default(),
            in_call: Arc::default(),
            max_in_call: Arc::default(),
            signal,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Reply `body` to every request for `identifier` from now on.
    pub fn set_reply(&self, identifier: &str, body: impl Into<Vec<u8>>) {
        self.lock().replies.insert(identifier.into(), body.into());
    }

    /// Answer `identifier` with a JSON entity whose id counts up from 1
    /// with every exchange.
    pub fn count_up(&self, identifier: &str) {
        self.lock().counters.insert(identifier.into(), 0);
    }

    /// The next exchange for `identifier` times out.
    pub fn fail_next(&self, identifier: &str) {
        self.lock().fail_next.push(identifier.into());
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Every `recv` blocks until shutdown.
    pub fn hang(&self) {
        self.lock().hang = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Requests sent for `identifier`.
    pub fn sends_for(&self, identifier: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Send(id) if id == identifier))
            .count()
    }

    pub fn max_outstanding(&self) -> usize {
        self.lock().max_outstanding
    }

    /// Largest number of threads ever inside the transport at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_in_call.load(Ordering::SeqCst)
    }

    fn enter(&self) -> CallGuard<'_> {
        let now = self.in_call.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_call.fetch_max(now, Ordering::SeqCst);
        CallGuard(&self.in_call)
    }

    fn wait(&self, d: Duration) -> Result<(), TransportError> {
        let end = Instant::now() + d;
        while Instant::now() < end {
            if self.signal.is_triggered() {
                return Err(TransportError::Closed);
            }
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let _g = self.enter();
        let id = String::from_utf8_lossy(payload).into_owned();
        let mut s = self.lock();
        s.calls.push(Call::Send(id.clone()));
        s.pending = Some(id);
        s.outstanding += 1;
        s.max_outstanding = s.max_outstanding.max(s.outstanding);
        Ok(())
    }

    fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let _g = self.enter();
        let (latency, hang) = {
            let s = self.lock();
            (s.latency, s.hang)
        };
        if hang {
            loop {
                self.wait(Duration::from_millis(10))?;
            }
        }
        self.wait(latency)?;

        let mut s = self.lock();
        let id = s.pending.take().unwrap_or_default();
        s.outstanding -= 1;
        s.calls.push(Call::Recv(id.clone()));
        if let Some(pos) = s.fail_next.iter().position(|f| *f == id) {
            s.fail_next.remove(pos);
            return Err(TransportError::Timeout);
        }
        if let Some(n) = s.counters.get_mut(&id) {
            *n += 1;
            return Ok(format!(r#"{{"name":"{id}","id":{n}}}"#).into_bytes());
        }
        Ok(s.replies.get(&id).cloned().unwrap_or_else(|| b"YES!".to_vec()))
    }

    fn recover(&mut self) -> Result<(), TransportError> {
        let mut s = self.lock();
        s.calls.push(Call::Recover);
        s.pending = None;
        s.outstanding = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.lock().calls.push(Call::Close);
    }
}

/// A mock-backed client with a short poll interval.
pub fn client_with(interval_ms: u32) -> (punchcard::Client, MockTransport) {
    client_with_backpressure(interval_ms, punchcard::Backpressure::default())
}

pub fn client_with_backpressure(
    interval_ms: u32,
    backpressure: punchcard::Backpressure,
) -> (punchcard::Client, MockTransport) {
    let signal = ShutdownSignal::new();
    let mock = MockTransport::new(signal.clone());
    let config = punchcard::ClientConfig {
        poll_interval_ms: interval_ms,
        io_tick_ms: 5,
        backpressure,
        ..Default::default()
    };
    let client = punchcard::Client::start(mock.clone(), signal, &config).unwrap();
    (client, mock)
}
