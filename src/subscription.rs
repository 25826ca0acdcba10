//! Per-subscription delivery.
//!
//! Each subscription owns a mailbox. The poll loop pushes and returns
//! immediately; the subscriber drains the mailbox from whatever thread it
//! likes. What happens when a subscriber falls behind is the
//! [`Backpressure`] policy from the client config: by default the mailbox
//! grows and nothing is lost; with [`Backpressure::DropOldest`] it holds
//! `depth` values and evicts the oldest, logging the evictions.
//!
//! ```text
//!  worker ──push──▶ [v3 v4 v5 …] ──recv()──▶ consumer thread
//!                   unbounded | drop-oldest
//! ```
//!
//! [`Dispatcher`] covers consumers that own an event loop (a UI thread):
//! deliveries are wrapped in a [`Job`] and queued onto that loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::decode::Decoder;
use crate::error::DecodeError;
use crate::registry::{Sink, SubscriptionHandle};

/// After the first eviction, one warning per this many.
const DROP_LOG_EVERY: u64 = 64;

/// What a subscription mailbox does when its consumer falls behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Backpressure {
    /// Queue every value. Lossless; memory grows with the backlog.
    #[default]
    Unbounded,
    /// Keep at most `depth` values, evicting the oldest.
    DropOldest { depth: usize },
}

impl Backpressure {
    fn capacity(self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::DropOldest { depth } => Some(depth.max(1)),
        }
    }
}

// ── Mailbox ──────────────────────────────────────────────────

/// First drop, then every `DROP_LOG_EVERY`th.
fn warn_on_drop(total: u64) -> bool {
    total == 1 || total % DROP_LOG_EVERY == 0
}

pub(crate) struct Mailbox<T> {
    identifier: Arc<str>,
    queue: Mutex<VecDeque<T>>,
    capacity: Option<usize>,
    ready: Signal<CriticalSectionRawMutex, ()>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> Mailbox<T> {
    pub(crate) fn new(identifier: &str, policy: Backpressure) -> Self {
        Self {
            identifier: Arc::from(identifier),
            queue: Mutex::new(VecDeque::new()),
            capacity: policy.capacity(),
            ready: Signal::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push_value(&self, value: T) {
        if self.is_closed() {
            return;
        }
        let evicted = {
            let mut queue = self.lock();
            let evicted = match self.capacity {
                Some(cap) if queue.len() >= cap => queue.pop_front().is_some(),
                _ => false,
            };
            queue.push_back(value);
            evicted
        };
        if evicted {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if warn_on_drop(total) {
                warn!(
                    "subscribe[{}]: consumer behind, {} value(s) dropped so far",
                    self.identifier, total
                );
            }
        }
        self.ready.signal(());
    }

    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.ready.signal(());
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Next value, waiting for one; `None` once closed and empty.
    async fn next(&self) -> Option<T> {
        loop {
            if let Some(value) = self.pop() {
                return Some(value);
            }
            if self.is_closed() {
                return None;
            }
            self.ready.wait().await;
        }
    }
}

/// Decodes with the subscriber's own decoder, then queues.
pub(crate) struct MailboxSink<T, D> {
    mailbox: Arc<Mailbox<T>>,
    decoder: D,
}

impl<T, D> MailboxSink<T, D> {
    pub(crate) fn new(mailbox: Arc<Mailbox<T>>, decoder: D) -> Self {
        Self { mailbox, decoder }
    }
}

impl<T: Send, D: Decoder<T>> Sink for MailboxSink<T, D> {
    fn deliver(&self, raw: &[u8]) -> Result<(), DecodeError> {
        if self.mailbox.is_closed() {
            return Ok(());
        }
        let value = self.decoder.decode(raw)?;
        self.mailbox.push_value(value);
        Ok(())
    }

    fn close(&self) {
        self.mailbox.close();
    }
}

// ── Subscription ─────────────────────────────────────────────

/// Whoever can end a subscription on its behalf (the client).
pub(crate) trait Cancel: Send + Sync {
    fn cancel(&self, handle: &SubscriptionHandle) -> bool;
}

/// A live stream of decoded values for one identifier.
///
/// Dropping it unsubscribes.
pub struct Subscription<T> {
    handle: SubscriptionHandle,
    mailbox: Arc<Mailbox<T>>,
    owner: Weak<dyn Cancel>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        handle: SubscriptionHandle,
        mailbox: Arc<Mailbox<T>>,
        owner: Weak<dyn Cancel>,
    ) -> Self {
        Self {
            handle,
            mailbox,
            owner,
        }
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    pub fn identifier(&self) -> &str {
        self.handle.identifier()
    }

    /// Block until the next value. `None` once the subscription has been
    /// cancelled or the client shut down and every queued value was taken.
    pub fn recv(&self) -> Option<T> {
        future::block_on(self.mailbox.next())
    }

    /// Like [`recv`](Self::recv), giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        future::block_on(future::or(self.mailbox.next(), async {
            async_io_mini::Timer::after(timeout).await;
            None
        }))
    }

    /// Take a queued value without blocking.
    pub fn try_recv(&self) -> Option<T> {
        self.mailbox.pop()
    }

    /// Blocking iterator over values until the subscription ends.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        core::iter::from_fn(|| self.recv())
    }

    /// Values evicted under [`Backpressure::DropOldest`]. Always zero
    /// for unbounded mailboxes.
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped.load(Ordering::Relaxed)
    }

    /// Whether the subscription has been invalidated (values may remain queued).
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Unsubscribe now. Same as dropping.
    pub fn cancel(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.cancel(&self.handle);
        }
        self.mailbox.close();
    }
}

// ── Dispatch onto consumer-owned threads ─────────────────────

/// One delivery, ready to run on the consumer's thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Routes deliveries onto a consumer-chosen execution context.
///
/// `dispatch` must queue and return; it runs on the poll worker.
pub trait Dispatcher: Send + Sync + 'static {
    /// Returns `false` if the context is gone.
    fn dispatch(&self, job: Job) -> bool;
}

impl Dispatcher for std::sync::mpsc::Sender<Job> {
    fn dispatch(&self, job: Job) -> bool {
        self.send(job).is_ok()
    }
}

/// Decodes, then hands `action(value)` to a dispatcher.
pub(crate) struct DispatchSink<T, D, X, F> {
    decoder: D,
    dispatcher: X,
    action: Arc<F>,
    closed: AtomicBool,
    _value: core::marker::PhantomData<fn() -> T>,
}

impl<T, D, X, F> DispatchSink<T, D, X, F> {
    pub(crate) fn new(decoder: D, dispatcher: X, action: F) -> Self {
        Self {
            decoder,
            dispatcher,
            action: Arc::new(action),
            closed: AtomicBool::new(false),
            _value: core::marker::PhantomData,
        }
    }
}

impl<T, D, X, F> Sink for DispatchSink<T, D, X, F>
where
    T: Send + 'static,
    D: Decoder<T>,
    X: Dispatcher,
    F: Fn(T) + Send + Sync + 'static,
{
    fn deliver(&self, raw: &[u8]) -> Result<(), DecodeError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let value = self.decoder.decode(raw)?;
        let action = Arc::clone(&self.action);
        if !self.dispatcher.dispatch(Box::new(move || action(value))) {
            debug!("dispatch target gone; delivery discarded");
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
