//! Consumer-facing client.
//!
//! ```text
//!  query() ─┐                                    ┌─▶ Subscription::recv()
//!           │  Command   ┌────────────┐  publish │
//!  subscribe├───────────▶│ I/O worker │──────────┼─▶ Dispatcher (UI thread)
//!  shutdown ┘            └────────────┘          └─▶ ...
//! ```
//!
//! Every method is safe to call from any thread. `query` blocks the
//! caller until the worker answers; keep it off threads that must stay
//! responsive and use `subscribe`/`watch` there instead.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use futures_lite::future;
use log::{info, warn};
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::decode::{Decoder, JsonDecoder};
use crate::error::{Error, Result};
use crate::registry::{Registry, SubscriptionHandle};
use crate::rpc::channels::{Command, CommandChannel, reply_slot};
use crate::rpc::io_task::{self, WorkerOptions};
use crate::rpc::session::ChannelSession;
use crate::rpc::tcp::TcpTransport;
use crate::rpc::transport::{ShutdownSignal, Transport};
use crate::subscription::{Backpressure, Cancel, DispatchSink, Dispatcher, Mailbox, MailboxSink, Subscription};

/// State shared between the client handle, subscriptions and the worker.
pub(crate) struct Shared {
    pub(crate) commands: CommandChannel,
    pub(crate) registry: Registry,
    pub(crate) signal: ShutdownSignal,
    io_tick: Duration,
    backpressure: Backpressure,
}

impl Shared {
    /// Resolves once shutdown has been signalled.
    async fn closed(&self) -> Error {
        while !self.signal.is_triggered() {
            async_io_mini::Timer::after(self.io_tick).await;
        }
        Error::ChannelClosed
    }

    /// Nudge the worker to re-sync its poll schedule. Never blocks; a
    /// full queue means the worker is about to wake anyway.
    fn wake(&self) {
        let _ = self.commands.try_send(Command::Wake);
    }
}

impl Cancel for Shared {
    fn cancel(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.registry.remove(handle);
        if removed {
            self.wake();
        }
        removed
    }
}

/// Handle to the single channel and its worker.
pub struct Client {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect to `config.endpoint` over TCP and start the worker.
    ///
    /// A failed connect aborts startup.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let signal = ShutdownSignal::new();
        let transport = TcpTransport::connect(&endpoint, config, signal.clone())?;
        Self::start(transport, signal, config)
    }

    /// Start the worker on an already-connected transport.
    ///
    /// `signal` must be the one the transport watches, so shutdown can
    /// interrupt a blocked receive.
    pub fn start<T: Transport + 'static>(
        transport: T,
        signal: ShutdownSignal,
        config: &ClientConfig,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            commands: CommandChannel::new(),
            registry: Registry::new(),
            signal: signal.clone(),
            io_tick: Duration::from_millis(u64::from(config.io_tick_ms.max(1))),
            backpressure: config.backpressure,
        });
        let options = WorkerOptions {
            poll_interval: Duration::from_millis(u64::from(config.poll_interval_ms.max(1))),
            reconnect: config.reconnect,
        };
        let session = ChannelSession::new(transport, signal);
        let worker = io_task::spawn(session, Arc::clone(&shared), options)
            .map_err(|e| Error::Config(format!("cannot spawn I/O worker: {e}")))?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    // ── One-shot queries ──────────────────────────────────────

    /// Raw reply bytes for `identifier`. Blocks the calling thread.
    pub fn request(&self, identifier: &str) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        let shared = &self.shared;
        let reply = reply_slot();
        let command = Command::Request {
            identifier: identifier.to_owned(),
            reply: Arc::clone(&reply),
        };

        future::block_on(future::or(
            async {
                shared.commands.send(command).await;
                reply.wait().await
            },
            async { Err(shared.closed().await) },
        ))
    }

    /// Typed query with an explicit decoder.
    pub fn query<T, D: Decoder<T>>(&self, identifier: &str, decoder: &D) -> Result<T> {
        let raw = self.request(identifier)?;
        Ok(decoder.decode(&raw)?)
    }

    /// Typed query decoding JSON.
    pub fn query_json<T: DeserializeOwned>(&self, identifier: &str) -> Result<T> {
        self.query(identifier, &JsonDecoder::<T>::new())
    }

    // ── Subscriptions ─────────────────────────────────────────

    /// Live stream of `identifier`, decoded with `decoder`.
    ///
    /// Polling for the identifier starts with its first subscriber and
    /// the first poll is issued immediately. A consumer that falls behind
    /// is handled per [`ClientConfig::backpressure`].
    pub fn subscribe<T, D>(&self, identifier: &str, decoder: D) -> Result<Subscription<T>>
    where
        T: Send + 'static,
        D: Decoder<T> + 'static,
    {
        let mailbox = Arc::new(Mailbox::new(identifier, self.shared.backpressure));
        let sink = Arc::new(MailboxSink::new(Arc::clone(&mailbox), decoder));
        let handle = self.shared.registry.add(identifier, sink)?;
        self.shared.wake();

        let shared: Arc<dyn Cancel> = self.shared.clone();
        let owner: Weak<dyn Cancel> = Arc::downgrade(&shared);
        Ok(Subscription::new(handle, mailbox, owner))
    }

    pub fn subscribe_json<T>(&self, identifier: &str) -> Result<Subscription<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.subscribe(identifier, JsonDecoder::<T>::new())
    }

    /// Callback-style subscription: each value is decoded on the worker
    /// and `action(value)` is handed to `dispatcher`, which runs it on
    /// the consumer's own thread.
    pub fn watch<T, D, X, F>(
        &self,
        identifier: &str,
        decoder: D,
        dispatcher: X,
        action: F,
    ) -> Result<SubscriptionHandle>
    where
        T: Send + 'static,
        D: Decoder<T> + 'static,
        X: Dispatcher,
        F: Fn(T) + Send + Sync + 'static,
    {
        let sink = Arc::new(DispatchSink::new(decoder, dispatcher, action));
        let handle = self.shared.registry.add(identifier, sink)?;
        self.shared.wake();
        Ok(handle)
    }

    /// Stop one subscription. Idempotent; returns `false` if it was
    /// already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.shared.cancel(handle)
    }

    pub fn subscriber_count(&self, identifier: &str) -> usize {
        self.shared.registry.subscriber_count(identifier)
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.shared.signal.is_triggered()
    }

    /// Close the channel, stop polling and invalidate every subscription.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub fn shutdown(&self) {
        if self.shared.signal.trigger() {
            info!("client shutting down");
            let _ = self.shared.commands.try_send(Command::Shutdown);
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("I/O worker panicked");
            }
            // The worker closes subscriptions on exit; a panicked worker
            // may not have.
            self.shared.registry.close_all();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}
