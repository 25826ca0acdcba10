//! Fan-out subscription registry.
//!
//! Maps each identifier to the delivery targets currently subscribed to
//! it. The poll loop calls [`Registry::publish`] with every raw reply;
//! the registry snapshots the target set under its lock and delivers
//! outside it, so subscribe/unsubscribe never race a publish in
//! progress and a slow target cannot hold the lock.
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!  poll loop ───▶ │ "entity:0" ─▶ [sink 1, sink 4]│ ──▶ per-subscriber
//!  publish(raw)   │ "entity:1" ─▶ [sink 2]        │     decode + queue
//!                 └──────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::error::{DecodeError, Error, Result};

/// Unique per registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Returned by subscribe; pass it back to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    identifier: Arc<str>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// A delivery target. Decodes the raw reply itself, so subscribers to
/// the same identifier may each ask for a different type.
pub trait Sink: Send + Sync {
    /// Hand one reply to the target. Must not block.
    fn deliver(&self, raw: &[u8]) -> core::result::Result<(), DecodeError>;

    /// The subscription ended; no further deliveries follow.
    fn close(&self);
}

/// Outcome of one [`Registry::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub rejected: usize,
}

struct Target {
    id: SubscriptionId,
    sink: Arc<dyn Sink>,
}

#[derive(Default)]
struct Inner {
    targets: HashMap<Arc<str>, Vec<Target>>,
    closed: bool,
}

/// Identifier → active targets.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `sink` for `identifier`. Fails once the registry is closed.
    pub fn add(&self, identifier: &str, sink: Arc<dyn Sink>) -> Result<SubscriptionHandle> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::ChannelClosed);
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let key = match inner.targets.get_key_value(identifier) {
            Some((key, _)) => Arc::clone(key),
            None => Arc::from(identifier),
        };
        inner
            .targets
            .entry(Arc::clone(&key))
            .or_default()
            .push(Target { id, sink });
        debug!("subscribe[{}]: id {:?}", key, id);

        Ok(SubscriptionHandle {
            id,
            identifier: key,
        })
    }

    /// Remove the target behind `handle`. Returns `false` if it was
    /// already gone.
    pub fn remove(&self, handle: &SubscriptionHandle) -> bool {
        let removed = {
            let mut inner = self.lock();
            let Some(targets) = inner.targets.get_mut(handle.identifier()) else {
                return false;
            };
            let Some(pos) = targets.iter().position(|t| t.id == handle.id) else {
                return false;
            };
            let target = targets.remove(pos);
            if targets.is_empty() {
                inner.targets.remove(handle.identifier());
            }
            target
        };
        debug!("unsubscribe[{}]: id {:?}", handle.identifier, handle.id);
        removed.sink.close();
        true
    }

    /// Deliver `raw` to every target subscribed to `identifier` right now.
    pub fn publish(&self, identifier: &str, raw: &[u8]) -> PublishReport {
        let snapshot: Vec<(SubscriptionId, Arc<dyn Sink>)> = {
            let inner = self.lock();
            match inner.targets.get(identifier) {
                Some(targets) => targets
                    .iter()
                    .map(|t| (t.id, Arc::clone(&t.sink)))
                    .collect(),
                None => return PublishReport::default(),
            }
        };

        let mut report = PublishReport::default();
        for (id, sink) in snapshot {
            match sink.deliver(raw) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("poll[{}]: subscriber {:?} rejected reply: {}", identifier, id, e);
                    report.rejected += 1;
                }
            }
        }
        report
    }

    /// Identifiers with at least one subscriber.
    pub fn identifiers(&self) -> Vec<Arc<str>> {
        self.lock().targets.keys().cloned().collect()
    }

    pub fn subscriber_count(&self, identifier: &str) -> usize {
        self.lock().targets.get(identifier).map_or(0, Vec::len)
    }

    /// Close every target and refuse new ones. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Target> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.targets.drain().flat_map(|(_, v)| v).collect()
        };
        for target in &drained {
            target.sink.close();
        }
        drained.len()
    }
}
