//! Worker inter-task communication channels.
//!
//! Uses `embassy-sync` bounded MPMC channels to bridge consumer threads
//! with the exclusive-owner I/O worker. One-shot requests carry their own
//! reply [`Signal`].
//!
//! ```text
//! ┌──────────────┐   Command    ┌──────────────┐
//! │  Consumers   │─────────────▶│  I/O worker  │
//! │  (any thread)│◀─────────────│  (owns chan) │
//! └──────────────┘  ReplySlot   └──────────────┘
//! ```

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

use crate::error::Result;

/// Channel depth for commands (consumer → worker).
pub const COMMAND_DEPTH: usize = 32;

/// Where the worker posts the outcome of a one-shot request.
pub type ReplySlot = Arc<Signal<CriticalSectionRawMutex, Result<Vec<u8>>>>;

/// Message from a consumer to the worker.
pub enum Command {
    /// One-shot request for `identifier`.
    Request { identifier: String, reply: ReplySlot },
    /// The subscribed identifier set changed; re-sync the poll schedule.
    Wake,
    /// Stop the worker.
    Shutdown,
}

/// Command channel shared by the client and the worker.
pub type CommandChannel = Channel<CriticalSectionRawMutex, Command, COMMAND_DEPTH>;

pub fn reply_slot() -> ReplySlot {
    Arc::new(Signal::new())
}
