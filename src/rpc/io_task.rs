//! Exclusive-owner I/O worker: the only holder of the channel.
//!
//! Runs in a dedicated thread. A single async loop, driven by
//! `futures_lite::future::block_on`, waits for whichever comes first:
//!
//! 1. **Command**: `CommandChannel::receive().await` (one-shot request,
//!    wake, shutdown)
//! 2. **Poll due**: `async_io_mini::Timer` set to the earliest due
//!    identifier (reactor timer, no busy-spinning)
//!
//! and then polls every identifier whose turn has come.
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────┐
//!  │  punchcard-io thread                                     │
//!  │  ┌────────────────────────────────────────────────────┐  │
//!  │  │  block_on(io_loop)                                 │  │
//!  │  │                                                    │  │
//!  │  │   or(command.receive(), Timer::after(next_due))    │  │
//!  │  │              │                                     │  │
//!  │  │              ▼                                     │  │
//!  │  │   ChannelSession::request_reply  (one at a time)   │  │
//!  │  │              │                                     │  │
//!  │  │              ▼                                     │  │
//!  │  │   reply slot  |  Registry::publish                 │  │
//!  │  └────────────────────────────────────────────────────┘  │
//!  └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every exchange happens on this thread, so at most one request is in
//! flight system-wide. No lock is held while the loop waits.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures_lite::future;
use log::{debug, info, warn};

use super::channels::{Command, CommandChannel};
use super::session::{ChannelSession, SessionState};
use super::stream::{PollOutcome, PollSchedule, PollSummary};
use super::transport::Transport;
use crate::client::Shared;
use crate::error::{Error, Result};

/// Worker tunables, taken from [`ClientConfig`](crate::config::ClientConfig).
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub reconnect: bool,
}

// ── Exchange ─────────────────────────────────────────────────

/// One request/reply, recovering a desynchronised session first when
/// reconnects are enabled.
fn exchange<T: Transport>(
    session: &mut ChannelSession<T>,
    options: &WorkerOptions,
    payload: &[u8],
) -> Result<Vec<u8>> {
    if options.reconnect && session.state() == SessionState::Desynchronized {
        session.recover()?;
    }
    session.request_reply(payload)
}

// ── Async I/O loop ───────────────────────────────────────────

async fn next_command(commands: &CommandChannel, deadline: Option<Instant>) -> Option<Command> {
    let Some(deadline) = deadline else {
        return Some(commands.receive().await);
    };
    let wait = deadline.saturating_duration_since(Instant::now());
    if wait.is_zero() {
        return commands.try_receive().ok();
    }
    future::or(async { Some(commands.receive().await) }, async {
        async_io_mini::Timer::after(wait).await;
        None
    })
    .await
}

fn log_stopped(stopped: &[PollSummary]) {
    for s in stopped {
        debug!(
            "poll[{}]: stopped after {} ok, {} failed",
            s.identifier, s.successes, s.failures
        );
    }
}

async fn io_loop<T: Transport>(
    session: &mut ChannelSession<T>,
    schedule: &mut PollSchedule,
    shared: &Shared,
    options: &WorkerOptions,
) {
    loop {
        if shared.signal.is_triggered() {
            return;
        }
        log_stopped(&schedule.sync(&shared.registry.identifiers(), Instant::now()));

        match next_command(&shared.commands, schedule.next_deadline()).await {
            Some(Command::Shutdown) => return,
            Some(Command::Request { identifier, reply }) => {
                let result = exchange(session, options, identifier.as_bytes());
                if let Err(e) = &result {
                    debug!("IO: request {} failed: {}", identifier, e);
                }
                reply.signal(result);
            }
            Some(Command::Wake) => {
                log_stopped(&schedule.sync(&shared.registry.identifiers(), Instant::now()));
            }
            None => {}
        }

        for id in schedule.due(Instant::now()) {
            if shared.signal.is_triggered() {
                return;
            }
            if !schedule.begin(&id) {
                continue;
            }
            let outcome = match exchange(session, options, id.as_bytes()) {
                Ok(raw) => {
                    let report = shared.registry.publish(&id, &raw);
                    debug!(
                        "poll[{}]: {} bytes, {} delivered, {} rejected",
                        id,
                        raw.len(),
                        report.delivered,
                        report.rejected
                    );
                    PollOutcome::Delivered
                }
                Err(Error::ChannelClosed) => return,
                Err(e) => {
                    warn!("poll[{}]: {}", id, e);
                    PollOutcome::Failed
                }
            };
            schedule.finish(&id, outcome, Instant::now());
        }
    }
}

/// Fail every queued request. Returns how many were failed.
fn drain_commands(commands: &CommandChannel) -> usize {
    let mut failed = 0;
    while let Ok(command) = commands.try_receive() {
        if let Command::Request { reply, .. } = command {
            reply.signal(Err(Error::ChannelClosed));
            failed += 1;
        }
    }
    failed
}

/// Entry point for the I/O thread.
fn run_io_loop<T: Transport>(mut session: ChannelSession<T>, shared: &Shared, options: WorkerOptions) {
    info!(
        "IO worker started (poll every {} ms, reconnect {})",
        options.poll_interval.as_millis(),
        options.reconnect
    );

    let mut schedule = PollSchedule::new(options.poll_interval);
    future::block_on(io_loop(&mut session, &mut schedule, shared, &options));

    session.close();
    let none: [&str; 0] = [];
    for s in schedule.sync(&none, Instant::now()) {
        info!(
            "poll[{}]: {} ok, {} failed over the worker's lifetime",
            s.identifier, s.successes, s.failures
        );
    }
    let failed = drain_commands(&shared.commands);
    let closed = shared.registry.close_all();
    info!(
        "IO worker stopped after {} exchanges ({} queued requests failed, {} subscriptions closed)",
        session.exchanges(),
        failed,
        closed
    );
}

// ── Thread spawn ─────────────────────────────────────────────

/// Spawn the I/O worker. Takes ownership of the session; nothing else
/// ever touches the transport.
pub(crate) fn spawn<T: Transport + 'static>(
    session: ChannelSession<T>,
    shared: Arc<Shared>,
    options: WorkerOptions,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("punchcard-io".into())
        .spawn(move || run_io_loop(session, &shared, options))
}
