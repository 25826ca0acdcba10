//! Poll schedule for subscribed identifiers.
//!
//! The `PollSchedule` tracks which identifiers are actively polled and
//! when each is next due. Cadence is fixed-delay: the next poll is due
//! one interval after the previous one completed, so a slow reply never
//! causes a burst of catch-up polls.
//!
//! ```text
//!   sync() adds ──▶ Idle ──begin()──▶ Polling ──finish()──▶ Idle ...
//!   sync() drops ──▶ Stopped (entry removed)
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::debug;

/// Per-identifier polling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting for the next due time.
    Idle,
    /// A query for this identifier is on the channel.
    Polling,
    /// No subscriber remains; polling has ceased.
    Stopped,
}

/// Result of one poll, as far as the schedule cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Delivered,
    Failed,
}

/// Lifetime totals for an identifier whose polling has stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub identifier: String,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone)]
struct PollEntry {
    state: PollState,
    next_due: Instant,
    successes: u64,
    failures: u64,
}

/// Schedule for every actively-subscribed identifier.
pub struct PollSchedule {
    interval: Duration,
    entries: BTreeMap<String, PollEntry>,
}

impl PollSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: BTreeMap::new(),
        }
    }

    /// Match the schedule to the set of identifiers with subscribers.
    ///
    /// New identifiers are due at `now`. Returns a summary for every
    /// identifier that was dropped.
    pub fn sync<S: AsRef<str>>(&mut self, active: &[S], now: Instant) -> Vec<PollSummary> {
        let gone: Vec<String> = self
            .entries
            .keys()
            .filter(|id| !active.iter().any(|a| a.as_ref() == id.as_str()))
            .cloned()
            .collect();
        let mut stopped = Vec::with_capacity(gone.len());
        for id in gone {
            if let Some(entry) = self.entries.remove(&id) {
                stopped.push(PollSummary {
                    identifier: id,
                    successes: entry.successes,
                    failures: entry.failures,
                });
            }
        }

        for id in active {
            let id = id.as_ref();
            if !self.entries.contains_key(id) {
                debug!("poll[{}]: started", id);
                self.entries.insert(
                    id.to_owned(),
                    PollEntry {
                        state: PollState::Idle,
                        next_due: now,
                        successes: 0,
                        failures: 0,
                    },
                );
            }
        }
        stopped
    }

    /// Earliest due time across idle identifiers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|e| e.state == PollState::Idle)
            .map(|e| e.next_due)
            .min()
    }

    /// Idle identifiers whose due time has passed, in due order.
    pub fn due(&self, now: Instant) -> Vec<String> {
        let mut due: Vec<(&String, Instant)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == PollState::Idle && e.next_due <= now)
            .map(|(id, e)| (id, e.next_due))
            .collect();
        due.sort_by_key(|&(_, at)| at);
        due.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Idle → Polling. Returns `false` if the identifier is not idle.
    pub fn begin(&mut self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.state == PollState::Idle => {
                entry.state = PollState::Polling;
                true
            }
            _ => false,
        }
    }

    /// Polling → Idle, next due one interval after `now`.
    pub fn finish(&mut self, id: &str, outcome: PollOutcome, now: Instant) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.state = PollState::Idle;
            entry.next_due = now + self.interval;
            match outcome {
                PollOutcome::Delivered => entry.successes += 1,
                PollOutcome::Failed => entry.failures += 1,
            }
        }
    }

    pub fn state(&self, id: &str) -> PollState {
        self.entries
            .get(id)
            .map_or(PollState::Stopped, |entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
