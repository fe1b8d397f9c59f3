//! Deadline bookkeeping for the sans-IO scheduler.
//!
//! Nothing here sleeps. Owners ask for the nearest deadline, the event loop
//! sleeps until then and calls back with the current instant.

use std::time::Duration;
use tokio::time::Instant;

/// One-shot deadline, inactive until started.
#[derive(Debug, Clone, Default)]
pub struct SingleShot {
    deadline: Option<Instant>,
}

impl SingleShot {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)arms the timer.
    pub fn start(&mut self, now: Instant, after: Duration) {
        self.deadline = Some(now + after);
    }

    /// Arms the timer only when it is not already running.
    pub fn start_if_idle(&mut self, now: Instant, after: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.start(now, after);
        true
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true once when the deadline has passed, disarming the timer.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Repeating deadline. Missed periods are skipped, not replayed.
#[derive(Debug, Clone)]
pub struct Periodic {
    period: Duration,
    next: Instant,
}

impl Periodic {
    pub fn new(now: Instant, period: Duration) -> Self {
        Self {
            period,
            next: now + period,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.next
    }

    pub fn fire(&mut self, now: Instant) -> bool {
        if self.next > now {
            return false;
        }
        self.next = now + self.period;
        true
    }
}

/// Earliest of a set of optional deadlines.
pub fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}
