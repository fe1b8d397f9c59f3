//! FIFO of remote etag checks with a single request in flight.
//!
//! Etag lookups for all folders share one slot so that a large number of
//! folders does not flood the server every poll interval.

use std::collections::VecDeque;

#[derive(Debug, Default, Clone)]
pub struct EtagQueue {
    pending: VecDeque<String>,
    in_flight: Option<String>,
}

impl EtagQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a check; returns false when one is already pending or running.
    pub fn enqueue(&mut self, alias: &str) -> bool {
        if self.is_queued(alias) {
            return false;
        }
        self.pending.push_back(alias.to_string());
        true
    }

    pub fn is_queued(&self, alias: &str) -> bool {
        self.in_flight.as_deref() == Some(alias) || self.pending.iter().any(|a| a == alias)
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Pops the next job into the slot if the slot is free.
    pub fn take_next(&mut self) -> Option<String> {
        if self.in_flight.is_some() {
            return None;
        }
        let next = self.pending.pop_front()?;
        self.in_flight = Some(next.clone());
        Some(next)
    }

    /// Frees the slot. Returns false for results nobody is waiting for.
    pub fn complete(&mut self, alias: &str) -> bool {
        if self.in_flight.as_deref() == Some(alias) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Drops a pending job. A running one keeps the slot until it completes.
    pub fn remove(&mut self, alias: &str) {
        self.pending.retain(|a| a != alias);
    }
}
