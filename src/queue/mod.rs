//! Pending/history queue pair for in-flight notifications.
//!
//! `pending` holds frames not yet written to the gateway. `history` holds
//! frames that were written but whose outcome is unknown: the gateway only
//! reports failures, and only asynchronously, so recently sent frames are
//! kept around to be replayed when an error reply shows they were lost.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A notification frame owned by the delivery worker
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Sequence number correlating the frame with gateway error replies
    pub identifier: u32,
    /// Pre-encoded wire frame
    pub frame: Bytes,
    /// When the request was created
    pub enqueued_at: DateTime<Utc>,
    /// Number of transmission tries
    pub attempts: u32,
}

impl PushRequest {
    pub fn new(identifier: u32, frame: Bytes) -> Self {
        Self {
            identifier,
            frame,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Check if the request is older than `max_age` at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let age = now.signed_duration_since(self.enqueued_at);
        age.to_std().map(|age| age >= max_age).unwrap_or(false)
    }
}

/// Ordered pending and history sequences
#[derive(Debug)]
pub struct DeliveryQueue {
    pending: VecDeque<PushRequest>,
    history: VecDeque<PushRequest>,
    history_max_age: Duration,
}

impl DeliveryQueue {
    pub fn new(history_max_age: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            history: VecDeque::new(),
            history_max_age,
        }
    }

    /// Append a request to the tail of `pending`
    pub fn enqueue(&mut self, request: PushRequest) {
        self.pending.push_back(request);
    }

    pub fn peek_head(&self) -> Option<&PushRequest> {
        self.pending.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut PushRequest> {
        self.pending.front_mut()
    }

    /// Move the request with `identifier` from `pending` to the tail of
    /// `history` after it has been written to the gateway.
    ///
    /// The request is located by identifier rather than by position. Returns
    /// false if it is not pending.
    pub fn commit(&mut self, identifier: u32) -> bool {
        let position = match self.pending.front() {
            Some(head) if head.identifier == identifier => Some(0),
            _ => self.pending.iter().position(|r| r.identifier == identifier),
        };

        match position.and_then(|index| self.pending.remove(index)) {
            Some(request) => {
                self.history.push_back(request);
                true
            }
            None => false,
        }
    }

    /// Remove the head of `pending`
    pub fn drop_head(&mut self) -> Option<PushRequest> {
        self.pending.pop_front()
    }

    /// Replay everything sent after `identifier`.
    ///
    /// A gateway reply for `identifier` resolves every request up to and
    /// including it. Later history entries were written to a connection the
    /// gateway abandoned, so they move back to the front of `pending` in
    /// their original order with attempts reset. History is cleared.
    /// Returns the number of requeued requests.
    pub fn requeue_after(&mut self, identifier: u32) -> usize {
        let split = self
            .history
            .iter()
            .position(|r| r.identifier > identifier)
            .unwrap_or(self.history.len());

        let mut redo = self.history.split_off(split);
        self.history.clear();

        let requeued = redo.len();
        for request in redo.iter_mut() {
            request.attempts = 0;
        }
        redo.append(&mut self.pending);
        self.pending = redo;

        requeued
    }

    /// Drop the stale prefix of `history`.
    ///
    /// History is time ordered, so pruning stops at the first entry still
    /// within the age limit. Returns the number of pruned requests.
    pub fn prune_history(&mut self, now: DateTime<Utc>) -> usize {
        let stale = self
            .history
            .iter()
            .take_while(|r| r.is_stale(now, self.history_max_age))
            .count();

        self.history.drain(..stale);
        stale
    }

    /// Identifier of the most recently written request still in history
    pub fn last_sent_identifier(&self) -> Option<u32> {
        self.history.back().map(|r| r.identifier)
    }

    /// Drop all of `history` without replaying it. Returns the count.
    pub fn forget_history(&mut self) -> usize {
        let forgotten = self.history.len();
        self.history.clear();
        forgotten
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PushRequest> {
        self.pending.iter()
    }

    pub fn history(&self) -> impl Iterator<Item = &PushRequest> {
        self.history.iter()
    }

    /// Discard everything, returning the (pending, history) counts
    pub fn clear(&mut self) -> (usize, usize) {
        let counts = (self.pending.len(), self.history.len());
        self.pending.clear();
        self.history.clear();
        counts
    }
}
