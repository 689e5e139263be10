//! Readiness gate and pending queue.
//!
//! Client messages reach the upstream only once the handshake has been
//! acknowledged AND the priming exchange has completed. Until then they
//! wait, in submission order, in the [`PendingQueue`].

use std::collections::VecDeque;

use thiserror::Error;

/// Tracks the two readiness flags of one upstream connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessGate {
    handshake_complete: bool,
    priming_complete: bool,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    pub fn priming_complete(&self) -> bool {
        self.priming_complete
    }

    /// Forwarding is allowed.
    pub fn is_open(&self) -> bool {
        self.handshake_complete && self.priming_complete
    }

    /// Record the setup acknowledgement. Returns `false` if it was already
    /// recorded for this connection.
    pub fn mark_handshake(&mut self) -> bool {
        !std::mem::replace(&mut self.handshake_complete, true)
    }

    /// Record delivery of the priming reply. Returns `true` only on the
    /// transition, which is when the queue must be drained.
    pub fn mark_primed(&mut self) -> bool {
        if !self.handshake_complete || self.priming_complete {
            return false;
        }
        self.priming_complete = true;
        true
    }

    /// Drop both flags (upstream lost or closed).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The queue is at its configured bound.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("pending queue is full ({0} messages)")]
pub struct QueueFull(pub usize);

/// FIFO of client messages not yet forwarded upstream.
#[derive(Debug, Default)]
pub struct PendingQueue {
    items: VecDeque<String>,
    capacity: Option<usize>,
}

impl PendingQueue {
    /// `capacity: None` leaves the queue unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    pub fn enqueue(&mut self, message: String) -> Result<(), QueueFull> {
        match self.capacity {
            Some(cap) if self.items.len() >= cap => return Err(QueueFull(cap)),
            _ => {}
        }
        self.items.push_back(message);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    /// Put a message back at the head after a failed forward.
    pub fn restore_front(&mut self, message: String) {
        self.items.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keep only the first `len` messages.
    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
