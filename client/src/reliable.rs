//! Reliable delivery on top of an unordered, at-least-once channel:
//! a single-writer sequence counter with a bounded replay log, a receive
//! guard for de-duplication, and an ordered outbox for disconnected spells.

use std::collections::VecDeque;

use log::{debug, warn};
use serde_json::Value;
use slateboard_shared::messages::{Envelope, LoggedEvent};

use crate::transport::ConnectionState;

pub const REPLAY_LOG_CAPACITY: usize = 64;
pub const OUTBOX_CAPACITY: usize = 256;
pub const RECONNECT_DELAY_MS: u64 = 2_000;

/// The teacher-owned sequence counter and replay log. Single writer by
/// construction: only the side that created it ever assigns ids.
pub struct ReliableChannel {
    sequence: u64,
    log: VecDeque<LoggedEvent>,
    capacity: usize,
}

impl Default for ReliableChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliableChannel {
    pub fn new() -> Self {
        Self::with_capacity(REPLAY_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sequence: 0,
            log: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Assigns the next sequence id. The caller stamps it into the outgoing
    /// payload as `__seq` and then records the sent event.
    pub fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn record(&mut self, id: u64, event: &str, payload: Value, timestamp: u64) {
        self.log.push_back(LoggedEvent {
            id,
            event: event.to_string(),
            payload,
            timestamp,
        });
        while self.log.len() > self.capacity {
            self.log.pop_front();
        }
    }

    pub fn last_sequence(&self) -> u64 {
        self.sequence
    }

    /// Logged events with `id > after`, oldest first. Anything older than
    /// the log window must come from the snapshot instead.
    pub fn events_since(&self, after: u64) -> Vec<LoggedEvent> {
        self.log
            .iter()
            .filter(|entry| entry.id > after)
            .cloned()
            .collect()
    }
}

/// Receiving-side de-duplication against at-least-once delivery. The last
/// applied id survives reloads via the persisted resume state.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequenceGuard {
    last_applied: u64,
}

impl SequenceGuard {
    pub fn new(last_applied: u64) -> Self {
        Self { last_applied }
    }

    /// True exactly once per id: stale and duplicate stamps are rejected.
    pub fn accept(&mut self, seq: u64) -> bool {
        if seq <= self.last_applied {
            debug!("dropping stale control event seq={seq}");
            return false;
        }
        self.last_applied = seq;
        true
    }

    /// Fast-forward after adopting a snapshot captured at `seq`.
    pub fn advance_to(&mut self, seq: u64) {
        self.last_applied = self.last_applied.max(seq);
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }
}

/// Bounded send queue. Everything a controller emits passes through here;
/// while the channel is down messages accumulate (oldest dropped past the
/// cap) and flush strictly in order once it is back.
pub struct Outbox {
    queue: VecDeque<Envelope>,
    capacity: usize,
    dropped: u64,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(OUTBOX_CAPACITY)
    }
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, envelope: Envelope) {
        if self.queue.len() == self.capacity {
            if let Some(oldest) = self.queue.pop_front() {
                self.dropped += 1;
                warn!("outbox full, dropping oldest \"{}\"", oldest.event);
            }
        }
        self.queue.push_back(envelope);
    }

    pub fn drain(&mut self) -> Vec<Envelope> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Fixed-delay reconnect loop with a single in-flight attempt. Cooperative:
/// the shell calls `poll` with the current time and performs the actual
/// resubscribe when it returns true.
pub struct Reconnector {
    state: ConnectionState,
    retry_delay_ms: u64,
    next_attempt_at: Option<u64>,
    in_flight: bool,
}

impl Default for Reconnector {
    fn default() -> Self {
        Self::new(RECONNECT_DELAY_MS)
    }
}

impl Reconnector {
    pub fn new(retry_delay_ms: u64) -> Self {
        Self {
            state: ConnectionState::Connecting,
            retry_delay_ms,
            next_attempt_at: None,
            in_flight: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn on_subscribed(&mut self) {
        self.state = ConnectionState::Connected;
        self.in_flight = false;
        self.next_attempt_at = None;
    }

    /// Any channel error, timeout, or close. An in-flight attempt that fails
    /// lands here too and schedules the next try.
    pub fn on_lost(&mut self, now_ms: u64) {
        self.state = ConnectionState::Disconnected;
        self.in_flight = false;
        self.next_attempt_at = Some(now_ms + self.retry_delay_ms);
    }

    pub fn poll(&mut self, now_ms: u64) -> bool {
        match self.next_attempt_at {
            Some(at) if now_ms >= at && !self.in_flight => {
                self.in_flight = true;
                self.next_attempt_at = None;
                self.state = ConnectionState::Connecting;
                true
            }
            _ => false,
        }
    }
}
