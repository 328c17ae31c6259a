//! A short in-memory buffer of terminal events, replayed after a
//! reconnect so the server learns about assignments that finished during
//! the outage. Bounded by size and age; overflow flips a flag that asks
//! the server to reconcile instead.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::messages::AssignmentEvent;

pub const DEFAULT_REPLAY_CAPACITY: usize = 256;
pub const DEFAULT_REPLAY_TTL: Duration = Duration::from_secs(300);

struct Entry {
    recorded_at: Instant,
    event: AssignmentEvent,
}

struct Inner {
    entries: VecDeque<Entry>,
    overflowed: bool,
}

pub struct ReplayBuffer {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        ReplayBuffer {
            capacity,
            ttl,
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                overflowed: false,
            }),
        }
    }

    pub fn record(&self, event: AssignmentEvent) {
        let mut inner = self.inner.lock();
        if inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
            inner.overflowed = true;
        }
        inner.entries.push_back(Entry {
            recorded_at: Instant::now(),
            event,
        });
    }

    /// Take the events still inside the TTL, oldest first, plus whether
    /// anything was lost (overflow or expiry) since the last drain.
    /// Draining empties the buffer: once an event has been handed to a
    /// session it is not replayed again on later reconnects.
    pub fn drain_for_replay(&self) -> (Vec<AssignmentEvent>, bool) {
        let mut inner = self.inner.lock();
        let cutoff = Instant::now();
        let lost = inner.overflowed
            || inner
                .entries
                .iter()
                .any(|entry| cutoff.duration_since(entry.recorded_at) >= self.ttl);
        inner.overflowed = false;

        let events = inner
            .entries
            .drain(..)
            .filter(|entry| cutoff.duration_since(entry.recorded_at) < self.ttl)
            .map(|entry| entry.event)
            .collect();
        (events, lost)
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CAPACITY, DEFAULT_REPLAY_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::EventKind;

    fn done(id: &str) -> AssignmentEvent {
        AssignmentEvent::new(id, EventKind::Done)
    }

    #[test]
    fn replays_recorded_events_in_order_exactly_once() {
        let buffer = ReplayBuffer::new(8, Duration::from_secs(60));
        buffer.record(done("a"));
        buffer.record(done("b"));
        let (events, lost) = buffer.drain_for_replay();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].assignment, "a");
        assert!(!lost);

        // A second drain must not hand out the same events again.
        let (again, lost_again) = buffer.drain_for_replay();
        assert!(again.is_empty());
        assert!(!lost_again);
    }

    #[test]
    fn overflow_drops_oldest_and_flags_loss_once() {
        let buffer = ReplayBuffer::new(2, Duration::from_secs(60));
        buffer.record(done("a"));
        buffer.record(done("b"));
        buffer.record(done("c"));
        let (events, lost) = buffer.drain_for_replay();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].assignment, "b");
        assert!(lost);

        let (_, lost_again) = buffer.drain_for_replay();
        assert!(!lost_again);
    }

    #[test]
    fn events_recorded_after_a_drain_replay_on_the_next_one() {
        let buffer = ReplayBuffer::new(8, Duration::from_secs(60));
        buffer.record(done("a"));
        buffer.drain_for_replay();
        buffer.record(done("b"));
        let (events, _) = buffer.drain_for_replay();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].assignment, "b");
    }
}
