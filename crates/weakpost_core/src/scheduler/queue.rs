//! Time-ordered envelope queue shared by the reference loops.

use super::Envelope;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    when: Duration,
    sequence: i64,
}

#[derive(Debug)]
struct Queued {
    key: QueueKey,
    envelope: Envelope,
}

/// Envelopes ordered by due time, ties broken by submission order.
///
/// Front-of-queue entries sort before everything else; the most recent
/// front submission comes first.
#[derive(Debug, Default)]
pub struct MessageQueue {
    entries: VecDeque<Queued>,
    next_sequence: i64,
    next_front_sequence: i64,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_at(&mut self, envelope: Envelope, when: Duration) {
        self.next_sequence += 1;
        let key = QueueKey {
            when,
            sequence: self.next_sequence,
        };
        self.insert(key, envelope);
    }

    pub fn push_front(&mut self, envelope: Envelope) {
        self.next_front_sequence -= 1;
        let key = QueueKey {
            when: Duration::ZERO,
            sequence: self.next_front_sequence,
        };
        self.insert(key, envelope);
    }

    fn insert(&mut self, key: QueueKey, envelope: Envelope) {
        let position = self.entries.partition_point(|queued| queued.key <= key);
        self.entries.insert(position, Queued { key, envelope });
    }

    /// Due time of the head entry.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.entries.front().map(|queued| queued.key.when)
    }

    /// Pops the head entry if it is due at or before `limit`.
    pub fn pop_due(&mut self, limit: Duration) -> Option<(Duration, Envelope)> {
        if self.next_deadline()? > limit {
            return None;
        }
        self.entries
            .pop_front()
            .map(|queued| (queued.key.when, queued.envelope))
    }

    /// Removes every entry matching `predicate`, preserving the order of the rest.
    ///
    /// Removed envelopes are returned so callers can drop them outside any lock.
    pub fn drain_where(&mut self, mut predicate: impl FnMut(&Envelope) -> bool) -> Vec<Envelope> {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for queued in self.entries.drain(..) {
            if predicate(&queued.envelope) {
                removed.push(queued.envelope);
            } else {
                kept.push_back(queued);
            }
        }
        self.entries = kept;
        removed
    }

    pub fn any(&self, mut predicate: impl FnMut(&Envelope) -> bool) -> bool {
        self.entries.iter().any(|queued| predicate(&queued.envelope))
    }

    pub fn clear(&mut self) -> Vec<Envelope> {
        self.drain_where(|_| true)
    }
}
