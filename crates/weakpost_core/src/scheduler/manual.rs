//! Deterministic loop driven by a virtual clock.
//!
//! Delivery happens synchronously on whichever thread calls `run_due` or
//! `advance_*`; that thread counts as the loop thread for the duration.

use super::{Envelope, LoopHandle, MessageQueue, Scheduler};
use crate::binding::CallbackBinding;
use crate::message::Token;
use crate::registry::ProxyTask;
use log::warn;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct ManualState {
    now: Duration,
    queue: MessageQueue,
    accepting: bool,
}

pub struct ManualScheduler {
    state: Mutex<ManualState>,
    handle: LoopHandle,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                queue: MessageQueue::new(),
                accepting: true,
            }),
            handle: LoopHandle::new("manual"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now(&self) -> Duration {
        self.lock().now
    }

    pub fn pending_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Simulates a terminated loop thread: later submissions return false.
    pub fn set_accepting(&self, accepting: bool) {
        self.lock().accepting = accepting;
    }

    /// Delivers everything due at the current time. Returns the delivery count.
    pub fn run_due(&self) -> usize {
        let now = self.now();
        self.advance_to(now)
    }

    pub fn advance_by(&self, delta: Duration) -> usize {
        let target = self.now() + delta;
        self.advance_to(target)
    }

    /// Moves the clock forward to `target`, delivering due envelopes in order.
    ///
    /// Envelopes queued by delivered work are delivered too if they fall
    /// due before `target`. The clock never moves backwards.
    pub fn advance_to(&self, target: Duration) -> usize {
        let _entered = self.handle.enter();
        let mut delivered = 0;
        loop {
            let next = {
                let mut state = self.lock();
                let popped = state.queue.pop_due(target);
                if let Some((when, _)) = popped.as_ref() {
                    state.now = state.now.max(*when);
                }
                popped
            };
            let Some((_, envelope)) = next else {
                break;
            };
            envelope.deliver();
            delivered += 1;
        }
        let mut state = self.lock();
        state.now = state.now.max(target);
        delivered
    }

    fn remove_where(&self, predicate: impl FnMut(&Envelope) -> bool) {
        let removed = self.lock().queue.drain_where(predicate);
        drop(removed);
    }

    fn enqueue(&self, push: impl FnOnce(&mut MessageQueue)) -> bool {
        let mut state = self.lock();
        if !state.accepting {
            drop(state);
            warn!("event=submit module=looper status=rejected name=manual reason=not_accepting");
            return false;
        }
        push(&mut state.queue);
        true
    }
}

impl Scheduler for ManualScheduler {
    fn uptime(&self) -> Duration {
        self.now()
    }

    fn submit_at_time(&self, envelope: Envelope, when: Duration) -> bool {
        self.enqueue(|queue| queue.push_at(envelope, when))
    }

    fn submit_at_front(&self, envelope: Envelope) -> bool {
        self.enqueue(|queue| queue.push_front(envelope))
    }

    fn cancel_by_identity(
        &self,
        target: &Arc<CallbackBinding>,
        proxy: &Arc<ProxyTask>,
        token: Option<&Token>,
    ) {
        self.remove_where(|envelope| envelope.matches_callback(target, proxy, token));
    }

    fn cancel_messages(&self, target: &Arc<CallbackBinding>, what: i32, token: Option<&Token>) {
        self.remove_where(|envelope| envelope.matches_message(target, what, token));
    }

    fn cancel_all(&self, target: &Arc<CallbackBinding>, token: Option<&Token>) {
        self.remove_where(|envelope| envelope.matches_target(target, token));
    }

    fn has_pending(
        &self,
        target: &Arc<CallbackBinding>,
        what: i32,
        token: Option<&Token>,
    ) -> bool {
        self.lock()
            .queue
            .any(|envelope| envelope.matches_message(target, what, token))
    }

    fn loop_handle(&self) -> LoopHandle {
        self.handle.clone()
    }
}
