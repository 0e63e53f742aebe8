//! Deferred scheduler boundary and reference loop implementations.
//!
//! # Responsibility
//! - Define what the handler facade needs from a single-threaded loop.
//! - Define the envelope that travels through a loop's queue.
//! - Ship a thread-backed loop and a deterministic manual loop.
//!
//! # Invariants
//! - Envelopes are delivered on the loop's own thread, in `(when, sequence)` order.
//! - Cancellation compares proxies and targets by identity.
//! - Rejected submissions return `false`; nothing is queued.

mod looper;
mod manual;
mod queue;

pub use looper::{Looper, LooperError};
pub use manual::ManualScheduler;
pub use queue::MessageQueue;

use crate::binding::CallbackBinding;
use crate::message::{Message, Token};
use crate::registry::ProxyTask;
use std::cell::Cell;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Single-threaded deferred-execution engine consumed by the handler facade.
///
/// Times are loop uptime: a monotonic `Duration` since the loop was created.
pub trait Scheduler: Send + Sync {
    fn uptime(&self) -> Duration;

    /// Queues `envelope` to run as soon as possible, after already-due work.
    fn submit(&self, envelope: Envelope) -> bool {
        self.submit_at_time(envelope, self.uptime())
    }

    fn submit_at_time(&self, envelope: Envelope, when: Duration) -> bool;

    /// Queues `envelope` ahead of everything currently queued.
    fn submit_at_front(&self, envelope: Envelope) -> bool;

    /// Drops queued callbacks of `target` that carry exactly `proxy`.
    fn cancel_by_identity(
        &self,
        target: &Arc<CallbackBinding>,
        proxy: &Arc<ProxyTask>,
        token: Option<&Token>,
    );

    /// Drops queued messages of `target` with id `what`.
    fn cancel_messages(&self, target: &Arc<CallbackBinding>, what: i32, token: Option<&Token>);

    /// Drops every queued callback and message of `target` scoped by `token`.
    fn cancel_all(&self, target: &Arc<CallbackBinding>, token: Option<&Token>);

    fn has_pending(&self, target: &Arc<CallbackBinding>, what: i32, token: Option<&Token>)
        -> bool;

    fn loop_handle(&self) -> LoopHandle;
}

/// What an envelope carries to the loop thread.
pub enum Payload {
    Callback(Arc<ProxyTask>),
    Message(Message),
}

/// One queued unit: a payload plus the binding it belongs to.
pub struct Envelope {
    target: Arc<CallbackBinding>,
    payload: Payload,
}

impl Envelope {
    pub fn callback(target: Arc<CallbackBinding>, proxy: Arc<ProxyTask>) -> Self {
        Self {
            target,
            payload: Payload::Callback(proxy),
        }
    }

    pub fn message(target: Arc<CallbackBinding>, message: Message) -> Self {
        Self {
            target,
            payload: Payload::Message(message),
        }
    }

    pub fn target(&self) -> &Arc<CallbackBinding> {
        &self.target
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Posting token for callbacks, `obj` for messages.
    pub fn token(&self) -> Option<&Token> {
        match &self.payload {
            Payload::Callback(proxy) => proxy.token(),
            Payload::Message(message) => message.obj.as_ref(),
        }
    }

    pub fn is_for(&self, target: &Arc<CallbackBinding>) -> bool {
        Arc::ptr_eq(&self.target, target)
    }

    fn token_matches(&self, token: Option<&Token>) -> bool {
        token.map_or(true, |wanted| self.token() == Some(wanted))
    }

    pub fn matches_callback(
        &self,
        target: &Arc<CallbackBinding>,
        proxy: &Arc<ProxyTask>,
        token: Option<&Token>,
    ) -> bool {
        match &self.payload {
            Payload::Callback(queued) => {
                self.is_for(target) && Arc::ptr_eq(queued, proxy) && self.token_matches(token)
            }
            Payload::Message(_) => false,
        }
    }

    pub fn matches_message(
        &self,
        target: &Arc<CallbackBinding>,
        what: i32,
        token: Option<&Token>,
    ) -> bool {
        match &self.payload {
            Payload::Message(message) => {
                self.is_for(target) && message.what == what && self.token_matches(token)
            }
            Payload::Callback(_) => false,
        }
    }

    pub fn matches_target(&self, target: &Arc<CallbackBinding>, token: Option<&Token>) -> bool {
        self.is_for(target) && self.token_matches(token)
    }

    /// Runs the payload on the calling (loop) thread.
    pub fn deliver(self) {
        match self.payload {
            Payload::Callback(proxy) => {
                proxy.fire();
            }
            Payload::Message(message) => {
                self.target.dispatch(&message);
            }
        }
    }
}

impl Debug for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Envelope");
        match &self.payload {
            Payload::Callback(proxy) => out.field("callback", proxy),
            Payload::Message(message) => out.field("message", message),
        };
        out.finish()
    }
}

thread_local! {
    static CURRENT_LOOP_ID: Cell<Option<Uuid>> = const { Cell::new(None) };
}

/// Identity of one loop.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    id: Uuid,
    name: Arc<str>,
}

impl LoopHandle {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: Arc::from(name),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when called from inside this loop's delivery.
    pub fn is_current(&self) -> bool {
        CURRENT_LOOP_ID.with(|current| current.get() == Some(self.id))
    }

    /// Marks the current thread as running this loop until the guard drops.
    pub(crate) fn enter(&self) -> LoopEntered {
        let previous = CURRENT_LOOP_ID.with(|current| current.replace(Some(self.id)));
        LoopEntered { previous }
    }
}

impl PartialEq for LoopHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LoopHandle {}

pub(crate) struct LoopEntered {
    previous: Option<Uuid>,
}

impl Drop for LoopEntered {
    fn drop(&mut self) {
        CURRENT_LOOP_ID.with(|current| current.set(self.previous));
    }
}
