//! Weak callback binding between a loop and a message handler.
//!
//! # Responsibility
//! - Be the dispatch target that queued messages point at.
//! - Reach the caller's handler only through a weak reference.
//!
//! # Invariants
//! - Queued messages never extend the handler's lifetime.
//! - Dispatch to a collected handler is a silent no-op.

use crate::message::Message;
use log::debug;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

/// Capability implemented by whatever consumes messages.
pub trait MessageHandler: Send + Sync {
    /// Returns true when the message was handled.
    fn handle_message(&self, message: &Message) -> bool;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> bool + Send + Sync,
{
    fn handle_message(&self, message: &Message) -> bool {
        self(message)
    }
}

pub type HandlerRef = Arc<dyn MessageHandler>;

/// Dispatch adapter registered with a loop's message path.
pub struct CallbackBinding {
    handler: Option<Weak<dyn MessageHandler>>,
}

impl CallbackBinding {
    /// Binding with no handler; messages are accepted and dropped.
    pub fn detached() -> Self {
        Self { handler: None }
    }

    pub fn new(handler: &HandlerRef) -> Self {
        Self {
            handler: Some(Arc::downgrade(handler)),
        }
    }

    /// Forwards `message` to the handler if it is still alive.
    ///
    /// Returns `None` when there is no live handler to report a result.
    pub fn dispatch(&self, message: &Message) -> Option<bool> {
        match self.handler.as_ref()?.upgrade() {
            Some(handler) => Some(handler.handle_message(message)),
            None => {
                debug!(
                    "event=message_dispatch module=binding status=stale what={}",
                    message.what
                );
                None
            }
        }
    }

    pub fn is_bound(&self) -> bool {
        self.handler
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }
}

impl Debug for CallbackBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackBinding")
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{CallbackBinding, HandlerRef};
    use crate::message::Message;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_forwards_to_live_handler() {
        let seen = Arc::new(AtomicI32::new(0));
        let handler: HandlerRef = {
            let seen = Arc::clone(&seen);
            Arc::new(move |message: &Message| {
                seen.store(message.what, Ordering::SeqCst);
                true
            })
        };
        let binding = CallbackBinding::new(&handler);

        assert_eq!(binding.dispatch(&Message::new(4)), Some(true));
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn binding_does_not_keep_handler_alive() {
        let handler: HandlerRef = Arc::new(|_: &Message| true);
        let binding = CallbackBinding::new(&handler);
        assert!(binding.is_bound());

        drop(handler);
        assert!(!binding.is_bound());
        assert_eq!(binding.dispatch(&Message::new(1)), None);
    }

    #[test]
    fn detached_binding_drops_messages() {
        let binding = CallbackBinding::detached();
        assert_eq!(binding.dispatch(&Message::new(1)), None);
    }
}
