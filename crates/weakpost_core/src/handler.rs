//! Leak-safe handler facade over a deferred scheduler.
//!
//! # Responsibility
//! - Route every posted task through the owning registry and a proxy.
//! - Route every message through a weak callback binding.
//! - Mirror the scheduler's post/send/remove surface.
//!
//! # Invariants
//! - The scheduler only ever sees proxies and the binding, never caller tasks
//!   or the caller's message handler.
//! - Registry removal is authoritative for cancel; the scheduler cancel is
//!   best-effort cleanup of the queued proxy.
//! - Dropping the handler reclaims all pending tasks and the handler callback.

use crate::binding::{CallbackBinding, HandlerRef};
use crate::error::{HandlerError, HandlerResult};
use crate::message::{Message, Token};
use crate::registry::TaskRegistry;
use crate::scheduler::{Envelope, LoopHandle, Looper, Scheduler};
use crate::task::TaskRef;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// How a proxy is placed in the scheduler's queue.
enum Timing {
    Now,
    At(Duration),
    Front,
}

pub struct WeakHandler {
    // Strong owner of the handler the binding only references weakly.
    callback: Option<HandlerRef>,
    binding: Arc<CallbackBinding>,
    registry: TaskRegistry,
    scheduler: Arc<dyn Scheduler>,
}

impl WeakHandler {
    /// Handler without a message callback; messages are delivered to nothing.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            callback: None,
            binding: Arc::new(CallbackBinding::detached()),
            registry: TaskRegistry::new(),
            scheduler,
        }
    }

    /// Handler whose messages are dispatched to `callback` while this handler lives.
    pub fn with_callback(scheduler: Arc<dyn Scheduler>, callback: HandlerRef) -> Self {
        Self {
            binding: Arc::new(CallbackBinding::new(&callback)),
            callback: Some(callback),
            registry: TaskRegistry::new(),
            scheduler,
        }
    }

    /// Handler bound to the loop running the calling thread.
    ///
    /// # Errors
    /// - `NoCurrentLoop` when the calling thread is not a loop thread.
    pub fn for_current_loop() -> HandlerResult<Self> {
        let looper = Looper::current().ok_or(HandlerError::NoCurrentLoop)?;
        Ok(Self::new(Arc::new(looper)))
    }

    /// Like [`WeakHandler::for_current_loop`] with a message callback.
    ///
    /// # Errors
    /// - `NoCurrentLoop` when the calling thread is not a loop thread.
    pub fn for_current_loop_with_callback(callback: HandlerRef) -> HandlerResult<Self> {
        let looper = Looper::current().ok_or(HandlerError::NoCurrentLoop)?;
        Ok(Self::with_callback(Arc::new(looper), callback))
    }

    /// Registry backing this handler, for inspection.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    fn post_with(
        &self,
        task: Option<TaskRef>,
        token: Option<Token>,
        timing: Timing,
    ) -> HandlerResult<bool> {
        let proxy = self.registry.insert(task, token)?;
        let envelope = Envelope::callback(Arc::clone(&self.binding), Arc::clone(&proxy));
        let accepted = match timing {
            Timing::Now => self.scheduler.submit(envelope),
            Timing::At(when) => self.scheduler.submit_at_time(envelope, when),
            Timing::Front => self.scheduler.submit_at_front(envelope),
        };
        if !accepted {
            // Nothing is queued, so the node would never be fired or cancelled.
            self.registry.detach(&proxy);
            warn!("event=task_post module=handler status=rejected");
        } else {
            debug!("event=task_post module=handler status=ok");
        }
        Ok(accepted)
    }

    /// Posts `task` to run as soon as the loop reaches it.
    ///
    /// Returns `Ok(false)` when the scheduler rejected the submission.
    ///
    /// # Errors
    /// - `InvalidArgument` when `task` is absent.
    pub fn post(&self, task: impl Into<Option<TaskRef>>) -> HandlerResult<bool> {
        self.post_with(task.into(), None, Timing::Now)
    }

    /// Posts `task` to run at loop uptime `when`.
    pub fn post_at_time(
        &self,
        task: impl Into<Option<TaskRef>>,
        when: Duration,
    ) -> HandlerResult<bool> {
        self.post_with(task.into(), None, Timing::At(when))
    }

    /// Posts `task` at `when`, tagged with `token` for scoped removal.
    pub fn post_at_time_with_token(
        &self,
        task: impl Into<Option<TaskRef>>,
        token: Token,
        when: Duration,
    ) -> HandlerResult<bool> {
        self.post_with(task.into(), Some(token), Timing::At(when))
    }

    pub fn post_delayed(
        &self,
        task: impl Into<Option<TaskRef>>,
        delay: Duration,
    ) -> HandlerResult<bool> {
        let when = self.scheduler.uptime().saturating_add(delay);
        self.post_with(task.into(), None, Timing::At(when))
    }

    /// Posts `task` ahead of everything already queued.
    pub fn post_at_front(&self, task: impl Into<Option<TaskRef>>) -> HandlerResult<bool> {
        self.post_with(task.into(), None, Timing::Front)
    }

    /// Cancels the pending post of exactly this task instance.
    ///
    /// No-op when the task already fired or was never posted here. A proxy
    /// already executing on the loop thread is not interrupted.
    pub fn cancel(&self, task: &TaskRef) {
        if let Some(proxy) = self.registry.remove_by_identity(task, None) {
            self.scheduler.cancel_by_identity(&self.binding, &proxy, None);
        }
    }

    /// Cancels the pending post of this task instance made with `token`.
    pub fn cancel_with_token(&self, task: &TaskRef, token: &Token) {
        if let Some(proxy) = self.registry.remove_by_identity(task, Some(token)) {
            self.scheduler.cancel_by_identity(&self.binding, &proxy, Some(token));
        }
    }

    /// Drops every pending task and message of this handler scoped by `token`
    /// (`None` drops all of them).
    pub fn remove_all(&self, token: Option<&Token>) {
        let removed = self.registry.remove_by_token(token);
        self.scheduler.cancel_all(&self.binding, token);
        debug!(
            "event=remove_all module=handler status=ok tasks={}",
            removed.len()
        );
    }

    fn send_with(&self, message: Message, timing: Timing) -> bool {
        let envelope = Envelope::message(Arc::clone(&self.binding), message);
        match timing {
            Timing::Now => self.scheduler.submit(envelope),
            Timing::At(when) => self.scheduler.submit_at_time(envelope, when),
            Timing::Front => self.scheduler.submit_at_front(envelope),
        }
    }

    pub fn send_message(&self, message: Message) -> bool {
        self.send_with(message, Timing::Now)
    }

    pub fn send_empty_message(&self, what: i32) -> bool {
        self.send_message(Message::new(what))
    }

    pub fn send_empty_message_delayed(&self, what: i32, delay: Duration) -> bool {
        self.send_message_delayed(Message::new(what), delay)
    }

    pub fn send_empty_message_at_time(&self, what: i32, when: Duration) -> bool {
        self.send_message_at_time(Message::new(what), when)
    }

    pub fn send_message_delayed(&self, message: Message, delay: Duration) -> bool {
        let when = self.scheduler.uptime().saturating_add(delay);
        self.send_with(message, Timing::At(when))
    }

    pub fn send_message_at_time(&self, message: Message, when: Duration) -> bool {
        self.send_with(message, Timing::At(when))
    }

    pub fn send_message_at_front(&self, message: Message) -> bool {
        self.send_with(message, Timing::Front)
    }

    pub fn remove_messages(&self, what: i32) {
        self.scheduler.cancel_messages(&self.binding, what, None);
    }

    pub fn remove_messages_with_object(&self, what: i32, obj: &Token) {
        self.scheduler.cancel_messages(&self.binding, what, Some(obj));
    }

    pub fn has_messages(&self, what: i32) -> bool {
        self.scheduler.has_pending(&self.binding, what, None)
    }

    pub fn has_messages_with_object(&self, what: i32, obj: &Token) -> bool {
        self.scheduler.has_pending(&self.binding, what, Some(obj))
    }

    /// Loop this handler posts to.
    pub fn current_loop(&self) -> LoopHandle {
        self.scheduler.loop_handle()
    }
}
