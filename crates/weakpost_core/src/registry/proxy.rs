//! Stand-in task handed to the scheduler in place of the caller's task.
//!
//! # Invariants
//! - A proxy never owns its task or its node; both references are weak.
//! - Firing detaches the node before the task runs.
//! - Firing a proxy whose node is gone is a silent no-op.

use crate::message::Token;
use crate::registry::list::{NodeKey, TaskList};
use crate::registry::lock_list;
use crate::task::{Task, TaskRef};
use log::debug;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, Weak};

/// Result of one proxy firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The node was still linked and the task ran.
    Ran,
    /// The node was already detached by a cancel; nothing ran.
    Cancelled,
    /// The owning registry or the task itself was already reclaimed.
    Stale,
}

pub struct ProxyTask {
    task: Weak<dyn Task>,
    list: Weak<Mutex<TaskList>>,
    key: NodeKey,
    token: Option<Token>,
}

impl ProxyTask {
    pub(crate) fn new(
        task: &TaskRef,
        list: Weak<Mutex<TaskList>>,
        key: NodeKey,
        token: Option<Token>,
    ) -> Self {
        Self {
            task: Arc::downgrade(task),
            list,
            key,
            token,
        }
    }

    /// Token this proxy was posted with, if any.
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub(crate) fn key(&self) -> NodeKey {
        self.key
    }

    pub(crate) fn belongs_to(&self, list: &Arc<Mutex<TaskList>>) -> bool {
        std::ptr::eq(self.list.as_ptr(), Arc::as_ptr(list))
    }

    /// Runs the original task if its node is still registered.
    ///
    /// Called by the scheduler on its own thread. The task reference is
    /// resolved first and held across the detach, since the node is the only
    /// strong owner and releasing it would otherwise reclaim the task.
    pub fn fire(&self) -> FireOutcome {
        let task = self.task.upgrade();

        let Some(list) = self.list.upgrade() else {
            debug!("event=proxy_fire module=proxy status=stale reason=registry_dropped");
            return FireOutcome::Stale;
        };
        let detached = {
            let mut guard = lock_list(&list);
            guard.unlink(self.key)
        };
        // Release list and node outside the lock; dropping them may run user Drop code.
        drop(list);
        let was_linked = detached.is_some();
        drop(detached);

        match task {
            Some(task) if was_linked => {
                task.run();
                FireOutcome::Ran
            }
            Some(_) => {
                debug!("event=proxy_fire module=proxy status=stale reason=cancelled");
                FireOutcome::Cancelled
            }
            None => {
                debug!("event=proxy_fire module=proxy status=stale reason=task_dropped");
                FireOutcome::Stale
            }
        }
    }
}

impl Debug for ProxyTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyTask")
            .field("key", &self.key)
            .field("task_alive", &(self.task.strong_count() > 0))
            .field("has_token", &self.token.is_some())
            .finish()
    }
}
