//! Weak-referencing deferred-task registry.
//!
//! # Responsibility
//! - Keep every pending task alive through exactly one owning node.
//! - Hand out proxies that reference tasks and nodes only weakly.
//! - Cancel by task identity, since only proxies ever reach the scheduler.
//!
//! # Invariants
//! - One lock guards every insert, scan and detach of the list.
//! - No user code runs while the lock is held; unlinked nodes are dropped
//!   after the guard is released.
//! - Dropping the registry drops every linked task, even while proxies are
//!   still queued in a scheduler.

mod list;
mod proxy;

pub use proxy::{FireOutcome, ProxyTask};

use crate::error::{HandlerError, HandlerResult};
use crate::message::Token;
use crate::task::{same_task, TaskRef};
use list::{NodeEntry, TaskList};
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) fn lock_list(list: &Mutex<TaskList>) -> MutexGuard<'_, TaskList> {
    // Mutations never unwind halfway, so a poisoned list is still consistent.
    list.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of all pending task nodes for one handler.
pub struct TaskRegistry {
    list: Arc<Mutex<TaskList>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            list: Arc::new(Mutex::new(TaskList::new())),
        }
    }

    /// Registers `task` and returns the proxy to submit in its place.
    ///
    /// # Errors
    /// - `InvalidArgument` when `task` is absent.
    pub fn insert(
        &self,
        task: Option<TaskRef>,
        token: Option<Token>,
    ) -> HandlerResult<Arc<ProxyTask>> {
        let task = task.ok_or(HandlerError::InvalidArgument("task"))?;
        let weak_list = Arc::downgrade(&self.list);

        let mut guard = lock_list(&self.list);
        let mut proxy = None;
        guard.insert_after_head(|key| {
            let created = Arc::new(ProxyTask::new(&task, weak_list, key, token));
            proxy = Some(Arc::clone(&created));
            NodeEntry {
                task,
                proxy: created,
            }
        });
        let pending = guard.len();
        drop(guard);

        debug!("event=task_insert module=registry status=ok pending={pending}");
        proxy.ok_or_else(|| {
            HandlerError::LinkInvariant("node inserted without a proxy".to_string())
        })
    }

    /// Unlinks the newest node whose task is `task` by identity.
    ///
    /// When `token` is given, only a node posted with that same token matches.
    /// Returns the node's proxy so the caller can cancel it in the scheduler.
    pub fn remove_by_identity(
        &self,
        task: &TaskRef,
        token: Option<&Token>,
    ) -> Option<Arc<ProxyTask>> {
        let removed = {
            let mut guard = lock_list(&self.list);
            let key = guard.find(|entry| {
                same_task(&entry.task, task)
                    && token.map_or(true, |wanted| entry.proxy.token() == Some(wanted))
            })?;
            guard.unlink(key)
        };
        let NodeEntry { task: _, proxy } = removed?;
        debug!("event=task_remove module=registry status=ok");
        Some(proxy)
    }

    /// Unlinks the node behind `proxy` without scanning.
    ///
    /// Returns false when the node is already gone or the proxy was issued
    /// by another registry.
    pub fn detach(&self, proxy: &ProxyTask) -> bool {
        if !proxy.belongs_to(&self.list) {
            return false;
        }
        let removed = lock_list(&self.list).unlink(proxy.key());
        removed.is_some()
    }

    /// Unlinks every node posted with `token` (all nodes for `None`).
    pub fn remove_by_token(&self, token: Option<&Token>) -> Vec<Arc<ProxyTask>> {
        let removed = lock_list(&self.list).unlink_by_token(token);
        if !removed.is_empty() {
            debug!(
                "event=task_remove_bulk module=registry status=ok removed={}",
                removed.len()
            );
        }
        removed.into_iter().map(|entry| entry.proxy).collect()
    }

    pub fn len(&self) -> usize {
        lock_list(&self.list).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending tasks in posting order, oldest first.
    pub fn snapshot(&self) -> Vec<TaskRef> {
        lock_list(&self.list).tasks_oldest_first()
    }

    /// Checks link structure and returns the number of linked nodes.
    pub fn validate(&self) -> HandlerResult<usize> {
        lock_list(&self.list)
            .validate()
            .map_err(HandlerError::LinkInvariant)
    }
}
