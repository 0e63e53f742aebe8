//! Caller-supplied units of deferred work.
//!
//! # Invariants
//! - Tasks are compared by allocation identity, never by value.

use std::sync::Arc;

/// One unit of work that a loop runs later on its own thread.
pub trait Task: Send + Sync {
    fn run(&self);
}

impl<F> Task for F
where
    F: Fn() + Send + Sync,
{
    fn run(&self) {
        self()
    }
}

/// Shared handle to a posted task. The caller keeps one to cancel by identity.
pub type TaskRef = Arc<dyn Task>;

/// Wraps a closure into a [`TaskRef`].
pub fn task<F>(f: F) -> TaskRef
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Returns true when both handles point at the same task allocation.
///
/// Only the data pointer is compared; vtable pointers for the same type may
/// differ between codegen units.
pub fn same_task(left: &TaskRef, right: &TaskRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}
