//! Leak-safe deferred work on single-threaded loops.
//!
//! A [`WeakHandler`] posts tasks and messages to a [`Scheduler`] without
//! letting the scheduler's queue own the caller's object graph: tasks are
//! owned by the handler's [`TaskRegistry`] and reached from the queue only
//! through weak proxies; messages reach their handler through a weak binding.

pub mod binding;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod message;
pub mod registry;
pub mod scheduler;
pub mod task;

pub use binding::{CallbackBinding, HandlerRef, MessageHandler};
pub use config::{ConfigError, LoggingConfig, LooperConfig};
pub use error::{HandlerError, HandlerResult};
pub use handler::WeakHandler;
pub use logging::{default_log_level, init_logging, logging_status, LogSink};
pub use message::{Message, Token};
pub use registry::{FireOutcome, ProxyTask, TaskRegistry};
pub use scheduler::{
    Envelope, LoopHandle, Looper, LooperError, ManualScheduler, MessageQueue, Payload, Scheduler,
};
pub use task::{same_task, task, Task, TaskRef};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
