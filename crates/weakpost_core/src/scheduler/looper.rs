//! Thread-backed loop.
//!
//! # Responsibility
//! - Own one dedicated thread that delivers envelopes in time order.
//! - Reject submissions once the loop has quit, lost its last handle, or
//!   unwound out of a panicking task.
//!
//! # Invariants
//! - Envelopes are delivered outside the state lock.
//! - Removed or abandoned envelopes are dropped outside the state lock.

use super::{Envelope, LoopHandle, MessageQueue, Scheduler};
use crate::binding::CallbackBinding;
use crate::config::{ConfigError, LooperConfig};
use crate::message::Token;
use crate::registry::ProxyTask;
use log::{info, warn};
use std::cell::RefCell;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

thread_local! {
    static CURRENT_LOOPER: RefCell<Option<Weak<LoopOwner>>> = const { RefCell::new(None) };
}

#[derive(Debug)]
pub enum LooperError {
    InvalidConfig(ConfigError),
    Spawn(std::io::Error),
}

impl Display for LooperError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(err) => write!(f, "invalid loop config: {err}"),
            Self::Spawn(err) => write!(f, "failed to spawn loop thread: {err}"),
        }
    }
}

impl Error for LooperError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidConfig(err) => Some(err),
            Self::Spawn(err) => Some(err),
        }
    }
}

impl From<ConfigError> for LooperError {
    fn from(value: ConfigError) -> Self {
        Self::InvalidConfig(value)
    }
}

struct LoopState {
    queue: MessageQueue,
    quitting: bool,
}

struct LoopShared {
    state: Mutex<LoopState>,
    wake: Condvar,
    started: Instant,
    handle: LoopHandle,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LoopShared {
    /// Marks the loop as quitting and discards its queue. Idempotent.
    fn shut_down(&self, reason: &str) {
        let abandoned = {
            let mut state = lock(&self.state);
            if state.quitting {
                return;
            }
            state.quitting = true;
            state.queue.clear()
        };
        self.wake.notify_all();
        info!(
            "event=loop_quit module=looper status=ok name={} reason={reason} abandoned={}",
            self.handle.name(),
            abandoned.len()
        );
        drop(abandoned);
    }

    fn run(self: Arc<Self>, owner: Weak<LoopOwner>) {
        CURRENT_LOOPER.with(|current| *current.borrow_mut() = Some(owner));
        let _entered = self.handle.enter();
        let _exit = LoopExit { shared: &self };

        while let Some(envelope) = self.next_envelope() {
            envelope.deliver();
        }
    }

    /// Blocks until an envelope is due or the loop quits.
    fn next_envelope(&self) -> Option<Envelope> {
        let mut state = lock(&self.state);
        loop {
            if state.quitting {
                return None;
            }
            let now = self.started.elapsed();
            if let Some((_, envelope)) = state.queue.pop_due(now) {
                return Some(envelope);
            }
            state = match state.queue.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_sub(now);
                    self.wake
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.wake.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn enqueue(&self, push: impl FnOnce(&mut MessageQueue)) -> bool {
        {
            let mut state = lock(&self.state);
            if state.quitting {
                drop(state);
                warn!(
                    "event=submit module=looper status=rejected name={} reason=loop_quit",
                    self.handle.name()
                );
                return false;
            }
            push(&mut state.queue);
        }
        self.wake.notify_one();
        true
    }

    fn remove_where(&self, predicate: impl FnMut(&Envelope) -> bool) {
        let removed = lock(&self.state).queue.drain_where(predicate);
        if !removed.is_empty() {
            self.wake.notify_one();
        }
    }
}

/// Runs when the loop thread leaves `run`, including by unwinding out of a task.
struct LoopExit<'a> {
    shared: &'a LoopShared,
}

impl Drop for LoopExit<'_> {
    fn drop(&mut self) {
        let reason = if std::thread::panicking() {
            "task_panicked"
        } else {
            "stopped"
        };
        self.shared.shut_down(reason);
        CURRENT_LOOPER.with(|current| current.borrow_mut().take());
    }
}

/// Shared by every caller-side `Looper` clone; the loop thread only holds it weakly.
struct LoopOwner {
    shared: Arc<LoopShared>,
}

impl Drop for LoopOwner {
    fn drop(&mut self) {
        self.shared.shut_down("handles_dropped");
    }
}

/// Cloneable handle to a running loop thread.
///
/// The loop quits on [`Looper::quit`] or once the last clone is dropped,
/// whichever comes first. A task that panics also stops the loop; later
/// submissions are rejected.
#[derive(Clone)]
pub struct Looper {
    owner: Arc<LoopOwner>,
}

impl Looper {
    /// Validates `config` and starts the loop thread.
    pub fn spawn(config: &LooperConfig) -> Result<Self, LooperError> {
        config.validate()?;
        let shared = Arc::new(LoopShared {
            state: Mutex::new(LoopState {
                queue: MessageQueue::new(),
                quitting: false,
            }),
            wake: Condvar::new(),
            started: Instant::now(),
            handle: LoopHandle::new(&config.name),
            thread: Mutex::new(None),
        });
        let looper = Self {
            owner: Arc::new(LoopOwner {
                shared: Arc::clone(&shared),
            }),
        };

        let mut builder = std::thread::Builder::new().name(config.name.clone());
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }
        let owner = Arc::downgrade(&looper.owner);
        let worker = Arc::clone(&shared);
        let join = builder
            .spawn(move || worker.run(owner))
            .map_err(LooperError::Spawn)?;
        *lock(&shared.thread) = Some(join);

        info!(
            "event=loop_start module=looper status=ok name={}",
            config.name
        );
        Ok(looper)
    }

    /// Loop owning the calling thread, if any.
    pub fn current() -> Option<Self> {
        CURRENT_LOOPER.with(|current| {
            let owner = current.borrow().as_ref()?.upgrade()?;
            Some(Self { owner })
        })
    }

    fn shared(&self) -> &LoopShared {
        &self.owner.shared
    }

    pub fn handle(&self) -> &LoopHandle {
        &self.shared().handle
    }

    /// Stops the loop. Queued envelopes are discarded and later submissions rejected.
    pub fn quit(&self) {
        self.shared().shut_down("quit");
    }

    /// Waits for the loop thread to exit. No-op on the loop thread itself.
    pub fn join(&self) {
        if self.shared().handle.is_current() {
            return;
        }
        let join = lock(&self.shared().thread).take();
        if let Some(join) = join {
            if join.join().is_err() {
                warn!(
                    "event=loop_join module=looper status=error name={} error=thread_panicked",
                    self.shared().handle.name()
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !lock(&self.shared().state).quitting
    }
}

impl Debug for Looper {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Looper")
            .field("handle", self.handle())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler for Looper {
    fn uptime(&self) -> Duration {
        self.shared().started.elapsed()
    }

    fn submit_at_time(&self, envelope: Envelope, when: Duration) -> bool {
        self.shared().enqueue(|queue| queue.push_at(envelope, when))
    }

    fn submit_at_front(&self, envelope: Envelope) -> bool {
        self.shared().enqueue(|queue| queue.push_front(envelope))
    }

    fn cancel_by_identity(
        &self,
        target: &Arc<CallbackBinding>,
        proxy: &Arc<ProxyTask>,
        token: Option<&Token>,
    ) {
        self.shared().remove_where(|envelope| envelope.matches_callback(target, proxy, token));
    }

    fn cancel_messages(&self, target: &Arc<CallbackBinding>, what: i32, token: Option<&Token>) {
        self.shared().remove_where(|envelope| envelope.matches_message(target, what, token));
    }

    fn cancel_all(&self, target: &Arc<CallbackBinding>, token: Option<&Token>) {
        self.shared().remove_where(|envelope| envelope.matches_target(target, token));
    }

    fn has_pending(
        &self,
        target: &Arc<CallbackBinding>,
        what: i32,
        token: Option<&Token>,
    ) -> bool {
        lock(&self.shared().state)
            .queue
            .any(|envelope| envelope.matches_message(target, what, token))
    }

    fn loop_handle(&self) -> LoopHandle {
        self.shared().handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{lock, Looper};
    use crate::binding::CallbackBinding;
    use crate::config::LooperConfig;
    use crate::registry::TaskRegistry;
    use crate::scheduler::{Envelope, Scheduler};
    use crate::task::task;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn delivers_on_its_own_thread_and_rejects_after_quit() {
        let looper = Looper::spawn(&LooperConfig::named("looper-test")).expect("loop should spawn");
        let registry = TaskRegistry::new();
        let target = Arc::new(CallbackBinding::detached());
        let (tx, rx) = mpsc::channel();

        let handle = looper.loop_handle();
        let work = task(move || {
            let name = std::thread::current().name().map(str::to_string);
            let _ = tx.send((name, handle.is_current()));
        });
        let proxy = registry
            .insert(Some(work), None)
            .expect("insert should succeed");
        assert!(looper.submit(Envelope::callback(Arc::clone(&target), proxy)));

        let (name, on_loop) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("task should run on the loop");
        assert_eq!(name.as_deref(), Some("looper-test"));
        assert!(on_loop);

        looper.quit();
        looper.join();
        let late = registry
            .insert(Some(task(|| {})), None)
            .expect("insert should succeed");
        assert!(!looper.submit(Envelope::callback(target, late)));
    }

    #[test]
    fn dropping_last_handle_stops_the_thread() {
        let looper = Looper::spawn(&LooperConfig::named("owner-drop")).expect("loop should spawn");
        let shared = Arc::clone(&looper.owner.shared);
        let second = looper.clone();

        drop(looper);
        assert!(second.is_running());

        drop(second);
        assert!(lock(&shared.state).quitting);
        let join = lock(&shared.thread)
            .take()
            .expect("join handle should be stored at spawn");
        join.join().expect("loop thread should exit cleanly");
    }
}
