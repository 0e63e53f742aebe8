use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use weakpost_core::{
    task, FireOutcome, Looper, LooperConfig, ManualScheduler, Task, TaskRef, TaskRegistry,
    WeakHandler,
};

/// Task with value equality; two instances can be equal yet distinct.
#[derive(PartialEq)]
struct Reminder {
    label: &'static str,
    #[allow(dead_code)]
    minutes: u32,
}

struct CountedReminder {
    reminder: Reminder,
    hits: Arc<AtomicUsize>,
}

impl Task for CountedReminder {
    fn run(&self) {
        assert!(!self.reminder.label.is_empty());
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn inserts_then_removals_in_any_order_leave_registry_empty() {
    let registry = TaskRegistry::new();
    let tasks: Vec<TaskRef> = (0..8).map(|_| task(|| {})).collect();
    for work in &tasks {
        registry
            .insert(Some(Arc::clone(work)), None)
            .expect("insert should succeed");
    }
    assert_eq!(registry.validate(), Ok(8));

    for index in [3, 0, 7, 5, 1, 6, 2, 4] {
        assert!(registry.remove_by_identity(&tasks[index], None).is_some());
        registry.validate().expect("links stay consistent");
    }
    assert!(registry.is_empty());
    assert!(registry.snapshot().is_empty());
}

#[test]
fn equal_values_with_distinct_identity_cancel_independently() {
    let scheduler = Arc::new(ManualScheduler::new());
    let handler = WeakHandler::new(scheduler.clone());
    let first_hits = Arc::new(AtomicUsize::new(0));
    let second_hits = Arc::new(AtomicUsize::new(0));

    let first = CountedReminder {
        reminder: Reminder {
            label: "stand-up",
            minutes: 5,
        },
        hits: Arc::clone(&first_hits),
    };
    let second = CountedReminder {
        reminder: Reminder {
            label: "stand-up",
            minutes: 5,
        },
        hits: Arc::clone(&second_hits),
    };
    assert!(first.reminder == second.reminder);

    let first: TaskRef = Arc::new(first);
    let second: TaskRef = Arc::new(second);
    handler.post(Arc::clone(&first)).expect("post should not error");
    handler.post(Arc::clone(&second)).expect("post should not error");

    handler.cancel(&first);
    assert_eq!(handler.registry().len(), 1);
    scheduler.run_due();

    assert_eq!(first_hits.load(Ordering::SeqCst), 0);
    assert_eq!(second_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn proxy_of_dropped_registry_fires_as_noop() {
    let hits = Arc::new(AtomicUsize::new(0));
    let registry = TaskRegistry::new();
    let proxy = {
        let hits = Arc::clone(&hits);
        registry
            .insert(
                Some(task(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                })),
                None,
            )
            .expect("insert should succeed")
    };

    drop(registry);
    assert_eq!(proxy.fire(), FireOutcome::Stale);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn dropping_registry_releases_tasks_held_only_by_nodes() {
    let registry = TaskRegistry::new();
    let work = task(|| {});
    let alive = Arc::downgrade(&work);
    let _proxy = registry
        .insert(Some(work), None)
        .expect("insert should succeed");

    assert!(alive.upgrade().is_some());
    drop(registry);
    assert!(alive.upgrade().is_none());
}

#[test]
fn concurrent_insert_and_remove_keep_links_consistent() {
    const POSTERS: usize = 4;
    const CANCELLERS: usize = 3;
    const PER_POSTER: usize = 200;

    let registry = Arc::new(TaskRegistry::new());
    let posted: Arc<Mutex<Vec<TaskRef>>> = Arc::new(Mutex::new(Vec::new()));
    let removed = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for _ in 0..POSTERS {
        let registry = Arc::clone(&registry);
        let posted = Arc::clone(&posted);
        workers.push(thread::spawn(move || {
            for _ in 0..PER_POSTER {
                let work = task(|| {});
                registry
                    .insert(Some(Arc::clone(&work)), None)
                    .expect("insert should succeed");
                posted.lock().expect("posted lock").push(work);
            }
        }));
    }
    for canceller in 0..CANCELLERS {
        let registry = Arc::clone(&registry);
        let posted = Arc::clone(&posted);
        let removed = Arc::clone(&removed);
        workers.push(thread::spawn(move || {
            for round in 0..PER_POSTER {
                let candidate = {
                    let posted = posted.lock().expect("posted lock");
                    let index = (round * 7 + canceller * 13) % posted.len().max(1);
                    posted.get(index).cloned()
                };
                if let Some(work) = candidate {
                    if registry.remove_by_identity(&work, None).is_some() {
                        removed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }));
    }
    for worker in workers {
        worker.join().expect("worker should not panic");
    }

    let linked = registry.validate().expect("links stay consistent");
    assert_eq!(linked, POSTERS * PER_POSTER - removed.load(Ordering::SeqCst));
    assert_eq!(registry.snapshot().len(), linked);
}

#[test]
fn concurrent_post_and_cancel_through_handler_match_scheduler_queue() {
    let scheduler = Arc::new(ManualScheduler::new());
    let handler = Arc::new(WeakHandler::new(scheduler.clone()));
    let hits = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let handler = Arc::clone(&handler);
            let hits = Arc::clone(&hits);
            thread::spawn(move || {
                for round in 0..100 {
                    let hits = Arc::clone(&hits);
                    let work = task(move || {
                        hits.fetch_add(1, Ordering::SeqCst);
                    });
                    handler
                        .post_delayed(Arc::clone(&work), Duration::from_millis(10))
                        .expect("post should not error");
                    if (round + worker) % 2 == 0 {
                        handler.cancel(&work);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker should not panic");
    }

    let linked = handler.registry().validate().expect("links stay consistent");
    assert_eq!(linked, 200);
    assert_eq!(scheduler.pending_len(), linked);

    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(hits.load(Ordering::SeqCst), 200);
    assert!(handler.registry().is_empty());
}

#[test]
fn loop_firing_races_concurrent_cancels_without_double_runs() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 150;

    let looper = Looper::spawn(&LooperConfig::named("race-loop")).expect("loop should spawn");
    let handler = Arc::new(WeakHandler::new(Arc::new(looper.clone())));

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                let mut outcomes = Vec::with_capacity(PER_THREAD);
                for round in 0..PER_THREAD {
                    let hits = Arc::new(AtomicUsize::new(0));
                    let work = {
                        let hits = Arc::clone(&hits);
                        task(move || {
                            hits.fetch_add(1, Ordering::SeqCst);
                        })
                    };
                    let delay = Duration::from_micros(((round * 37 + worker * 11) % 500) as u64);
                    let accepted = handler
                        .post_delayed(Arc::clone(&work), delay)
                        .expect("post should not error");
                    assert!(accepted);
                    let cancelled = (round + worker) % 2 == 0;
                    if cancelled {
                        if round % 3 == 0 {
                            thread::yield_now();
                        }
                        handler.cancel(&work);
                    }
                    outcomes.push((cancelled, hits));
                }
                outcomes
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for worker in workers {
        outcomes.extend(worker.join().expect("worker should not panic"));
    }

    // Due after every racing post, so all surviving posts have fired first.
    let (done_tx, done_rx) = mpsc::channel();
    handler
        .post_delayed(
            task(move || {
                let _ = done_tx.send(());
            }),
            Duration::from_millis(50),
        )
        .expect("post should not error");
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("final task should run");

    for (cancelled, hits) in &outcomes {
        let runs = hits.load(Ordering::SeqCst);
        if *cancelled {
            assert!(runs <= 1, "cancelled task ran {runs} times");
        } else {
            assert_eq!(runs, 1);
        }
    }
    assert_eq!(handler.registry().validate(), Ok(0));

    looper.quit();
    looper.join();
}
