//! CLI smoke entry point.
//!
//! # Responsibility
//! - Wire a real loop thread through `weakpost_core` end to end.
//! - Show that a discarded owner's captured state is reclaimed while its
//!   delayed work is still queued.

use log::info;
use std::process::ExitCode;
use std::sync::{mpsc, Arc, Weak};
use std::time::Duration;
use weakpost_core::{
    init_logging, task, HandlerRef, LoggingConfig, Looper, LooperConfig, Message, WeakHandler,
};

const MSG_GREETING: i32 = 1;

/// Short-lived owner of a handler, standing in for a UI screen.
struct Screen {
    title: Arc<String>,
    handler: WeakHandler,
}

impl Screen {
    fn open(looper: &Looper, title: &str, greeted: mpsc::Sender<i32>) -> Self {
        let callback: HandlerRef = Arc::new(move |message: &Message| {
            let _ = greeted.send(message.what);
            message.what == MSG_GREETING
        });
        let screen = Self {
            title: Arc::new(title.to_string()),
            handler: WeakHandler::with_callback(Arc::new(looper.clone()), callback),
        };
        screen.handler.send_empty_message(MSG_GREETING);
        screen
    }

    /// The reminder captures part of the screen's state.
    fn schedule_reminder(&self, delay: Duration) -> bool {
        let title = Arc::clone(&self.title);
        let reminder = task(move || info!("event=reminder module=cli screen={title}"));
        self.handler.post_delayed(reminder, delay).unwrap_or(false)
    }
}

fn main() -> ExitCode {
    let log_config = LoggingConfig {
        level: std::env::var("WEAKPOST_LOG").unwrap_or_else(|_| "info".to_string()),
        log_dir: None,
    };
    if let Err(err) = init_logging(&log_config) {
        eprintln!("logging init failed: {err}");
        return ExitCode::FAILURE;
    }

    let looper = match Looper::spawn(&LooperConfig::named("weakpost-main")) {
        Ok(looper) => looper,
        Err(err) => {
            eprintln!("loop start failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let (greeted_tx, greeted_rx) = mpsc::channel();
    let screen = Screen::open(&looper, "settings", greeted_tx);
    let greeting = greeted_rx.recv_timeout(Duration::from_secs(5));
    println!("greeting delivered={}", greeting == Ok(MSG_GREETING));

    let accepted = screen.schedule_reminder(Duration::from_secs(60 * 60));
    println!("reminder scheduled={accepted}");

    let title_alive: Weak<String> = Arc::downgrade(&screen.title);
    drop(screen);
    println!("captured state reclaimed={}", title_alive.upgrade().is_none());

    looper.quit();
    looper.join();
    println!("weakpost_core version={}", weakpost_core::core_version());
    ExitCode::SUCCESS
}
