// src/core/monitor/watcher.rs

//! The process-wide background task that periodically re-checks every
//! registered monitor. Started by the registry on first monitor creation,
//! runs at most once per process, and exits only on shutdown.

use super::registry;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

const WATCH_INTERVAL: Duration = Duration::from_secs(10);

static STARTED: AtomicBool = AtomicBool::new(false);
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

lazy_static! {
    static ref START_LOCK: Mutex<()> = Mutex::new(());
}

/// Starts the watcher if it is not already running. Idempotent. Must be
/// called from within a tokio runtime.
pub(crate) fn safe_go() {
    // check outside of lock for speed
    if STARTED.load(Ordering::Acquire) {
        return;
    }

    let _lk = START_LOCK.lock();
    if STARTED.load(Ordering::Acquire) {
        return;
    }
    STARTED.store(true, Ordering::Release);

    tokio::spawn(run());
}

async fn run() {
    info!("replica set monitor watcher starting");
    while !in_shutdown() {
        tokio::time::sleep(WATCH_INTERVAL).await;
        registry::check_all(true).await;
    }
    info!("replica set monitor watcher exiting");
}

/// True once the watcher task has been spawned.
pub fn started() -> bool {
    STARTED.load(Ordering::Acquire)
}

/// Tells the watcher to exit after its current sleep.
pub fn begin_shutdown() {
    SHUTDOWN.store(true, Ordering::Release);
}

pub fn in_shutdown() -> bool {
    SHUTDOWN.load(Ordering::Acquire)
}
