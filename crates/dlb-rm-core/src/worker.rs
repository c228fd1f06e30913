//! Deferred completion worker.
//!
//! Map and unmap requests that cannot complete while traffic is in flight
//! leave their slots in progress and schedule this worker. One thread per
//! device waits to be scheduled, then runs completion passes under the
//! device lock until a pass finds nothing pending, sleeping between passes so
//! other lock holders get in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::device::Shared;
use crate::error::Result;

/// Scheduling state shared between the manager and the worker thread.
#[derive(Debug, Default)]
pub(crate) struct WorkerSignal {
    scheduled: AtomicBool,
    active: AtomicBool,
    shutdown: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl WorkerSignal {
    /// Ask the worker to run. Idempotent; returns whether this call did the
    /// scheduling.
    pub(crate) fn schedule(&self) -> bool {
        let newly = !self.scheduled.swap(true, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.cond.notify_one();
        newly
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Whether the worker is running a pass or has one queued.
    pub(crate) fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst) || self.is_scheduled()
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Block until scheduled. Returns false once shut down.
    fn wait_scheduled(&self) -> bool {
        let mut guard = self.lock.lock();
        while !self.is_scheduled() && !self.is_shutdown() {
            self.cond.wait(&mut guard);
        }
        !self.is_shutdown()
    }

    /// Poll until the worker goes idle or `timeout` passes. Returns whether
    /// it went idle.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

/// Start the worker thread of a device.
pub(crate) fn spawn(shared: Arc<Shared>, backoff: Duration) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("dlb-rm-worker".to_string())
        .spawn(move || run(&shared, backoff))?;
    Ok(handle)
}

fn run(shared: &Shared, backoff: Duration) {
    let signal = &shared.signal;
    while signal.wait_scheduled() {
        signal.active.store(true, Ordering::SeqCst);
        loop {
            signal.scheduled.store(false, Ordering::SeqCst);
            let remaining = shared.manager.lock().finish_pending_work();
            match remaining {
                Ok(0) if !signal.is_scheduled() => break,
                Ok(remaining) => {
                    tracing::trace!(remaining, "pending map/unmap work remains");
                }
                Err(e) => {
                    tracing::error!(error = %e, "worker pass failed");
                    break;
                }
            }
            if signal.is_shutdown() {
                break;
            }
            std::thread::sleep(backoff);
        }
        signal.active.store(false, Ordering::SeqCst);
    }
    tracing::debug!("worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_idempotent() {
        let signal = WorkerSignal::default();
        assert!(!signal.is_busy());
        assert!(signal.schedule());
        assert!(!signal.schedule());
        assert!(signal.is_scheduled());
        assert!(signal.is_busy());
    }

    #[test]
    fn test_wait_scheduled_returns_false_on_shutdown() {
        let signal = Arc::new(WorkerSignal::default());
        let waiter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || signal.wait_scheduled())
        };
        std::thread::sleep(Duration::from_millis(10));
        signal.shutdown();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_wait_idle_times_out_while_scheduled() {
        let signal = WorkerSignal::default();
        assert!(signal.wait_idle(Duration::from_millis(1)));
        signal.schedule();
        assert!(!signal.wait_idle(Duration::from_millis(5)));
    }
}
