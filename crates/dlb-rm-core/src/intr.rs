//! Per-port CQ interrupt waits.
//!
//! A thread blocking on a port's CQ waits until the interrupt fires, the
//! port is disabled, or the whole device is reset. Only one waiter per port
//! proceeds at a time; others queue behind it.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::{MAX_NUM_DIR_PORTS, MAX_NUM_LDB_PORTS};

/// Why a CQ interrupt wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitOutcome {
    /// The CQ interrupt fired.
    Woken,
    /// The port was disabled.
    Disabled,
    /// The device is being reset.
    DeviceReset,
    /// The deadline passed first.
    TimedOut,
}

#[derive(Debug, Default)]
struct Flags {
    wake: bool,
    disabled: bool,
    reset: bool,
}

#[derive(Debug, Default)]
struct PortIntr {
    waiter: Mutex<()>,
    flags: Mutex<Flags>,
    cond: Condvar,
}

impl PortIntr {
    fn update(&self, f: impl FnOnce(&mut Flags)) {
        let mut flags = self.flags.lock();
        f(&mut flags);
        self.cond.notify_all();
    }
}

/// Interrupt state of every CQ of a device.
#[derive(Debug)]
pub struct Interrupts {
    ldb: Vec<PortIntr>,
    dir: Vec<PortIntr>,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    /// State for every load-balanced and directed port.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ldb: (0..MAX_NUM_LDB_PORTS).map(|_| PortIntr::default()).collect(),
            dir: (0..MAX_NUM_DIR_PORTS).map(|_| PortIntr::default()).collect(),
        }
    }

    fn port(&self, is_ldb: bool, port: u32) -> Result<&PortIntr> {
        let ports = if is_ldb { &self.ldb } else { &self.dir };
        ports
            .get(port as usize)
            .ok_or_else(|| Error::InvalidArgument(format!("no such port {port}")))
    }

    /// Deliver a CQ interrupt to the port's waiter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an out-of-range port.
    pub fn wake(&self, is_ldb: bool, port: u32) -> Result<()> {
        self.port(is_ldb, port)?.update(|f| f.wake = true);
        Ok(())
    }

    pub(crate) fn set_disabled(&self, is_ldb: bool, port: u32, disabled: bool) {
        if let Ok(p) = self.port(is_ldb, port) {
            p.update(|f| f.disabled = disabled);
        }
    }

    /// Forget stale state when a port is (re)created.
    pub(crate) fn clear(&self, is_ldb: bool, port: u32) {
        if let Ok(p) = self.port(is_ldb, port) {
            p.update(|f| *f = Flags::default());
        }
    }

    /// Release every waiter because the device is being reset.
    pub fn notify_reset(&self) {
        for p in self.ldb.iter().chain(self.dir.iter()) {
            p.update(|f| f.reset = true);
        }
    }

    /// Allow waits again after a device reset.
    pub fn clear_reset(&self) {
        for p in self.ldb.iter().chain(self.dir.iter()) {
            p.update(|f| f.reset = false);
        }
    }

    /// Block until the port's CQ interrupt fires, the port is disabled, the
    /// device is reset, or `timeout` passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an out-of-range port.
    pub fn wait(&self, is_ldb: bool, port: u32, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let p = self.port(is_ldb, port)?;
        let _waiter = p.waiter.lock();
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut flags = p.flags.lock();
        loop {
            if flags.reset {
                return Ok(WaitOutcome::DeviceReset);
            }
            if flags.disabled {
                return Ok(WaitOutcome::Disabled);
            }
            if flags.wake {
                flags.wake = false;
                return Ok(WaitOutcome::Woken);
            }
            match deadline {
                Some(deadline) => {
                    if p.cond.wait_until(&mut flags, deadline).timed_out()
                        && !(flags.wake || flags.disabled || flags.reset)
                    {
                        return Ok(WaitOutcome::TimedOut);
                    }
                }
                None => p.cond.wait(&mut flags),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_pending_wake_returns_immediately() {
        let intr = Interrupts::new();
        intr.wake(true, 3).unwrap();
        assert_eq!(intr.wait(true, 3, None).unwrap(), WaitOutcome::Woken);
        assert_eq!(
            intr.wait(true, 3, Some(Duration::from_millis(5))).unwrap(),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_wake_from_other_thread() {
        let intr = Arc::new(Interrupts::new());
        let waiter = {
            let intr = Arc::clone(&intr);
            std::thread::spawn(move || intr.wait(false, 100, Some(Duration::from_secs(5))))
        };
        std::thread::sleep(Duration::from_millis(10));
        intr.wake(false, 100).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), WaitOutcome::Woken);
    }

    #[test]
    fn test_disable_and_reset_release_waiters() {
        let intr = Interrupts::new();
        intr.set_disabled(true, 1, true);
        assert_eq!(intr.wait(true, 1, None).unwrap(), WaitOutcome::Disabled);
        intr.set_disabled(true, 1, false);

        intr.notify_reset();
        assert_eq!(intr.wait(true, 1, None).unwrap(), WaitOutcome::DeviceReset);
        intr.clear_reset();
        assert_eq!(
            intr.wait(true, 1, Some(Duration::from_millis(1))).unwrap(),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_out_of_range_port() {
        let intr = Interrupts::new();
        assert!(intr.wake(true, 64).is_err());
        assert!(intr.wait(false, 128, None).is_err());
    }
}
