//! # Epoch Clock
//!
//! The process-wide monotonic epoch counter and its advancer thread. One
//! shared clock gives every worker the same serialization timestamp without
//! per-record counters, and keeping the advancer off the commit path keeps
//! commits wait-free with respect to the clock.
//!
//! ## Advancer loop
//!
//! The thread sleeps for the configured interval (or until an early wakeup
//! request), then publishes `current.one_more()` under the observer lock,
//! broadcasts to observers, and pokes the log writers so the durable epoch
//! can follow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::epoch::{AtomicEpoch, Epoch};
use crate::log::manager::LogManager;

pub struct EpochClock {
    current: AtomicEpoch,
    /// Lock + condition observers wait on for epoch progress. The epoch is
    /// published while holding the lock, so waiters cannot miss an advance.
    observer_lock: Mutex<()>,
    observer_cond: Condvar,
    /// Early-wakeup latch for the advancer thread.
    wakeup_flag: Mutex<bool>,
    wakeup_cond: Condvar,
    stop_requested: AtomicBool,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EpochClock {
    pub fn new(initial: Epoch, interval: Duration) -> EpochClock {
        debug_assert!(initial.is_valid());
        EpochClock {
            current: AtomicEpoch::new(initial),
            observer_lock: Mutex::new(()),
            observer_cond: Condvar::new(),
            wakeup_flag: Mutex::new(false),
            wakeup_cond: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            interval,
            handle: Mutex::new(None),
        }
    }

    /// Current global epoch with acquire semantics.
    pub fn current(&self) -> Epoch {
        self.current.load_acquire()
    }

    /// Relaxed read for sites that tolerate staleness.
    pub fn current_weak(&self) -> Epoch {
        self.current.load_weak()
    }

    /// Starts the advancer thread. Idempotent start is a caller bug; the
    /// engine calls this exactly once during initialization.
    pub fn start(self: &Arc<Self>, log_manager: Arc<LogManager>) {
        self.stop_requested.store(false, Ordering::Release);
        *self.wakeup_flag.lock() = false;
        let clock = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("epoch_advance".into())
            .spawn(move || clock.run_advancer(log_manager))
            .expect("failed to spawn epoch_advance thread");
        *self.handle.lock() = Some(handle);
    }

    fn run_advancer(&self, log_manager: Arc<LogManager>) {
        info!("epoch_advance thread started");
        loop {
            {
                let mut requested = self.wakeup_flag.lock();
                if !*requested {
                    self.wakeup_cond.wait_for(&mut requested, self.interval);
                }
                *requested = false;
            }
            if self.stop_requested.load(Ordering::Acquire) {
                break;
            }
            let next = {
                let _guard = self.observer_lock.lock();
                let next = self.current.load_weak().one_more();
                self.current.store_release(next);
                self.observer_cond.notify_all();
                next
            };
            debug!(epoch = next.value(), "advanced global epoch");
            log_manager.wakeup_loggers();
        }
        info!("epoch_advance thread ended");
    }

    /// Asks the advancer to step immediately.
    pub fn wakeup_advancer(&self) {
        let mut requested = self.wakeup_flag.lock();
        *requested = true;
        self.wakeup_cond.notify_one();
    }

    /// Requests an advance and blocks until the epoch differs from the one
    /// observed at entry.
    pub fn advance(&self) -> Epoch {
        let from = self.current();
        self.wakeup_advancer();
        self.wait_for_progress(from)
    }

    /// Returns once `current() != from`.
    pub fn wait_for_progress(&self, from: Epoch) -> Epoch {
        let mut guard = self.observer_lock.lock();
        while self.current() == from {
            self.observer_cond.wait(&mut guard);
        }
        self.current()
    }

    /// Stops and joins the advancer thread.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wakeup_advancer();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for EpochClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochClock")
            .field("current", &self.current())
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_clock(interval_ms: u64) -> (Arc<EpochClock>, Arc<LogManager>) {
        let clock = Arc::new(EpochClock::new(
            Epoch::from_int(1),
            Duration::from_millis(interval_ms),
        ));
        let log_manager = Arc::new(LogManager::new());
        clock.start(Arc::clone(&log_manager));
        (clock, log_manager)
    }

    #[test]
    fn current_reflects_initial_value() {
        let clock = EpochClock::new(Epoch::from_int(42), Duration::from_millis(1000));
        assert_eq!(clock.current(), Epoch::from_int(42));
        assert_eq!(clock.current_weak(), Epoch::from_int(42));
    }

    #[test]
    fn advance_blocks_until_progress() {
        let (clock, _log) = started_clock(1000);
        let before = clock.current();
        let after = clock.advance();
        assert!(before.before(after));
        clock.stop();
    }

    #[test]
    fn advancer_ticks_on_its_own() {
        let (clock, _log) = started_clock(1);
        let before = clock.current();
        let after = clock.wait_for_progress(before);
        assert!(before.before(after));
        clock.stop();
    }

    #[test]
    fn concurrent_advances_all_return() {
        let (clock, _log) = started_clock(500);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let clock = Arc::clone(&clock);
            handles.push(std::thread::spawn(move || clock.advance()));
        }
        for handle in handles {
            assert!(handle.join().unwrap().is_valid());
        }
        clock.stop();
    }

    #[test]
    fn stop_is_prompt_and_joinable() {
        let (clock, _log) = started_clock(10_000);
        clock.stop();
    }
}
