//! # Log Manager
//!
//! The durability oracle the commit protocol consumes. The actual durable
//! log files live with the external log writers; this component owns what
//! the core needs from them: the durable global epoch, the condition
//! committers wait on, and the flusher that honors each worker's in-commit
//! marker.
//!
//! ## Durable epoch rule
//!
//! Epoch `E` may be declared durable once:
//!
//! 1. `E` is strictly behind the current global epoch (the clock has moved
//!    on, so no new transaction can commit at `E`), and
//! 2. no worker's in-commit marker is at or behind `E` (a valid marker at
//!    epoch `M` means that worker may still publish log bytes for `M` or
//!    later).
//!
//! The flusher recomputes this bound on every wakeup, advances each
//! worker's `head` cursor over the published bytes, and broadcasts to
//! `wait_until_durable` waiters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::epoch::{AtomicEpoch, Epoch};
use crate::error::{Result, XctError};
use crate::worker::WorkerControl;
use crate::xct::epoch_clock::EpochClock;

pub struct LogManager {
    durable_epoch: AtomicEpoch,
    durable_lock: Mutex<()>,
    durable_cond: Condvar,
    workers: Mutex<Vec<Arc<WorkerControl>>>,
    wakeup_flag: Mutex<bool>,
    wakeup_cond: Condvar,
    stop_requested: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    pub fn new() -> LogManager {
        LogManager {
            durable_epoch: AtomicEpoch::default(),
            durable_lock: Mutex::new(()),
            durable_cond: Condvar::new(),
            workers: Mutex::new(Vec::new()),
            wakeup_flag: Mutex::new(false),
            wakeup_cond: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Seeds the durable epoch from the restored savepoint: everything
    /// before the restored current epoch was durable when it was taken.
    pub(crate) fn restore_durable_epoch(&self, current_epoch: Epoch) {
        debug_assert!(current_epoch.is_valid());
        let durable = current_epoch.one_less();
        if durable.is_valid() {
            self.durable_epoch.store_max(durable);
        }
    }

    pub fn get_durable_global_epoch(&self) -> Epoch {
        self.durable_epoch.load_acquire()
    }

    pub fn get_durable_global_epoch_weak(&self) -> Epoch {
        self.durable_epoch.load_weak()
    }

    pub(crate) fn register_worker(&self, control: Arc<WorkerControl>) {
        self.workers.lock().push(control);
    }

    pub(crate) fn unregister_worker(&self, control: &Arc<WorkerControl>) {
        self.workers
            .lock()
            .retain(|registered| !Arc::ptr_eq(registered, control));
    }

    /// Wakes the flusher thread early.
    pub fn wakeup_loggers(&self) {
        let mut requested = self.wakeup_flag.lock();
        *requested = true;
        self.wakeup_cond.notify_one();
    }

    /// Starts the flusher thread.
    pub fn start(self: &Arc<Self>, clock: Arc<EpochClock>, interval: Duration) {
        self.stop_requested.store(false, Ordering::Release);
        *self.wakeup_flag.lock() = false;
        let manager = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("log_flusher".into())
            .spawn(move || manager.run_flusher(clock, interval))
            .expect("failed to spawn log_flusher thread");
        *self.handle.lock() = Some(handle);
    }

    fn run_flusher(&self, clock: Arc<EpochClock>, interval: Duration) {
        info!("log_flusher thread started");
        loop {
            {
                let mut requested = self.wakeup_flag.lock();
                if !*requested {
                    self.wakeup_cond.wait_for(&mut requested, interval);
                }
                *requested = false;
            }
            if self.stop_requested.load(Ordering::Acquire) {
                break;
            }
            self.update_durable_epoch(&clock);
        }
        info!("log_flusher thread ended");
    }

    /// One flusher pass: reads the in-commit markers, flushes every
    /// worker's published bytes, and raises the durable epoch to the
    /// safe bound.
    pub fn update_durable_epoch(&self, clock: &EpochClock) {
        let global = clock.current();
        let mut safe = global.one_less();

        let workers = self.workers.lock();
        for control in workers.iter() {
            // Marker first: a worker whose marker is invalid here may start
            // a new commit, but that commit's epoch will be at least the
            // global epoch we already read, which `safe` stays behind.
            let marker = control.in_commit_epoch().load_acquire();
            if marker.is_valid() {
                let bound = marker.one_less();
                if !bound.is_valid() {
                    safe = Epoch::INVALID;
                    break;
                }
                safe = safe.min_valid(bound);
            }
            control.cursors().flush_to_committed();
        }
        drop(workers);

        if safe.is_valid() && self.durable_epoch.store_max(safe) {
            debug!(durable = safe.value(), "advanced durable epoch");
            let _guard = self.durable_lock.lock();
            self.durable_cond.notify_all();
        }
    }

    /// Blocks until `epoch` is durable. `None` timeout waits indefinitely.
    /// An invalid epoch is durable by definition.
    pub fn wait_until_durable(&self, epoch: Epoch, timeout: Option<Duration>) -> Result<()> {
        if !epoch.is_valid() {
            return Ok(());
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.durable_lock.lock();
        while self.get_durable_global_epoch().before(epoch) {
            match deadline {
                Some(deadline) => {
                    if self.durable_cond.wait_until(&mut guard, deadline).timed_out()
                        && self.get_durable_global_epoch().before(epoch)
                    {
                        return Err(XctError::Timeout);
                    }
                }
                None => self.durable_cond.wait(&mut guard),
            }
        }
        Ok(())
    }

    /// Stops and joins the flusher thread.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wakeup_loggers();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("durable_epoch", &self.get_durable_global_epoch_weak())
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_at(epoch: u32) -> EpochClock {
        EpochClock::new(Epoch::from_int(epoch), Duration::from_secs(3600))
    }

    #[test]
    fn durable_epoch_starts_invalid() {
        let manager = LogManager::new();
        assert!(!manager.get_durable_global_epoch().is_valid());
    }

    #[test]
    fn restore_seeds_one_behind_current() {
        let manager = LogManager::new();
        manager.restore_durable_epoch(Epoch::from_int(10));
        assert_eq!(manager.get_durable_global_epoch(), Epoch::from_int(9));
    }

    #[test]
    fn restore_from_first_epoch_stays_invalid() {
        let manager = LogManager::new();
        manager.restore_durable_epoch(Epoch::from_int(1));
        assert!(!manager.get_durable_global_epoch().is_valid());
    }

    #[test]
    fn update_tracks_one_behind_global_without_markers() {
        let manager = LogManager::new();
        let clock = clock_at(5);
        manager.update_durable_epoch(&clock);
        assert_eq!(manager.get_durable_global_epoch(), Epoch::from_int(4));
    }

    #[test]
    fn in_commit_marker_holds_durable_epoch_back() {
        let manager = LogManager::new();
        let clock = clock_at(9);
        let control = WorkerControl::for_tests(0);
        manager.register_worker(Arc::clone(&control));

        control.in_commit_epoch().store_release(Epoch::from_int(6));
        manager.update_durable_epoch(&clock);
        assert_eq!(manager.get_durable_global_epoch(), Epoch::from_int(5));

        control.in_commit_epoch().store_release(Epoch::INVALID);
        manager.update_durable_epoch(&clock);
        assert_eq!(manager.get_durable_global_epoch(), Epoch::from_int(8));
    }

    #[test]
    fn marker_at_first_epoch_blocks_all_progress() {
        let manager = LogManager::new();
        let clock = clock_at(9);
        let control = WorkerControl::for_tests(0);
        manager.register_worker(Arc::clone(&control));

        control.in_commit_epoch().store_release(Epoch::from_int(1));
        manager.update_durable_epoch(&clock);
        assert!(!manager.get_durable_global_epoch().is_valid());
    }

    #[test]
    fn wait_until_durable_times_out() {
        let manager = LogManager::new();
        let err = manager
            .wait_until_durable(Epoch::from_int(5), Some(Duration::from_millis(10)))
            .unwrap_err();
        assert_eq!(err, XctError::Timeout);
    }

    #[test]
    fn wait_until_durable_returns_once_reached() {
        let manager = Arc::new(LogManager::new());
        let waiter = Arc::clone(&manager);
        let handle = std::thread::spawn(move || {
            waiter.wait_until_durable(Epoch::from_int(4), Some(Duration::from_secs(5)))
        });
        let clock = clock_at(5);
        // give the waiter a moment to block, then publish durability
        std::thread::sleep(Duration::from_millis(20));
        manager.update_durable_epoch(&clock);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn invalid_epoch_is_trivially_durable() {
        let manager = LogManager::new();
        manager
            .wait_until_durable(Epoch::INVALID, Some(Duration::from_millis(1)))
            .unwrap();
    }

    #[test]
    fn unregister_removes_worker() {
        let manager = LogManager::new();
        let control = WorkerControl::for_tests(3);
        manager.register_worker(Arc::clone(&control));
        control.in_commit_epoch().store_release(Epoch::from_int(2));

        manager.unregister_worker(&control);
        let clock = clock_at(9);
        manager.update_durable_epoch(&clock);
        assert_eq!(manager.get_durable_global_epoch(), Epoch::from_int(8));
    }
}
