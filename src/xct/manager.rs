//! # Transaction Manager
//!
//! The optimistic commit protocol. A transaction runs without any locks;
//! all synchronization happens inside `precommit_xct`, in a fixed order:
//!
//! ```text
//! 1. sort write set          deterministic global order, so unconditional
//! 2. lock each record        spins can never deadlock
//! 3. set in-commit marker    before any fence: loggers must not declare
//!                            this worker's bytes durable mid-apply
//! 4. full fence
//! 5. latch commit epoch      the serialization point
//! 6. full fence
//! 7. verify read set         serial-order compare; key-locked records must
//!                            be our own (binary search in the write set)
//! 8. apply write set         each apply publishes the new owner id last,
//!                            releasing the key-lock
//! 9. release fence, publish log
//! ```
//!
//! Failures after step 2 release every lock before returning, and the
//! in-commit marker is cleared by a scoped guard on every exit path.

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::epoch::Epoch;
use crate::error::{Result, XctError};
use crate::log::apply;
use crate::log::manager::LogManager;
use crate::log::types::{LogHeader, LogKind};
use crate::storage::StorageManager;
use crate::worker::Worker;
use crate::xct::access::WriteAccess;
use crate::xct::epoch_clock::EpochClock;
use crate::xct::xct::InCommitEpochGuard;
use crate::xct::xct_id::{IsolationLevel, XctId};

pub struct XctManager {
    clock: Arc<EpochClock>,
    log_manager: Arc<LogManager>,
    storage_manager: Arc<StorageManager>,
    initialized: AtomicBool,
}

impl XctManager {
    pub fn new(
        clock: Arc<EpochClock>,
        log_manager: Arc<LogManager>,
        storage_manager: Arc<StorageManager>,
    ) -> XctManager {
        XctManager {
            clock,
            log_manager,
            storage_manager,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Starts the epoch clock. The storage manager must already be up.
    pub(crate) fn initialize(&self) -> Result<()> {
        info!("initializing XctManager");
        if !self.storage_manager.is_initialized() {
            return Err(XctError::DependentModuleUnavailable {
                module: "StorageManager",
            });
        }
        self.clock.start(Arc::clone(&self.log_manager));
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn uninitialize(&self) -> Result<()> {
        info!("uninitializing XctManager");
        if !self.storage_manager.is_initialized() {
            return Err(XctError::DependentModuleUnavailable {
                module: "StorageManager",
            });
        }
        self.clock.stop();
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }

    pub fn get_current_global_epoch(&self) -> Epoch {
        self.clock.current()
    }

    pub fn get_current_global_epoch_weak(&self) -> Epoch {
        self.clock.current_weak()
    }

    /// Requests an immediate epoch step and waits for it.
    pub fn advance_current_global_epoch(&self) {
        let now = self.get_current_global_epoch();
        debug!(epoch = now.value(), "requesting immediate epoch advance");
        self.clock.advance();
    }

    /// Hands `epoch` to the durability oracle, nudging the clock first when
    /// the epoch has not even passed yet.
    pub fn wait_for_commit(&self, commit_epoch: Epoch, timeout: Option<Duration>) -> Result<()> {
        fence(Ordering::Acquire);
        if commit_epoch.is_valid() && !commit_epoch.before(self.get_current_global_epoch()) {
            self.clock.wakeup_advancer();
        }
        self.log_manager.wait_until_durable(commit_epoch, timeout)
    }

    /// Begins a transaction on `worker`.
    pub fn begin_xct(&self, worker: &mut Worker, isolation: IsolationLevel) -> Result<()> {
        if worker.xct().is_active() {
            return Err(XctError::AlreadyRunning);
        }
        debug!(thread = worker.thread_id(), ?isolation, "began new transaction");
        worker.xct_mut().activate(isolation, false);
        debug_assert_eq!(
            worker.log_buffer().offset_tail(),
            worker.log_buffer().offset_committed()
        );
        debug_assert!(worker.xct().read_set().is_empty());
        debug_assert!(worker.xct().write_set().is_empty());
        Ok(())
    }

    /// Begins a schema (DDL) transaction on `worker`.
    pub fn begin_schema_xct(&self, worker: &mut Worker) -> Result<()> {
        if worker.xct().is_active() {
            return Err(XctError::AlreadyRunning);
        }
        info!(thread = worker.thread_id(), "began new schema transaction");
        worker.xct_mut().activate(IsolationLevel::Serializable, true);
        debug_assert_eq!(
            worker.log_buffer().offset_tail(),
            worker.log_buffer().offset_committed()
        );
        Ok(())
    }

    /// Commits the running transaction, returning its commit epoch. On
    /// `RaceAbort` the transaction is already deactivated and its log
    /// discarded; retrying from `begin_xct` is safe.
    pub fn precommit_xct(&self, worker: &mut Worker) -> Result<Epoch> {
        if !worker.xct().is_active() {
            return Err(XctError::NoTransaction);
        }

        let outcome = if worker.xct().is_schema_xct() {
            self.precommit_xct_schema(worker)
        } else if worker.xct().is_read_only() {
            self.precommit_xct_readonly(worker)
        } else {
            self.precommit_xct_readwrite(worker)
        };

        worker.xct_mut().deactivate();
        match outcome {
            Ok(commit_epoch) => Ok(commit_epoch),
            Err(error) => {
                warn!(thread = worker.thread_id(), %error, "aborting transaction");
                worker.log_buffer_mut().discard_current_xct_log();
                Err(error)
            }
        }
    }

    /// Aborts the running transaction, discarding its buffered log bytes.
    /// No locks can be held here: a transaction aborts either before the
    /// lock phase or after `precommit_xct` has already unlocked.
    pub fn abort_xct(&self, worker: &mut Worker) -> Result<()> {
        if !worker.xct().is_active() {
            return Err(XctError::NoTransaction);
        }
        debug!(thread = worker.thread_id(), "aborted transaction");
        worker.xct_mut().deactivate();
        worker.log_buffer_mut().discard_current_xct_log();
        Ok(())
    }

    fn precommit_xct_readonly(&self, worker: &mut Worker) -> Result<Epoch> {
        trace!(thread = worker.thread_id(), "committing read-only");
        fence(Ordering::Acquire);
        let mut commit_epoch = Epoch::INVALID;
        for access in worker.xct().read_set() {
            debug_assert!(!access.observed.is_keylocked());
            let now = access.record.owner_id().load_acquire();
            if !access.observed.equals_all(now) {
                debug!(
                    thread = worker.thread_id(),
                    "read set changed by another transaction, will abort"
                );
                return Err(XctError::RaceAbort);
            }
            commit_epoch.store_max(access.observed.epoch());
        }

        if !commit_epoch.is_valid() {
            // No reads at all: any already-durable epoch is a conservative
            // lower bound for "when was this consistent".
            commit_epoch = self.log_manager.get_durable_global_epoch_weak();
        }
        Ok(commit_epoch)
    }

    fn precommit_xct_readwrite(&self, worker: &mut Worker) -> Result<Epoch> {
        trace!(thread = worker.thread_id(), "committing read-write");
        self.precommit_xct_lock(worker);

        // Before the first fence, so loggers see the marker before any
        // bytes this commit may publish.
        let control = Arc::clone(worker.control());
        let guard = InCommitEpochGuard::new(&control, self.clock.current_weak());

        fence(Ordering::AcqRel);
        let mut commit_epoch = self.clock.current_weak(); // serialization point
        trace!(
            thread = worker.thread_id(),
            epoch = commit_epoch.value(),
            "acquired read-write commit epoch"
        );
        fence(Ordering::AcqRel);

        let verified = self.precommit_xct_verify_readwrite(worker);
        let result = if verified {
            self.precommit_xct_apply(worker, &mut commit_epoch)?;
            // Publish after the applies with a release fence: the applies
            // stamped the serialization order into the log entries.
            fence(Ordering::Release);
            worker.log_buffer_mut().publish_committed_log(commit_epoch);
            Ok(commit_epoch)
        } else {
            self.precommit_xct_unlock(worker);
            Err(XctError::RaceAbort)
        };
        drop(guard);
        result
    }

    /// Phase 1: sort the write set into the global order and take every
    /// key-lock unconditionally.
    fn precommit_xct_lock(&self, worker: &mut Worker) {
        let thread = worker.thread_id();
        let xct = worker.xct_mut();
        let write_set = xct.write_set_mut();
        trace!(thread, write_set = write_set.len(), "locking write set");

        #[cfg(debug_assertions)]
        {
            // Callers stage at most one write per record per transaction;
            // a duplicate here would self-deadlock in the lock loop.
            let mut records: Vec<_> = write_set
                .iter()
                .map(|w| Arc::as_ptr(&w.record) as usize)
                .collect();
            records.sort_unstable();
            records.dedup();
            assert_eq!(records.len(), write_set.len());
        }

        write_set.sort_unstable_by(WriteAccess::compare);
        for write in write_set.iter() {
            trace!(thread, storage = write.storage.id(), "locking record");
            write.record.owner_id().keylock_unconditional();
            debug_assert!(write.record.owner_id().is_keylocked());
        }
        trace!(thread, "locked write set");
    }

    /// Phase 2: the read set must be serial-order identical to the live
    /// owner ids, and any key-locked record we read must be one we locked
    /// ourselves.
    fn precommit_xct_verify_readwrite(&self, worker: &Worker) -> bool {
        let xct = worker.xct();
        let write_set = xct.write_set();
        for access in xct.read_set() {
            debug_assert!(!access.observed.is_keylocked());
            let now = access.record.owner_id().load_acquire();
            if !access.observed.equals_serial_order(now) {
                debug!(
                    thread = worker.thread_id(),
                    "read set changed by another transaction, will abort"
                );
                return false;
            }
            if now.is_keylocked() {
                // The write set is sorted, so binary search by record.
                let target = Arc::as_ptr(&access.record) as usize;
                let ours = write_set
                    .binary_search_by(|w| (Arc::as_ptr(&w.record) as usize).cmp(&target))
                    .is_ok();
                if !ours {
                    debug!(
                        thread = worker.thread_id(),
                        "read set entry locked by another committer, will abort"
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Phase 3: issue the new identifier and apply every buffered write in
    /// write-set order. Each apply publishes the identifier into the
    /// record, which also releases the key-lock.
    fn precommit_xct_apply(&self, worker: &mut Worker, commit_epoch: &mut Epoch) -> Result<()> {
        let thread = worker.thread_id();
        let new_id = self.issue_new_id(worker, commit_epoch);
        debug_assert_eq!(new_id.thread_id(), thread);
        debug_assert_eq!(new_id.epoch(), *commit_epoch);
        debug_assert!(new_id.ordinal() > 0);
        debug_assert!(new_id.is_status_clear());
        trace!(thread, ?new_id, "applying and unlocking write set");

        let (xct, buffer) = worker.xct_and_buffer_mut();
        let xct = &*xct;
        for write in xct.write_set() {
            let entry = buffer.entry_bytes(write.log_position)?;
            apply::apply_record(new_id, entry, xct, &write.storage, &write.record)?;
            debug_assert!(!write.record.owner_id().is_keylocked());
        }
        trace!(thread, "applied and unlocked write set");
        Ok(())
    }

    /// Verification failed: release every key-lock without applying.
    fn precommit_xct_unlock(&self, worker: &Worker) {
        trace!(thread = worker.thread_id(), "unlocking without applying");
        fence(Ordering::Release);
        for write in worker.xct().write_set() {
            write.record.owner_id().release_keylock();
        }
        fence(Ordering::Release);
        debug!(thread = worker.thread_id(), "unlocked write set without applying");
    }

    /// Schema commits have no read/write sets; they walk the buffered log
    /// entries and dispatch by kind. They always succeed.
    fn precommit_xct_schema(&self, worker: &mut Worker) -> Result<Epoch> {
        info!(thread = worker.thread_id(), "committing a schema transaction");

        let control = Arc::clone(worker.control());
        let guard = InCommitEpochGuard::new(&control, self.clock.current_weak());
        fence(Ordering::AcqRel);
        let mut commit_epoch = self.clock.current_weak(); // serialization point
        fence(Ordering::AcqRel);

        let new_id = self.issue_new_id(worker, &mut commit_epoch);
        info!(thread = worker.thread_id(), ?new_id, "schema xct issued new id");

        let (xct, buffer) = worker.xct_and_buffer_mut();
        let xct = &*xct;
        for position in buffer.list_uncommitted_logs() {
            let entry = buffer.entry_bytes(position)?;
            let header = LogHeader::read_from(entry)?;
            let code = header.decode_code()?;
            match code.kind() {
                LogKind::Marker => {
                    trace!("ignored marker log in schema xct apply");
                }
                LogKind::Engine => {
                    apply::apply_engine(new_id, entry, xct)?;
                }
                LogKind::Storage => {
                    let storage = self.storage_manager.get_storage(header.storage_id())?;
                    info!(storage = header.storage_id(), "schema xct applying storage log");
                    apply::apply_storage(new_id, entry, &storage)?;
                }
                LogKind::Record => {
                    // Schema transactions must not carry per-record logs.
                    return Err(XctError::InvalidLogTypeInSchemaXct { code: code as u16 });
                }
            }
        }

        worker.log_buffer_mut().publish_committed_log(commit_epoch);
        drop(guard);
        Ok(commit_epoch)
    }

    /// Issues the commit identifier, advancing the global epoch when the
    /// per-epoch ordinal space is exhausted.
    fn issue_new_id(&self, worker: &mut Worker, commit_epoch: &mut Epoch) -> XctId {
        loop {
            if let Some(new_id) = worker.xct_mut().issue_next_id(*commit_epoch) {
                return new_id;
            }
            debug!(
                thread = worker.thread_id(),
                epoch = commit_epoch.value(),
                "ordinal space exhausted, advancing epoch"
            );
            self.advance_current_global_epoch();
            fence(Ordering::AcqRel);
            *commit_epoch = self.clock.current_weak();
        }
    }
}

impl std::fmt::Debug for XctManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XctManager")
            .field("initialized", &self.is_initialized())
            .field("current_epoch", &self.get_current_global_epoch_weak())
            .finish()
    }
}
