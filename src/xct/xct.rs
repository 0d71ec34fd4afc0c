//! # Transaction Context
//!
//! Per-worker transaction state: the active/schema flags, isolation level,
//! read and write sets, the identifier being assembled at commit, and the
//! in-commit epoch marker the log writers watch.
//!
//! ## Lifecycle
//!
//! ```text
//! activate() ──> Active ──> precommit()/abort() ──> deactivate()
//! ```
//!
//! `activate` truncates both sets and raises the active flag; `deactivate`
//! only clears the flag (releasing record locks is the commit protocol's
//! job and has already happened on every path that reaches it).
//!
//! ## Ordinals
//!
//! `issue_next_id` assembles the identifier published into every record the
//! transaction wrote: commit epoch, a per-thread ordinal that grows
//! monotonically within one epoch, and the worker's thread id. When the
//! 16-bit ordinal space for the current epoch is exhausted it refuses, and
//! the commit protocol advances the global epoch and retries.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::epoch::Epoch;
use crate::error::{Result, XctError};
use crate::log::thread_buffer::LogPosition;
use crate::storage::{OrderedStorage, Record};
use crate::worker::WorkerControl;
use crate::xct::access::{ReadAccess, WriteAccess};
use crate::xct::xct_id::{IsolationLevel, ThreadId, XctId, XctOrdinal};

/// Per-worker transaction context. Owned by exactly one worker thread for
/// its whole lifetime.
pub struct Xct {
    thread_id: ThreadId,
    /// Most recently issued identifier; issued at commit time, so outside a
    /// commit this names the previous transaction.
    id: XctId,
    isolation: IsolationLevel,
    active: bool,
    schema_xct: bool,
    read_set: SmallVec<[ReadAccess; 16]>,
    write_set: SmallVec<[WriteAccess; 16]>,
    max_read_set_size: u32,
    max_write_set_size: u32,
}

impl Xct {
    pub fn new(thread_id: ThreadId, max_read_set_size: u32, max_write_set_size: u32) -> Xct {
        Xct {
            thread_id,
            id: XctId::ZERO,
            isolation: IsolationLevel::Serializable,
            active: false,
            schema_xct: false,
            read_set: SmallVec::new(),
            write_set: SmallVec::new(),
            max_read_set_size,
            max_write_set_size,
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_schema_xct(&self) -> bool {
        self.schema_xct
    }

    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// The id issued by the most recent successful commit.
    pub fn id(&self) -> XctId {
        self.id
    }

    pub fn read_set(&self) -> &[ReadAccess] {
        &self.read_set
    }

    pub fn write_set(&self) -> &[WriteAccess] {
        &self.write_set
    }

    pub(crate) fn write_set_mut(&mut self) -> &mut [WriteAccess] {
        &mut self.write_set
    }

    /// Begins a transaction on this context. The caller has already ruled
    /// out a running transaction.
    pub(crate) fn activate(&mut self, isolation: IsolationLevel, schema_xct: bool) {
        debug_assert!(!self.active);
        self.active = true;
        self.schema_xct = schema_xct;
        self.isolation = isolation;
        self.read_set.clear();
        self.write_set.clear();
    }

    /// Ends the transaction. Does not touch record locks.
    pub(crate) fn deactivate(&mut self) {
        debug_assert!(self.active);
        self.active = false;
    }

    /// Appends to the read set. Skipped entirely below serializable
    /// isolation: there is nothing to verify later.
    pub(crate) fn record_read(
        &mut self,
        storage: Arc<OrderedStorage>,
        record: Arc<Record>,
        observed: XctId,
    ) -> Result<()> {
        debug_assert!(self.active && !self.schema_xct);
        debug_assert!(!observed.is_keylocked());
        if self.isolation != IsolationLevel::Serializable {
            return Ok(());
        }
        if self.read_set.len() >= self.max_read_set_size as usize {
            return Err(XctError::ReadSetOverflow {
                limit: self.max_read_set_size,
            });
        }
        self.read_set.push(ReadAccess {
            storage,
            record,
            observed,
        });
        Ok(())
    }

    /// Appends to the write set.
    pub(crate) fn record_write(
        &mut self,
        storage: Arc<OrderedStorage>,
        record: Arc<Record>,
        observed: XctId,
        log_position: LogPosition,
    ) -> Result<()> {
        debug_assert!(self.active && !self.schema_xct);
        if self.write_set.len() >= self.max_write_set_size as usize {
            return Err(XctError::WriteSetOverflow {
                limit: self.max_write_set_size,
            });
        }
        self.write_set.push(WriteAccess {
            storage,
            record,
            observed,
            log_position,
        });
        Ok(())
    }

    /// Issues the identifier for a commit at `epoch`: ordinal continues the
    /// per-thread sequence within the epoch, or restarts at 1 in a fresh
    /// epoch. `None` when the ordinal space of this epoch is exhausted; the
    /// caller then advances the global epoch and retries.
    pub(crate) fn issue_next_id(&mut self, epoch: Epoch) -> Option<XctId> {
        debug_assert!(epoch.is_valid());
        let ordinal: XctOrdinal = if self.id.is_valid() && self.id.epoch() == epoch {
            match self.id.ordinal().checked_add(1) {
                Some(next) => next,
                None => return None,
            }
        } else {
            debug_assert!(!self.id.is_valid() || self.id.epoch().before(epoch));
            1
        };
        let new_id = XctId::new_clean(epoch, ordinal, self.thread_id);
        self.id = new_id;
        Some(new_id)
    }
}

impl std::fmt::Debug for Xct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Xct")
            .field("thread_id", &self.thread_id)
            .field("active", &self.active)
            .field("schema_xct", &self.schema_xct)
            .field("isolation", &self.isolation)
            .field("read_set_len", &self.read_set.len())
            .field("write_set_len", &self.write_set.len())
            .finish()
    }
}

/// Scoped in-commit epoch marker.
///
/// Constructed before the first post-lock fence of a commit; the log
/// writers treat a valid marker as "this worker may still publish log
/// entries of this epoch or later, do not declare them durable yet". The
/// marker is always cleared on scope exit, error paths included, with
/// release ordering so the preceding publish (or discard) is visible
/// before the clear.
pub struct InCommitEpochGuard<'a> {
    control: &'a WorkerControl,
}

impl<'a> InCommitEpochGuard<'a> {
    pub fn new(control: &'a WorkerControl, current_epoch: Epoch) -> InCommitEpochGuard<'a> {
        control.in_commit_epoch().store_release(current_epoch);
        InCommitEpochGuard { control }
    }
}

impl Drop for InCommitEpochGuard<'_> {
    fn drop(&mut self) {
        self.control.in_commit_epoch().store_release(Epoch::INVALID);
    }
}
