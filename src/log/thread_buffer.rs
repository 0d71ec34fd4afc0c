//! # Thread Log Buffer
//!
//! Per-worker append-only log ring. Storage operations reserve entries here
//! while a transaction runs; the commit protocol publishes or discards them
//! as a unit.
//!
//! ## Cursors
//!
//! Three monotonically increasing byte cursors track the ring:
//!
//! ```text
//!  head            committed        tail
//!   │                  │              │
//!   v                  v              v
//!   ├──────────────────┼──────────────┤
//!   flushed by logger   published but  current transaction's
//!   (space reusable)    not flushed    uncommitted entries
//! ```
//!
//! - `tail`: next free byte; advanced by `reserve_new_log`.
//! - `committed`: last byte published to the loggers; advanced by
//!   `publish_committed_log`, rewound over by `discard_current_xct_log`.
//! - `head`: oldest unflushed byte; advanced by the log manager's flusher.
//!
//! Physical position is `cursor % capacity`. An entry never straddles the
//! ring boundary: when the gap to the boundary is too small, a filler entry
//! covers it and the real entry starts at offset zero.
//!
//! ## Invariants
//!
//! - Outside an active transaction, `tail == committed`.
//! - A reserved position is stable (never moves, never reused) until the
//!   transaction publishes or discards it.
//! - Only the owning worker writes bytes or `tail`; the flusher only moves
//!   `head` forward to `committed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::MAX_LOG_LENGTH;
use crate::epoch::Epoch;
use crate::error::{Result, XctError};
use crate::log::types::{
    self, LogHeader, EPOCH_MARKER_LENGTH, LOG_HEADER_SIZE,
};

/// Byte position in the (logical, unwrapped) log stream.
pub type LogPosition = u64;

/// Cursors shared with the log manager's flusher thread.
#[derive(Debug, Default)]
pub struct BufferCursors {
    head: AtomicU64,
    committed: AtomicU64,
}

impl BufferCursors {
    pub fn head(&self) -> LogPosition {
        self.head.load(Ordering::Acquire)
    }

    pub fn committed(&self) -> LogPosition {
        self.committed.load(Ordering::Acquire)
    }

    /// Flusher-side: marks everything published so far as flushed.
    pub fn flush_to_committed(&self) -> LogPosition {
        let committed = self.committed.load(Ordering::Acquire);
        self.head.store(committed, Ordering::Release);
        committed
    }
}

/// The worker-owned log ring.
pub struct ThreadLogBuffer {
    buf: Box<[u8]>,
    tail: LogPosition,
    cursors: Arc<BufferCursors>,
    last_published_epoch: Epoch,
}

impl ThreadLogBuffer {
    pub fn new(capacity: usize) -> ThreadLogBuffer {
        debug_assert!(capacity >= 2 * MAX_LOG_LENGTH);
        ThreadLogBuffer {
            buf: vec![0u8; capacity].into_boxed_slice(),
            tail: 0,
            cursors: Arc::new(BufferCursors::default()),
            last_published_epoch: Epoch::INVALID,
        }
    }

    /// Handle the log manager uses to flush this buffer.
    pub fn cursors(&self) -> Arc<BufferCursors> {
        Arc::clone(&self.cursors)
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn offset_tail(&self) -> LogPosition {
        self.tail
    }

    pub fn offset_committed(&self) -> LogPosition {
        self.cursors.committed()
    }

    fn free_bytes(&self) -> usize {
        self.buf.len() - (self.tail - self.cursors.head()) as usize
    }

    fn physical(&self, pos: LogPosition) -> usize {
        (pos % self.buf.len() as u64) as usize
    }

    /// Reserves `length` bytes for one entry and returns its stable
    /// position. `length` must already be header-inclusive and aligned.
    ///
    /// When the gap to the ring boundary is smaller than the entry, a
    /// filler entry is written over the gap first.
    pub fn reserve_new_log(&mut self, length: usize) -> Result<LogPosition> {
        debug_assert!(length >= LOG_HEADER_SIZE);
        debug_assert_eq!(length % crate::config::LOG_ALIGN, 0);
        if length > MAX_LOG_LENGTH {
            return Err(XctError::LogBufferFull {
                needed: length,
                free: MAX_LOG_LENGTH,
            });
        }

        let room_to_boundary = self.buf.len() - self.physical(self.tail);
        let gap = if room_to_boundary < length {
            room_to_boundary
        } else {
            0
        };
        if self.free_bytes() < gap + length {
            return Err(XctError::LogBufferFull {
                needed: gap + length,
                free: self.free_bytes(),
            });
        }

        if gap > 0 {
            let offset = self.physical(self.tail);
            types::encode_filler(&mut self.buf[offset..offset + gap], gap);
            self.tail += gap as u64;
            debug_assert_eq!(self.physical(self.tail), 0);
        }

        let position = self.tail;
        self.tail += length as u64;
        Ok(position)
    }

    /// Mutable view of a reserved entry. Owner thread only.
    pub fn entry_bytes_mut(&mut self, position: LogPosition, length: usize) -> &mut [u8] {
        let offset = self.physical(position);
        debug_assert!(offset + length <= self.buf.len());
        &mut self.buf[offset..offset + length]
    }

    /// Immutable view of the entry starting at `position`, sized from its
    /// own header.
    pub fn entry_bytes(&self, position: LogPosition) -> Result<&[u8]> {
        let offset = self.physical(position);
        let header = LogHeader::read_from(&self.buf[offset..offset + LOG_HEADER_SIZE])?;
        let length = header.length();
        debug_assert!(offset + length <= self.buf.len());
        Ok(&self.buf[offset..offset + length])
    }

    /// Positions of all entries between `committed` and `tail`, in
    /// insertion order. Fillers are included; callers route them by kind.
    pub fn list_uncommitted_logs(&self) -> Vec<LogPosition> {
        let mut positions = Vec::new();
        let mut cursor = self.cursors.committed();
        while cursor < self.tail {
            positions.push(cursor);
            let offset = self.physical(cursor);
            let header = match LogHeader::read_from(&self.buf[offset..offset + LOG_HEADER_SIZE]) {
                Ok(header) => header,
                Err(_) => break,
            };
            debug_assert!(header.length() >= LOG_HEADER_SIZE);
            cursor += header.length() as u64;
        }
        positions
    }

    /// Publishes everything up to `tail` as committed in `epoch`. Crossing
    /// into a new epoch first appends an epoch-marker entry recording the
    /// boundary for the log writers.
    pub fn publish_committed_log(&mut self, epoch: Epoch) {
        debug_assert!(epoch.is_valid());
        if self.last_published_epoch.is_valid() && self.last_published_epoch != epoch {
            let old = self.last_published_epoch;
            if let Ok(position) = self.reserve_new_log(EPOCH_MARKER_LENGTH) {
                let entry = self.entry_bytes_mut(position, EPOCH_MARKER_LENGTH);
                types::encode_epoch_marker(entry, old, epoch);
            }
        }
        self.last_published_epoch = epoch;
        self.cursors.committed.store(self.tail, Ordering::Release);
    }

    /// Throws away the current transaction's unpublished bytes.
    pub fn discard_current_xct_log(&mut self) {
        self.tail = self.cursors.committed();
    }
}

impl std::fmt::Debug for ThreadLogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadLogBuffer")
            .field("capacity", &self.buf.len())
            .field("head", &self.cursors.head())
            .field("committed", &self.cursors.committed())
            .field("tail", &self.tail)
            .finish()
    }
}
