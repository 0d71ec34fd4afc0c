//! # Record
//!
//! One versioned key-value slot: the atomic owner identifier the commit
//! protocol synchronizes on, plus a fixed-capacity payload.
//!
//! The owner identifier is the only protocol-visible shared word. The
//! payload itself sits behind a read-write lock so the brief apply window
//! (writer holds the key-lock) and concurrent stable-read copies stay
//! memory-safe; protocol-level consistency still comes from re-validating
//! the owner id around the copy, not from this lock.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::xct::xct_id::{OwnerId, XctId};

struct Payload {
    len: usize,
    bytes: Box<[u8]>,
}

pub struct Record {
    owner_id: OwnerId,
    payload: RwLock<Payload>,
}

impl Record {
    /// Allocates a record with the given payload capacity and initial
    /// owner identifier.
    pub fn new(capacity: usize, initial_id: XctId) -> Arc<Record> {
        Arc::new(Record {
            owner_id: OwnerId::new(initial_id),
            payload: RwLock::new(Payload {
                len: 0,
                bytes: vec![0u8; capacity].into_boxed_slice(),
            }),
        })
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    pub fn payload_capacity(&self) -> usize {
        self.payload.read().bytes.len()
    }

    /// Copies the payload into `out` (up to its length) and returns the
    /// stored payload length.
    pub fn read_payload(&self, out: &mut [u8]) -> usize {
        let payload = self.payload.read();
        let copy = payload.len.min(out.len());
        out[..copy].copy_from_slice(&payload.bytes[..copy]);
        payload.len
    }

    /// Replaces the payload. Caller holds the record's key-lock.
    pub(crate) fn install_payload(&self, bytes: &[u8]) {
        debug_assert!(self.owner_id.is_keylocked());
        let mut payload = self.payload.write();
        debug_assert!(bytes.len() <= payload.bytes.len());
        payload.bytes[..bytes.len()].copy_from_slice(bytes);
        payload.len = bytes.len();
    }

    /// Splices `bytes` into the payload at `offset`, growing the stored
    /// length if the write extends past it. Caller holds the key-lock.
    pub(crate) fn overwrite_payload(&self, offset: usize, bytes: &[u8]) {
        debug_assert!(self.owner_id.is_keylocked());
        let mut payload = self.payload.write();
        debug_assert!(offset + bytes.len() <= payload.bytes.len());
        payload.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        payload.len = payload.len.max(offset + bytes.len());
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("owner_id", &self.owner_id.load_weak())
            .field("payload_len", &self.payload.read().len)
            .finish()
    }
}
