//! # Ordered Storage
//!
//! An ordered key → record map with the point operations the transaction
//! manager commits against. Every operation runs inside an active
//! transaction on the calling worker and, before returning, records the
//! read/write accesses and buffers the log entry the commit protocol will
//! later verify and apply.
//!
//! ## Insert discipline
//!
//! An insert materializes the record immediately, but with an owner id of
//! invalid epoch and the delete bit set. Concurrent readers treat such a
//! record as absent; the insert's commit apply publishes the real id and
//! clears the bit. Two racing inserters share the placeholder record and
//! serialize through read-set verification: the loser observes the
//! winner's published id and aborts.
//!
//! ## Stable reads
//!
//! A read spins past a key-locked owner id, copies the payload, and
//! re-reads the owner id; it retries until both reads agree. The
//! observation recorded in the read set therefore never carries the lock
//! bit and always matches the payload bytes returned.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::config::MAX_KEY_LENGTH;
use crate::error::{Result, XctError};
use crate::log::types;
use crate::storage::{normalize_key, Record, StorageId, StorageMeta};
use crate::worker::Worker;
use crate::xct::xct_id::{OwnerId, XctId};

pub struct OrderedStorage {
    id: StorageId,
    meta: StorageMeta,
    index: RwLock<BTreeMap<Box<[u8]>, Arc<Record>>>,
    /// Owner id of the storage itself, published by schema-log apply.
    meta_id: OwnerId,
    dropped: AtomicBool,
}

impl OrderedStorage {
    pub fn new(id: StorageId, meta: StorageMeta) -> Arc<OrderedStorage> {
        Arc::new(OrderedStorage {
            id,
            meta,
            index: RwLock::new(BTreeMap::new()),
            meta_id: OwnerId::new(XctId::ZERO),
            dropped: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn payload_capacity(&self) -> usize {
        self.meta.payload_capacity as usize
    }

    pub fn record_count(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Schema-log apply: marks the storage as created by `new_id`.
    pub(crate) fn mark_created(&self, new_id: XctId) {
        self.meta_id.store_release(new_id);
    }

    /// Schema-log apply: marks the storage dropped.
    pub(crate) fn mark_dropped(&self, new_id: XctId) {
        self.meta_id.store_release(new_id.with_deleted());
        self.dropped.store(true, Ordering::Release);
    }

    /// Identifier of the schema transaction that created (or dropped)
    /// this storage.
    pub fn created_by(&self) -> XctId {
        self.meta_id.load_acquire()
    }

    /// Spins until the record's owner id is observed unlocked and the
    /// payload copy is consistent with it. Returns (observed id, stored
    /// payload length).
    fn stable_read(record: &Record, out: &mut [u8]) -> (XctId, usize) {
        loop {
            record.owner_id().spin_while_keylocked();
            let observed = record.owner_id().load_acquire();
            if observed.is_keylocked() {
                continue;
            }
            let len = record.read_payload(out);
            let check = record.owner_id().load_acquire();
            if check.equals_all(observed) {
                return (observed, len);
            }
        }
    }

    /// Observes the owner id without copying the payload.
    fn stable_observe(record: &Record) -> XctId {
        loop {
            record.owner_id().spin_while_keylocked();
            let observed = record.owner_id().load_acquire();
            if !observed.is_keylocked() {
                return observed;
            }
        }
    }

    fn ensure_active(worker: &Worker, key: &[u8]) -> Result<()> {
        if !worker.xct().is_active() {
            return Err(XctError::NoTransaction);
        }
        debug_assert!(!worker.xct().is_schema_xct());
        if key.len() > MAX_KEY_LENGTH {
            return Err(XctError::KeyTooLong {
                got: key.len(),
                limit: MAX_KEY_LENGTH,
            });
        }
        Ok(())
    }

    /// Reads the record under `key` into `out`, returning the stored
    /// payload length. Records the read access before reporting a deleted
    /// record as absent, so a later revival still aborts this reader.
    pub fn get_record(self: &Arc<Self>, worker: &mut Worker, key: &[u8], out: &mut [u8]) -> Result<usize> {
        Self::ensure_active(worker, key)?;
        let record = match self.index.read().get(key) {
            Some(record) => Arc::clone(record),
            None => return Err(XctError::KeyNotFound),
        };

        let (observed, len) = Self::stable_read(&record, out);
        worker
            .xct_mut()
            .record_read(Arc::clone(self), Arc::clone(&record), observed)?;
        if observed.is_deleted() {
            return Err(XctError::KeyNotFound);
        }
        Ok(len)
    }

    /// Stages an insert of `payload` under `key`.
    pub fn insert_record(self: &Arc<Self>, worker: &mut Worker, key: &[u8], payload: &[u8]) -> Result<()> {
        Self::ensure_active(worker, key)?;
        if payload.len() > self.payload_capacity() {
            return Err(XctError::PayloadTooLarge {
                got: payload.len(),
                capacity: self.payload_capacity(),
            });
        }

        let record = {
            let mut index = self.index.write();
            match index.get(key).cloned() {
                Some(record) => record,
                None => {
                    // Reserve the slot immediately, as a tombstone; the
                    // commit apply publishes the live identifier.
                    let record =
                        Record::new(self.payload_capacity(), XctId::ZERO.with_deleted());
                    index.insert(key.into(), Arc::clone(&record));
                    record
                }
            }
        };
        let observed = Self::stable_observe(&record);
        if !observed.is_deleted() {
            return Err(XctError::KeyAlreadyExists);
        }
        trace!(storage = self.id, key_len = key.len(), "staging insert");

        worker
            .xct_mut()
            .record_read(Arc::clone(self), Arc::clone(&record), observed)?;

        let length = types::record_insert_length(key.len(), payload.len());
        let position = {
            let buffer = worker.log_buffer_mut();
            let position = buffer.reserve_new_log(length)?;
            let entry = buffer.entry_bytes_mut(position, length);
            types::encode_record_insert(entry, self.id, key, payload);
            position
        };

        worker
            .xct_mut()
            .record_write(Arc::clone(self), record, observed, position)?;
        Ok(())
    }

    /// Stages an overwrite of `payload` at `offset` within the record under
    /// `key`.
    pub fn overwrite_record(
        self: &Arc<Self>,
        worker: &mut Worker,
        key: &[u8],
        payload: &[u8],
        offset: usize,
    ) -> Result<()> {
        Self::ensure_active(worker, key)?;
        if offset + payload.len() > self.payload_capacity() {
            return Err(XctError::PayloadTooLarge {
                got: offset + payload.len(),
                capacity: self.payload_capacity(),
            });
        }
        let record = match self.index.read().get(key) {
            Some(record) => Arc::clone(record),
            None => return Err(XctError::KeyNotFound),
        };

        let observed = Self::stable_observe(&record);
        worker
            .xct_mut()
            .record_read(Arc::clone(self), Arc::clone(&record), observed)?;
        if observed.is_deleted() {
            return Err(XctError::KeyNotFound);
        }
        trace!(storage = self.id, key_len = key.len(), offset, "staging overwrite");

        let length = types::record_overwrite_length(payload.len());
        let position = {
            let buffer = worker.log_buffer_mut();
            let position = buffer.reserve_new_log(length)?;
            let entry = buffer.entry_bytes_mut(position, length);
            types::encode_record_overwrite(entry, self.id, offset as u16, payload);
            position
        };

        worker
            .xct_mut()
            .record_write(Arc::clone(self), record, observed, position)?;
        Ok(())
    }

    /// Stages a logical delete of the record under `key`.
    pub fn delete_record(self: &Arc<Self>, worker: &mut Worker, key: &[u8]) -> Result<()> {
        Self::ensure_active(worker, key)?;
        let record = match self.index.read().get(key) {
            Some(record) => Arc::clone(record),
            None => return Err(XctError::KeyNotFound),
        };

        let observed = Self::stable_observe(&record);
        worker
            .xct_mut()
            .record_read(Arc::clone(self), Arc::clone(&record), observed)?;
        if observed.is_deleted() {
            return Err(XctError::KeyNotFound);
        }

        let length = types::RECORD_DELETE_LENGTH;
        let position = {
            let buffer = worker.log_buffer_mut();
            let position = buffer.reserve_new_log(length)?;
            let entry = buffer.entry_bytes_mut(position, length);
            types::encode_record_delete(entry, self.id);
            position
        };

        worker
            .xct_mut()
            .record_write(Arc::clone(self), record, observed, position)?;
        Ok(())
    }

    pub fn get_normalized(self: &Arc<Self>, worker: &mut Worker, key: u64, out: &mut [u8]) -> Result<usize> {
        self.get_record(worker, &normalize_key(key), out)
    }

    pub fn insert_normalized(self: &Arc<Self>, worker: &mut Worker, key: u64, payload: &[u8]) -> Result<()> {
        self.insert_record(worker, &normalize_key(key), payload)
    }

    pub fn overwrite_normalized(
        self: &Arc<Self>,
        worker: &mut Worker,
        key: u64,
        payload: &[u8],
        offset: usize,
    ) -> Result<()> {
        self.overwrite_record(worker, &normalize_key(key), payload, offset)
    }

    pub fn delete_normalized(self: &Arc<Self>, worker: &mut Worker, key: u64) -> Result<()> {
        self.delete_record(worker, &normalize_key(key))
    }

    /// Keys present and live, in order. Diagnostics only.
    pub fn live_keys(&self) -> Vec<Box<[u8]>> {
        let index = self.index.read();
        let mut keys = Vec::new();
        for (key, record) in index.iter() {
            if !record.owner_id().is_deleted() {
                keys.push(key.clone());
            }
        }
        keys
    }
}

impl std::fmt::Debug for OrderedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedStorage")
            .field("id", &self.id)
            .field("name", &self.meta.name)
            .field("records", &self.record_count())
            .field("dropped", &self.is_dropped())
            .finish()
    }
}
