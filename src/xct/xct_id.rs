//! # Owner Identifier
//!
//! Every record carries a 64-bit owner identifier naming the transaction
//! that last wrote it, plus the record's lock and delete state. The word is
//! the only cross-worker shared mutable state in the protocol, so all
//! access goes through the atomic [`OwnerId`] wrapper.
//!
//! ## Binary Layout (64 bits)
//!
//! ```text
//! +-----------+-----------+-----------+---------+
//! | Epoch     | Ordinal   | ThreadId  | Status  |
//! | (28 bits) | (16 bits) | (16 bits) | (4 bits)|
//! +-----------+-----------+-----------+---------+
//!  63       36 35       20 19        4 3       0
//! ```
//!
//! ## Status bits
//!
//! ```text
//! Bit 3: KEYLOCK_BIT - record is locked by a committing writer
//! Bit 1: DELETE_BIT  - record is logically deleted (tombstone)
//! Bits 2, 0: reserved
//! ```
//!
//! ## Ordering
//!
//! The top 60 bits (epoch, ordinal, thread) define the serialization order
//! of transactions. Status bits are transient record state, so every order
//! comparison masks them out: [`XctId::equals_serial_order`] and
//! [`XctId::before`] ignore them, [`XctId::equals_all`] does not.
//!
//! ## Lock protocol
//!
//! The key-lock bit doubles as the record mutex during the commit apply
//! window. Acquisition spins on a compare-exchange (the global write-set
//! order makes deadlock impossible, so there is no try/timeout variant).
//! Release is not a separate unlock: the committing writer publishes the
//! freshly issued identifier, whose status bits are zero, with release
//! ordering, which simultaneously drops the lock and makes the new payload
//! visible.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::KEYLOCK_SPINS_BEFORE_YIELD;
use crate::epoch::{Epoch, EpochInt};

/// Identifies a worker core. One transaction context exists per worker.
pub type ThreadId = u16;

/// Position of a committed transaction within one thread × epoch.
pub type XctOrdinal = u16;

const SHIFT_EPOCH: u32 = 36;
const SHIFT_ORDINAL: u32 = 20;
const SHIFT_THREAD: u32 = 4;

const MASK_EPOCH: u64 = 0xFFFF_FFF0_0000_0000;
const MASK_ORDINAL: u64 = 0x0000_000F_FFF0_0000;
const MASK_THREAD: u64 = 0x0000_0000_000F_FFF0;
/// Epoch, ordinal, and thread id together; everything that serializes.
const MASK_SERIAL: u64 = 0xFFFF_FFFF_FFFF_FFF0;

pub const KEYLOCK_BIT: u64 = 0x8;
pub const DELETE_BIT: u64 = 0x2;
const MASK_STATUS: u64 = 0xF;

/// Isolation requested at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// No read-set tracking at all; reads may observe in-flight changes.
    DirtyRead,
    /// Reads skip verification; may observe stale but committed data.
    SnapshotRead,
    /// Full optimistic verification; protects against all anomalies.
    #[default]
    Serializable,
}

/// A transaction identifier / record version, packed into one word.
///
/// Plain value type; the atomic shared form is [`OwnerId`].
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct XctId(u64);

impl XctId {
    /// The all-zero id: invalid epoch, no status bits.
    pub const ZERO: XctId = XctId(0);

    /// Builds an id with the given serial position and all status bits off.
    pub fn new_clean(epoch: Epoch, ordinal: XctOrdinal, thread: ThreadId) -> XctId {
        XctId(
            ((epoch.value() as u64) << SHIFT_EPOCH)
                | ((ordinal as u64) << SHIFT_ORDINAL)
                | ((thread as u64) << SHIFT_THREAD),
        )
    }

    pub fn from_raw(raw: u64) -> XctId {
        XctId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn epoch(self) -> Epoch {
        Epoch::from_int(((self.0 & MASK_EPOCH) >> SHIFT_EPOCH) as EpochInt)
    }

    pub fn ordinal(self) -> XctOrdinal {
        ((self.0 & MASK_ORDINAL) >> SHIFT_ORDINAL) as XctOrdinal
    }

    pub fn thread_id(self) -> ThreadId {
        ((self.0 & MASK_THREAD) >> SHIFT_THREAD) as ThreadId
    }

    /// An id is valid once it carries a valid epoch.
    pub fn is_valid(self) -> bool {
        self.0 & MASK_EPOCH != 0
    }

    pub fn is_keylocked(self) -> bool {
        self.0 & KEYLOCK_BIT != 0
    }

    pub fn is_deleted(self) -> bool {
        self.0 & DELETE_BIT != 0
    }

    pub fn is_status_clear(self) -> bool {
        self.0 & MASK_STATUS == 0
    }

    pub fn with_deleted(self) -> XctId {
        XctId(self.0 | DELETE_BIT)
    }

    pub fn without_status(self) -> XctId {
        XctId(self.0 & MASK_SERIAL)
    }

    /// Equality over (epoch, ordinal, thread), ignoring status bits.
    pub fn equals_serial_order(self, other: XctId) -> bool {
        (self.0 & MASK_SERIAL) == (other.0 & MASK_SERIAL)
    }

    /// Full-word equality, status bits included.
    pub fn equals_all(self, other: XctId) -> bool {
        self.0 == other.0
    }

    /// Serialization order: an invalid id is before everything; otherwise
    /// the epoch is compared with wrap-around care and the rest as plain
    /// integers.
    pub fn before(self, other: XctId) -> bool {
        debug_assert!(other.is_valid());
        if self.epoch() == other.epoch() {
            (self.0 & MASK_SERIAL) < (other.0 & MASK_SERIAL)
        } else {
            self.epoch().before(other.epoch())
        }
    }

    /// `*self = max(*self, other)` in `before` order. Status bits of the
    /// winner are preserved as-is; callers only use this on clean ids.
    pub fn store_max(&mut self, other: XctId) {
        if self.before(other) {
            *self = other;
        }
    }
}

impl std::fmt::Debug for XctId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XctId")
            .field("epoch", &self.epoch())
            .field("ordinal", &self.ordinal())
            .field("thread", &self.thread_id())
            .field("keylock", &self.is_keylocked())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

/// The atomically shared owner-identifier word stored in every record.
#[derive(Debug)]
pub struct OwnerId(AtomicU64);

impl OwnerId {
    pub fn new(id: XctId) -> OwnerId {
        OwnerId(AtomicU64::new(id.raw()))
    }

    pub fn load_acquire(&self) -> XctId {
        XctId(self.0.load(Ordering::Acquire))
    }

    pub fn load_weak(&self) -> XctId {
        XctId(self.0.load(Ordering::Relaxed))
    }

    pub fn is_keylocked(&self) -> bool {
        self.0.load(Ordering::Relaxed) & KEYLOCK_BIT != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.0.load(Ordering::Relaxed) & DELETE_BIT != 0
    }

    /// Unconditional release store, used for ids not guarded by the
    /// key-lock protocol (storage metadata, test setup).
    pub fn store_release(&self, id: XctId) {
        self.0.store(id.raw(), Ordering::Release);
    }

    /// Sets the key-lock bit, spinning until it wins the compare-exchange.
    ///
    /// Callers must acquire locks in the global write-set order; that order
    /// is what makes the unbounded spin deadlock-free.
    pub fn keylock_unconditional(&self) {
        let mut spins = 0u32;
        loop {
            let observed = self.0.load(Ordering::Relaxed);
            let expected = observed & !KEYLOCK_BIT;
            let desired = expected | KEYLOCK_BIT;
            if observed & KEYLOCK_BIT == 0
                && self
                    .0
                    .compare_exchange_weak(expected, desired, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                debug_assert!(self.is_keylocked());
                return;
            }
            spins += 1;
            if spins >= KEYLOCK_SPINS_BEFORE_YIELD {
                spins = 0;
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Clears only the lock bit, preserving the rest of the word.
    ///
    /// Used on the abort path; a successful commit releases the lock by
    /// publishing the new id instead.
    pub fn release_keylock(&self) {
        debug_assert!(self.is_keylocked());
        let current = self.0.load(Ordering::Relaxed);
        self.0.store(current & !KEYLOCK_BIT, Ordering::Release);
    }

    /// Publishes the word written by a commit apply: the new identifier
    /// becomes visible and the key-lock drops in the same release store.
    pub fn publish(&self, new_id: XctId) {
        debug_assert!(self.is_keylocked());
        debug_assert!(!new_id.is_keylocked());
        self.0.store(new_id.raw(), Ordering::Release);
    }

    /// Variant of [`OwnerId::publish`] for delete applies: the published
    /// word carries the delete bit.
    pub fn publish_deleted(&self, new_id: XctId) {
        debug_assert!(self.is_keylocked());
        debug_assert!(new_id.is_status_clear());
        self.0.store(new_id.with_deleted().raw(), Ordering::Release);
    }

    /// Busy-waits until the lock bit is clear. Read paths use this before
    /// recording an observation.
    pub fn spin_while_keylocked(&self) {
        while self.is_keylocked() {
            std::hint::spin_loop();
        }
        std::sync::atomic::fence(Ordering::Acquire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn clean_id_roundtrips_fields() {
        let id = XctId::new_clean(Epoch::from_int(77), 12, 5);
        assert_eq!(id.epoch(), Epoch::from_int(77));
        assert_eq!(id.ordinal(), 12);
        assert_eq!(id.thread_id(), 5);
        assert!(id.is_status_clear());
        assert!(id.is_valid());
    }

    #[test]
    fn zero_id_is_invalid() {
        assert!(!XctId::ZERO.is_valid());
        assert!(XctId::ZERO.is_status_clear());
    }

    #[test]
    fn max_fields_roundtrip() {
        let id = XctId::new_clean(Epoch::from_int((1 << 28) - 1), u16::MAX, u16::MAX);
        assert_eq!(id.epoch(), Epoch::from_int((1 << 28) - 1));
        assert_eq!(id.ordinal(), u16::MAX);
        assert_eq!(id.thread_id(), u16::MAX);
        assert!(id.is_status_clear());
    }

    #[test]
    fn serial_order_ignores_status() {
        let clean = XctId::new_clean(Epoch::from_int(3), 1, 1);
        let deleted = clean.with_deleted();
        assert!(clean.equals_serial_order(deleted));
        assert!(!clean.equals_all(deleted));
        assert!(deleted.is_deleted());
        assert!(!clean.is_deleted());
    }

    #[test]
    fn without_status_clears_all_bits() {
        let id = XctId::from_raw(XctId::new_clean(Epoch::from_int(3), 1, 1).raw() | KEYLOCK_BIT | DELETE_BIT);
        assert!(!id.is_status_clear());
        assert!(id.without_status().is_status_clear());
        assert!(id.equals_serial_order(id.without_status()));
    }

    #[test]
    fn before_orders_by_epoch_then_ordinal_then_thread() {
        let a = XctId::new_clean(Epoch::from_int(2), 9, 9);
        let b = XctId::new_clean(Epoch::from_int(3), 1, 1);
        assert!(a.before(b));
        assert!(!b.before(a));

        let c = XctId::new_clean(Epoch::from_int(3), 2, 0);
        assert!(b.before(c));

        let d = XctId::new_clean(Epoch::from_int(3), 2, 1);
        assert!(c.before(d));
    }

    #[test]
    fn invalid_id_is_before_any_valid() {
        let valid = XctId::new_clean(Epoch::from_int(1), 1, 0);
        assert!(XctId::ZERO.before(valid));
    }

    #[test]
    fn store_max_keeps_newest() {
        let mut id = XctId::new_clean(Epoch::from_int(5), 3, 0);
        id.store_max(XctId::new_clean(Epoch::from_int(5), 2, 0));
        assert_eq!(id.ordinal(), 3);
        id.store_max(XctId::new_clean(Epoch::from_int(6), 1, 0));
        assert_eq!(id.epoch(), Epoch::from_int(6));
    }

    #[test]
    fn keylock_sets_and_releases_bit() {
        let owner = OwnerId::new(XctId::new_clean(Epoch::from_int(1), 1, 0));
        assert!(!owner.is_keylocked());
        owner.keylock_unconditional();
        assert!(owner.is_keylocked());
        owner.release_keylock();
        assert!(!owner.is_keylocked());
        assert!(owner
            .load_acquire()
            .equals_all(XctId::new_clean(Epoch::from_int(1), 1, 0)));
    }

    #[test]
    fn publish_replaces_word_and_unlocks() {
        let owner = OwnerId::new(XctId::new_clean(Epoch::from_int(1), 1, 0));
        owner.keylock_unconditional();
        let new_id = XctId::new_clean(Epoch::from_int(2), 1, 3);
        owner.publish(new_id);
        assert!(!owner.is_keylocked());
        assert!(owner.load_acquire().equals_all(new_id));
    }

    #[test]
    fn release_preserves_delete_bit() {
        let owner = OwnerId::new(XctId::new_clean(Epoch::from_int(1), 1, 0).with_deleted());
        owner.keylock_unconditional();
        owner.release_keylock();
        assert!(owner.load_acquire().is_deleted());
        assert!(!owner.is_keylocked());
    }

    #[test]
    fn keylock_excludes_concurrent_holders() {
        let owner = Arc::new(OwnerId::new(XctId::new_clean(Epoch::from_int(1), 1, 0)));
        let mut handles = Vec::new();
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        for _ in 0..4 {
            let owner = Arc::clone(&owner);
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    owner.keylock_unconditional();
                    let inside = counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(inside, 0, "two threads inside the key-lock");
                    counter.fetch_sub(1, Ordering::SeqCst);
                    owner.release_keylock();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!owner.is_keylocked());
    }
}
