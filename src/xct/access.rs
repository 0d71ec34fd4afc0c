//! # Read and Write Accesses
//!
//! Optimistic footprint entries recorded by storage operations and consumed
//! by the commit protocol: the read set is verified, the write set is
//! sorted, locked, and applied.
//!
//! ## Write-set order
//!
//! Locks are taken in one global order so concurrent committers can never
//! deadlock: primary key is the record's address, tie-broken by the entry's
//! position in the worker's log buffer. Addresses are unique per record and
//! log positions unique per worker, so the order is total across all
//! workers committing at once.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::log::thread_buffer::LogPosition;
use crate::storage::{OrderedStorage, Record};
use crate::xct::xct_id::XctId;

/// One optimistically observed read.
#[derive(Clone)]
pub struct ReadAccess {
    pub storage: Arc<OrderedStorage>,
    pub record: Arc<Record>,
    /// Owner id observed at read time; never carries the key-lock bit.
    pub observed: XctId,
}

impl ReadAccess {
    /// Strict weak ordering by record address. The read set is kept in
    /// insertion order during execution; this exists for consumers that
    /// want to batch-verify sorted.
    pub fn compare(a: &ReadAccess, b: &ReadAccess) -> Ordering {
        (Arc::as_ptr(&a.record) as usize).cmp(&(Arc::as_ptr(&b.record) as usize))
    }
}

/// One pending write: the target record plus the buffered log entry that
/// will be applied to it at commit.
#[derive(Clone)]
pub struct WriteAccess {
    pub storage: Arc<OrderedStorage>,
    pub record: Arc<Record>,
    /// Owner id observed when the write was staged.
    pub observed: XctId,
    /// Stable position of the log entry in the worker's buffer.
    pub log_position: LogPosition,
}

impl WriteAccess {
    /// Key of the global lock order.
    pub fn order_key(&self) -> (usize, LogPosition) {
        (Arc::as_ptr(&self.record) as usize, self.log_position)
    }

    /// Strict weak ordering used for the phase-1 sort and the verify-phase
    /// binary search.
    pub fn compare(a: &WriteAccess, b: &WriteAccess) -> Ordering {
        a.order_key().cmp(&b.order_key())
    }
}

impl std::fmt::Debug for ReadAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadAccess")
            .field("storage", &self.storage.id())
            .field("record", &Arc::as_ptr(&self.record))
            .field("observed", &self.observed)
            .finish()
    }
}

impl std::fmt::Debug for WriteAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAccess")
            .field("storage", &self.storage.id())
            .field("record", &Arc::as_ptr(&self.record))
            .field("observed", &self.observed)
            .field("log_position", &self.log_position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::Epoch;
    use crate::storage::{OrderedStorage, StorageMeta};

    fn make_write(storage: &Arc<OrderedStorage>, record: Arc<Record>, pos: u64) -> WriteAccess {
        WriteAccess {
            storage: Arc::clone(storage),
            record,
            observed: XctId::new_clean(Epoch::from_int(1), 1, 0),
            log_position: pos,
        }
    }

    #[test]
    fn read_access_compare_orders_by_record() {
        let storage = OrderedStorage::new(1, StorageMeta::new("t", 16));
        let records: Vec<_> = (0..8).map(|_| Record::new(16, XctId::ZERO)).collect();
        let mut set: Vec<_> = records
            .iter()
            .rev()
            .map(|r| ReadAccess {
                storage: Arc::clone(&storage),
                record: Arc::clone(r),
                observed: XctId::ZERO,
            })
            .collect();
        set.sort_unstable_by(ReadAccess::compare);
        for pair in set.windows(2) {
            assert_ne!(
                ReadAccess::compare(&pair[0], &pair[1]),
                Ordering::Greater
            );
        }
        assert_eq!(ReadAccess::compare(&set[0], &set[0]), Ordering::Equal);
    }

    #[test]
    fn compare_is_a_strict_weak_ordering() {
        let storage = OrderedStorage::new(1, StorageMeta::new("t", 16));
        let r1 = Record::new(16, XctId::ZERO);
        let r2 = Record::new(16, XctId::ZERO);

        let a = make_write(&storage, Arc::clone(&r1), 0);
        let b = make_write(&storage, Arc::clone(&r2), 8);
        let c = make_write(&storage, Arc::clone(&r1), 16);

        // irreflexive
        assert_eq!(WriteAccess::compare(&a, &a), Ordering::Equal);
        // antisymmetric
        let ab = WriteAccess::compare(&a, &b);
        assert_eq!(WriteAccess::compare(&b, &a), ab.reverse());
        // same record: log position breaks the tie
        assert_eq!(WriteAccess::compare(&a, &c), Ordering::Less);
        assert_eq!(WriteAccess::compare(&c, &a), Ordering::Greater);
    }

    #[test]
    fn sort_groups_same_record_entries() {
        let storage = OrderedStorage::new(1, StorageMeta::new("t", 16));
        let r1 = Record::new(16, XctId::ZERO);
        let r2 = Record::new(16, XctId::ZERO);

        let mut set = vec![
            make_write(&storage, Arc::clone(&r2), 24),
            make_write(&storage, Arc::clone(&r1), 16),
            make_write(&storage, Arc::clone(&r2), 0),
            make_write(&storage, Arc::clone(&r1), 8),
        ];
        set.sort_unstable_by(WriteAccess::compare);

        for pair in set.windows(2) {
            assert_ne!(
                WriteAccess::compare(&pair[0], &pair[1]),
                Ordering::Greater,
                "sort left an inversion"
            );
        }
        // entries on the same record are adjacent, ordered by log position
        let same: Vec<_> = set
            .iter()
            .filter(|w| Arc::ptr_eq(&w.record, &r1))
            .map(|w| w.log_position)
            .collect();
        assert_eq!(same, vec![8, 16]);
    }

    #[test]
    fn binary_search_finds_record_in_sorted_set() {
        let storage = OrderedStorage::new(1, StorageMeta::new("t", 16));
        let records: Vec<_> = (0..20).map(|_| Record::new(16, XctId::ZERO)).collect();
        let mut set: Vec<_> = records
            .iter()
            .enumerate()
            .map(|(i, r)| make_write(&storage, Arc::clone(r), i as u64 * 8))
            .collect();
        set.sort_unstable_by(WriteAccess::compare);

        for record in &records {
            let target = Arc::as_ptr(record) as usize;
            let found = set
                .binary_search_by(|w| (Arc::as_ptr(&w.record) as usize).cmp(&target))
                .is_ok();
            assert!(found, "sorted write set must contain every record");
        }

        let absent = Record::new(16, XctId::ZERO);
        let target = Arc::as_ptr(&absent) as usize;
        assert!(set
            .binary_search_by(|w| (Arc::as_ptr(&w.record) as usize).cmp(&target))
            .is_err());
    }
}
