//! # Epoch
//!
//! The coarse-grained clock tick that orders committed transactions and is
//! the unit of durability. A dedicated thread advances the global epoch
//! every few milliseconds; every commit latches the epoch current at its
//! serialization point.
//!
//! ## Representation
//!
//! An epoch is a 28-bit wrap-around counter stored in a `u32`. The value 0
//! is reserved as the invalid (unset) epoch. 28 bits leaves room for the
//! epoch to share a 64-bit owner-identifier word with the ordinal, thread
//! id, and status bits, and still represents about a year of 20ms ticks
//! before wrapping.
//!
//! ## Wrap-around ordering
//!
//! `before` compares modulo 2^28 with a half-range guard: `a` is before `b`
//! when the forward distance from `a` to `b` is less than half the epoch
//! space. Two live epochs are never compared across more than half the
//! space because all epochs in flight are within a few ticks of the global
//! clock.

use std::sync::atomic::{AtomicU32, Ordering};

/// Integer type backing an epoch value.
pub type EpochInt = u32;

/// Number of significant bits in an epoch value.
pub const EPOCH_BITS: u32 = 28;

/// Exclusive upper bound of the epoch space.
pub const EPOCH_INT_OVERFLOW: EpochInt = 1 << EPOCH_BITS;

/// Half of the epoch space; the modular comparison guard.
pub const EPOCH_INT_HALF: EpochInt = 1 << (EPOCH_BITS - 1);

/// A 28-bit wrap-around epoch. Zero is the reserved invalid value.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Epoch(EpochInt);

impl Epoch {
    /// The invalid (unset) epoch.
    pub const INVALID: Epoch = Epoch(0);

    /// Wraps a raw integer. Debug-asserts the value is inside the epoch space.
    pub fn from_int(value: EpochInt) -> Epoch {
        debug_assert!(value < EPOCH_INT_OVERFLOW);
        Epoch(value)
    }

    pub fn value(self) -> EpochInt {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The successor epoch, wrapping around and skipping the invalid value.
    pub fn one_more(self) -> Epoch {
        let next = (self.0 + 1) % EPOCH_INT_OVERFLOW;
        if next == 0 {
            Epoch(1)
        } else {
            Epoch(next)
        }
    }

    /// The predecessor epoch. Stepping back from the first valid epoch
    /// yields the invalid epoch rather than wrapping.
    pub fn one_less(self) -> Epoch {
        debug_assert!(self.is_valid());
        Epoch(self.0 - 1)
    }

    /// Modular less-than with the half-range guard.
    ///
    /// An invalid epoch is before every valid epoch.
    pub fn before(self, other: Epoch) -> bool {
        debug_assert!(other.is_valid());
        if !self.is_valid() {
            return true;
        }
        let forward = (other.0.wrapping_sub(self.0)) % EPOCH_INT_OVERFLOW;
        forward != 0 && forward < EPOCH_INT_HALF
    }

    /// `*self = max(*self, other)` in `before` order.
    pub fn store_max(&mut self, other: Epoch) {
        if !other.is_valid() {
            return;
        }
        if self.before(other) {
            *self = other;
        }
    }

    /// The smaller of two epochs in `before` order. Invalid inputs lose.
    pub fn min_valid(self, other: Epoch) -> Epoch {
        if !self.is_valid() {
            return other;
        }
        if !other.is_valid() {
            return self;
        }
        if self.before(other) {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Debug for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "Epoch({})", self.0)
        } else {
            write!(f, "Epoch(invalid)")
        }
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Atomically shared epoch cell, used for the global clock and the durable
/// epoch oracle.
#[derive(Debug, Default)]
pub struct AtomicEpoch(AtomicU32);

impl AtomicEpoch {
    pub fn new(epoch: Epoch) -> AtomicEpoch {
        AtomicEpoch(AtomicU32::new(epoch.value()))
    }

    pub fn load_acquire(&self) -> Epoch {
        Epoch(self.0.load(Ordering::Acquire))
    }

    /// Relaxed load for sites that tolerate staleness.
    pub fn load_weak(&self) -> Epoch {
        Epoch(self.0.load(Ordering::Relaxed))
    }

    pub fn store_release(&self, epoch: Epoch) {
        self.0.store(epoch.value(), Ordering::Release);
    }

    /// Monotonically raises the stored epoch to `epoch` if it is newer.
    /// Returns true when the store happened.
    pub fn store_max(&self, epoch: Epoch) -> bool {
        if !epoch.is_valid() {
            return false;
        }
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            if !Epoch(current).before(epoch) {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                epoch.value(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_invalid() {
        assert!(!Epoch::INVALID.is_valid());
        assert!(Epoch::from_int(1).is_valid());
    }

    #[test]
    fn one_more_increments() {
        assert_eq!(Epoch::from_int(41).one_more(), Epoch::from_int(42));
    }

    #[test]
    fn one_more_wraps_past_invalid() {
        let last = Epoch::from_int(EPOCH_INT_OVERFLOW - 1);
        assert_eq!(last.one_more(), Epoch::from_int(1));
    }

    #[test]
    fn one_less_reaches_invalid() {
        assert_eq!(Epoch::from_int(1).one_less(), Epoch::INVALID);
        assert_eq!(Epoch::from_int(10).one_less(), Epoch::from_int(9));
    }

    #[test]
    fn before_is_strict() {
        let a = Epoch::from_int(5);
        let b = Epoch::from_int(6);
        assert!(a.before(b));
        assert!(!b.before(a));
        assert!(!a.before(a));
    }

    #[test]
    fn invalid_is_before_everything() {
        assert!(Epoch::INVALID.before(Epoch::from_int(1)));
        assert!(Epoch::INVALID.before(Epoch::from_int(EPOCH_INT_OVERFLOW - 1)));
    }

    #[test]
    fn before_handles_wrap_around() {
        let near_end = Epoch::from_int(EPOCH_INT_OVERFLOW - 2);
        let wrapped = near_end.one_more().one_more();
        assert!(near_end.before(wrapped));
        assert!(!wrapped.before(near_end));
    }

    #[test]
    fn store_max_keeps_newest() {
        let mut e = Epoch::from_int(10);
        e.store_max(Epoch::from_int(7));
        assert_eq!(e, Epoch::from_int(10));
        e.store_max(Epoch::from_int(12));
        assert_eq!(e, Epoch::from_int(12));
        e.store_max(Epoch::INVALID);
        assert_eq!(e, Epoch::from_int(12));
    }

    #[test]
    fn store_max_from_invalid_takes_any_valid() {
        let mut e = Epoch::INVALID;
        e.store_max(Epoch::from_int(3));
        assert_eq!(e, Epoch::from_int(3));
    }

    #[test]
    fn min_valid_prefers_older() {
        let a = Epoch::from_int(3);
        let b = Epoch::from_int(9);
        assert_eq!(a.min_valid(b), a);
        assert_eq!(b.min_valid(a), a);
        assert_eq!(Epoch::INVALID.min_valid(b), b);
        assert_eq!(b.min_valid(Epoch::INVALID), b);
    }

    #[test]
    fn atomic_epoch_store_max_is_monotonic() {
        let cell = AtomicEpoch::new(Epoch::from_int(5));
        assert!(cell.store_max(Epoch::from_int(8)));
        assert!(!cell.store_max(Epoch::from_int(6)));
        assert_eq!(cell.load_acquire(), Epoch::from_int(8));
    }

    #[test]
    fn atomic_epoch_rejects_invalid() {
        let cell = AtomicEpoch::new(Epoch::from_int(5));
        assert!(!cell.store_max(Epoch::INVALID));
        assert_eq!(cell.load_weak(), Epoch::from_int(5));
    }
}
