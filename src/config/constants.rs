//! # Core Constants
//!
//! Compile-time values shared across modules. Anything a deployment might
//! want to change lives in [`crate::config::Config`] instead.

/// Size of one page frame in the shared pool, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// All log entry lengths are rounded up to this alignment so a ring
/// boundary gap can always be covered by a filler entry.
pub const LOG_ALIGN: usize = 8;

/// Hard cap on one log entry including its header. Lengths are encoded in
/// a `u16`, and even the smallest (test) log buffer must hold two maximal
/// entries, which bounds this well below the `u16` ceiling.
pub const MAX_LOG_LENGTH: usize = 1 << 15;

/// Hard cap on a record payload. A record-insert entry must carry the full
/// payload plus a maximal key and still fit in `MAX_LOG_LENGTH`.
pub const MAX_RECORD_PAYLOAD: usize = 1 << 14;

/// Hard cap on a storage key.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Default sleep interval of the epoch-advance thread.
pub const DEFAULT_EPOCH_ADVANCE_INTERVAL_MS: u64 = 20;

/// Spins in a key-lock acquire loop before the thread yields.
pub const KEYLOCK_SPINS_BEFORE_YIELD: u32 = 64;

const _: () = assert!(MAX_LOG_LENGTH % LOG_ALIGN == 0);
const _: () = assert!(LOG_ALIGN.is_power_of_two());
// header (8) + insert body (8) + max key + max payload must fit one entry
const _: () = assert!(16 + MAX_KEY_LENGTH + MAX_RECORD_PAYLOAD <= MAX_LOG_LENGTH);
