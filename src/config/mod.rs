//! # Configuration
//!
//! Runtime sizing for the transactional core. Interdependent values are
//! co-located here and their relationships documented, so a change to one
//! knob cannot silently invalidate another.
//!
//! ## Dependency notes
//!
//! ```text
//! thread_buffer_size
//!       │
//!       └─> Must hold every log entry of one transaction plus a filler at
//!           the ring boundary. Entries are capped at MAX_LOG_LENGTH, so
//!           thread_buffer_size >= 2 * MAX_LOG_LENGTH is required.
//!
//! page_pool_pages
//!       │
//!       └─> private_page_pool_initial_grab * workers must not exceed it,
//!           or late workers fail to attach.
//!
//! max_read_set_size / max_write_set_size
//!       │
//!       └─> Hard per-transaction footprint caps; overflow is a recoverable
//!           per-transaction error, not an engine fault.
//! ```

pub mod constants;
pub use constants::*;

use crate::epoch::{Epoch, EpochInt};

/// Engine configuration. Values are fixed at engine construction; workers
/// size their private buffers from them at attach time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum entries in a transaction's read set.
    pub max_read_set_size: u32,
    /// Maximum entries in a transaction's write set.
    pub max_write_set_size: u32,
    /// Sleep interval of the epoch-advance thread, in milliseconds.
    pub epoch_advance_interval_ms: u64,
    /// Page frames each worker grabs from the shared pool at attach time.
    pub private_page_pool_initial_grab: u32,
    /// Total page frames preallocated in the shared pool.
    pub page_pool_pages: u32,
    /// Byte capacity of each worker's log buffer ring.
    pub thread_buffer_size: usize,
    /// Epoch restored into the savepoint when none has been persisted.
    pub initial_epoch: EpochInt,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_read_set_size: 4096,
            max_write_set_size: 1024,
            epoch_advance_interval_ms: DEFAULT_EPOCH_ADVANCE_INTERVAL_MS,
            private_page_pool_initial_grab: 128,
            page_pool_pages: 4096,
            thread_buffer_size: 1 << 20,
            initial_epoch: 1,
        }
    }
}

impl Config {
    /// A deliberately small configuration for tests: short epochs, small
    /// sets, small buffers, so capacity edges are easy to reach.
    pub fn tiny() -> Self {
        Self {
            max_read_set_size: 64,
            max_write_set_size: 32,
            epoch_advance_interval_ms: 5,
            private_page_pool_initial_grab: 8,
            page_pool_pages: 64,
            thread_buffer_size: 1 << 16,
            initial_epoch: 1,
        }
    }

    pub fn initial_epoch(&self) -> Epoch {
        Epoch::from_int(self.initial_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_buffer_holds_two_max_entries() {
        let config = Config::default();
        assert!(config.thread_buffer_size >= 2 * MAX_LOG_LENGTH);
    }

    #[test]
    fn tiny_buffer_holds_two_max_entries() {
        let config = Config::tiny();
        assert!(config.thread_buffer_size >= 2 * MAX_LOG_LENGTH);
    }

    #[test]
    fn tiny_is_smaller_than_default() {
        let tiny = Config::tiny();
        let default = Config::default();
        assert!(tiny.max_read_set_size < default.max_read_set_size);
        assert!(tiny.max_write_set_size < default.max_write_set_size);
        assert!(tiny.thread_buffer_size < default.thread_buffer_size);
    }

    #[test]
    fn initial_epoch_is_valid() {
        assert!(Config::default().initial_epoch().is_valid());
        assert!(Config::tiny().initial_epoch().is_valid());
    }

    #[test]
    fn tiny_initial_grab_fits_pool() {
        let config = Config::tiny();
        assert!(config.private_page_pool_initial_grab <= config.page_pool_pages);
    }
}
