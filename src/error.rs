//! # Error Taxonomy
//!
//! Every recoverable and fatal condition the transactional core can report,
//! collected in a single enum so that callers can match on the kind.
//!
//! ## Recovery contract
//!
//! - [`XctError::RaceAbort`]: the transaction has already been deactivated
//!   and its log bytes discarded. Retrying the whole transaction is safe and
//!   is the expected reaction.
//! - [`XctError::ReadSetOverflow`] / [`XctError::WriteSetOverflow`]: the
//!   transaction is still active but cannot grow its footprint; the caller
//!   must abort (and may retry with a split workload).
//! - [`XctError::AlreadyRunning`] / [`XctError::NoTransaction`]: lifecycle
//!   misuse; transaction state is unchanged.
//! - Everything else is surfaced to the worker's session unchanged.

use crate::storage::StorageId;

/// Result alias used throughout the transactional core.
pub type Result<T> = std::result::Result<T, XctError>;

/// Errors reported by the transaction manager, log subsystem, and the
/// storage operations that feed them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XctError {
    /// `begin` was called while a transaction is already active on this worker.
    #[error("a transaction is already running on this worker")]
    AlreadyRunning,

    /// A transactional operation was attempted with no active transaction.
    #[error("no active transaction on this worker")]
    NoTransaction,

    /// The read set reached its configured capacity.
    #[error("read set full (max {limit} entries)")]
    ReadSetOverflow { limit: u32 },

    /// The write set reached its configured capacity.
    #[error("write set full (max {limit} entries)")]
    WriteSetOverflow { limit: u32 },

    /// Commit-time verification failed; the transaction lost a race and has
    /// been aborted. Retry is safe.
    #[error("transaction aborted due to a concurrent conflict")]
    RaceAbort,

    /// A buffered log entry carries a type code the registry does not know.
    #[error("invalid log type code {code}")]
    InvalidLogType { code: u16 },

    /// A schema transaction buffered a per-record log entry.
    #[error("log type code {code} is not allowed in a schema transaction")]
    InvalidLogTypeInSchemaXct { code: u16 },

    /// `wait_for_commit` expired before the epoch became durable.
    #[error("timed out waiting for durability")]
    Timeout,

    /// A module was used before its dependency finished initializing, or
    /// torn down out of order.
    #[error("dependent module unavailable: {module}")]
    DependentModuleUnavailable { module: &'static str },

    /// No record exists under the given key (or it is logically deleted).
    #[error("key not found")]
    KeyNotFound,

    /// An insert hit a live record under the same key.
    #[error("key already exists")]
    KeyAlreadyExists,

    /// Payload exceeds the storage's fixed record capacity.
    #[error("payload of {got} bytes exceeds record capacity {capacity}")]
    PayloadTooLarge { got: usize, capacity: usize },

    /// Key exceeds the engine-wide key length cap.
    #[error("key of {got} bytes exceeds the {limit} byte limit")]
    KeyTooLong { got: usize, limit: usize },

    /// The worker's log buffer cannot hold the entry.
    #[error("thread log buffer full (need {needed} bytes, {free} free)")]
    LogBufferFull { needed: usize, free: usize },

    /// The shared page pool has no free frames left.
    #[error("page pool exhausted")]
    PagePoolExhausted,

    /// No storage is registered under the given id.
    #[error("storage {0} not found")]
    StorageNotFound(StorageId),
}
