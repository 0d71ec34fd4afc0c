//! # Logging
//!
//! Write-ahead log plumbing the transaction manager runs on: per-worker
//! log buffers, the closed registry of self-describing log types, the
//! apply dispatch that materializes buffered entries at commit, and the
//! durable-epoch oracle.
//!
//! The durable log *files* are written by external log writers; what lives
//! here is everything the commit protocol touches on its own critical
//! path.

pub mod apply;
pub mod manager;
pub mod thread_buffer;
pub mod types;

pub use manager::LogManager;
pub use thread_buffer::{LogPosition, ThreadLogBuffer};
pub use types::{LogCode, LogHeader, LogKind};
