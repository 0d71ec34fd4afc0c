//! # pactdb - In-Memory OLTP Transactional Core
//!
//! pactdb is the transaction heart of an in-memory, many-core OLTP storage
//! engine: epoch-based optimistic concurrency control with serializable
//! isolation, record-level key-locks held only for the commit apply window,
//! and write-ahead log dispatch. The design prioritizes:
//!
//! - **Lock-free execution**: transactions take no locks while running;
//!   all synchronization happens inside the commit protocol
//! - **One shared clock**: a single epoch counter serializes commits and
//!   doubles as the unit of durability
//! - **Worker-private memory**: read sets, write sets, and log buffers are
//!   owned per worker core, with no cross-core sharing
//!
//! ## Quick Start
//!
//! ```ignore
//! use pactdb::{Config, Engine, IsolationLevel, StorageMeta};
//!
//! let engine = Engine::new(Config::default())?;
//! engine.initialize()?;
//!
//! let mut worker = engine.attach_worker()?;
//! let storage = engine.storage_manager().create_storage(
//!     &engine, &mut worker, StorageMeta::new("accounts", 64))?;
//!
//! engine.xct_manager().begin_xct(&mut worker, IsolationLevel::Serializable)?;
//! storage.insert_normalized(&mut worker, 42, b"hello")?;
//! let epoch = engine.xct_manager().precommit_xct(&mut worker)?;
//! engine.xct_manager().wait_for_commit(epoch, None)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Engine (no globals)           │
//! ├─────────────────────────────────────────┤
//! │  XctManager: begin / precommit / abort   │
//! ├──────────────┬──────────────────────────┤
//! │  EpochClock  │  LogManager (durability)  │
//! ├──────────────┴──────────────────────────┤
//! │  Ordered storages + atomic owner ids     │
//! ├─────────────────────────────────────────┤
//! │  Per-worker: Xct, log buffer, page chunk │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Commit protocol
//!
//! A committing worker sorts its write set into one global order, takes
//! every record's key-lock, latches the commit epoch between full fences,
//! verifies its read set, and applies the buffered log entries. Each apply
//! publishes the freshly issued owner identifier last, with release
//! ordering, which simultaneously releases the key-lock. Losing a race
//! costs a `RaceAbort`; retrying is always safe.
//!
//! ## Module Overview
//!
//! - [`xct`]: commit protocol, epoch clock, transaction contexts
//! - [`log`]: log types, per-worker buffers, apply dispatch, durability
//! - [`storage`]: ordered key-value storages and their registry
//! - [`memory`]: shared page pool and worker-private chunks
//! - [`engine`]: component wiring and lifecycle
//! - [`config`]: runtime sizing

pub mod config;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod log;
pub mod memory;
pub mod savepoint;
pub mod storage;
pub mod worker;
pub mod xct;

pub use config::Config;
pub use engine::Engine;
pub use epoch::Epoch;
pub use error::{Result, XctError};
pub use storage::{OrderedStorage, StorageMeta};
pub use worker::Worker;
pub use xct::{IsolationLevel, XctId, XctManager};
