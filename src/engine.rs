//! # Engine
//!
//! The value that ties every component together and threads through each
//! operation. There is no global state: the epoch clock, log manager,
//! storage registry, and page pool are all owned here, and workers hold an
//! `Arc` to the engine they attached to.
//!
//! ## Module order
//!
//! Initialization is ordered — storage manager, then log manager, then
//! transaction manager — and teardown runs in reverse. The transaction
//! manager checks its dependency explicitly and fails with
//! `DependentModuleUnavailable` if the order is ever violated.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eyre::{bail, WrapErr};
use tracing::info;

use crate::config::Config;
use crate::log::manager::LogManager;
use crate::memory::PagePool;
use crate::savepoint::{Savepoint, SavepointManager};
use crate::storage::StorageManager;
use crate::worker::Worker;
use crate::xct::epoch_clock::EpochClock;
use crate::xct::manager::XctManager;
use crate::xct::xct_id::ThreadId;

pub struct Engine {
    config: Config,
    savepoint_manager: SavepointManager,
    page_pool: Arc<PagePool>,
    clock: Arc<EpochClock>,
    log_manager: Arc<LogManager>,
    storage_manager: Arc<StorageManager>,
    xct_manager: XctManager,
    next_thread_id: AtomicU16,
    initialized: AtomicBool,
}

impl Engine {
    /// Builds an engine from `config`. Nothing runs until
    /// [`Engine::initialize`].
    pub fn new(config: Config) -> eyre::Result<Arc<Engine>> {
        let savepoint_manager = SavepointManager::new(Savepoint::new(config.initial_epoch()));
        let savepoint = savepoint_manager.get_savepoint_fast();
        if !savepoint.current_epoch.is_valid() {
            bail!("savepoint holds an invalid current epoch; cannot start the epoch clock");
        }

        let page_pool = PagePool::new(config.page_pool_pages);
        let clock = Arc::new(EpochClock::new(
            savepoint.current_epoch,
            Duration::from_millis(config.epoch_advance_interval_ms),
        ));
        let log_manager = Arc::new(LogManager::new());
        log_manager.restore_durable_epoch(savepoint.current_epoch);
        let storage_manager = Arc::new(StorageManager::new());
        let xct_manager = XctManager::new(
            Arc::clone(&clock),
            Arc::clone(&log_manager),
            Arc::clone(&storage_manager),
        );

        Ok(Arc::new(Engine {
            config,
            savepoint_manager,
            page_pool,
            clock,
            log_manager,
            storage_manager,
            xct_manager,
            next_thread_id: AtomicU16::new(0),
            initialized: AtomicBool::new(false),
        }))
    }

    /// Starts the background threads and marks every module up, in
    /// dependency order.
    pub fn initialize(&self) -> eyre::Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            bail!("engine is already initialized");
        }
        info!("initializing engine");
        self.storage_manager.initialize();
        self.log_manager.start(
            Arc::clone(&self.clock),
            Duration::from_millis(self.config.epoch_advance_interval_ms),
        );
        self.xct_manager
            .initialize()
            .wrap_err("failed to initialize the transaction manager")?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Stops the background threads in reverse dependency order.
    pub fn uninitialize(&self) -> eyre::Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            bail!("engine is not initialized");
        }
        info!("uninitializing engine");
        self.xct_manager
            .uninitialize()
            .wrap_err("failed to uninitialize the transaction manager")?;
        self.log_manager.stop();
        self.storage_manager.uninitialize();
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Creates a worker bound to this engine with a fresh thread id.
    pub fn attach_worker(self: &Arc<Self>) -> eyre::Result<Worker> {
        if !self.is_initialized() {
            bail!("cannot attach a worker to an uninitialized engine");
        }
        let thread_id: ThreadId = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        Worker::new(Arc::clone(self), thread_id)
            .wrap_err_with(|| format!("failed to attach worker {thread_id}"))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn savepoint_manager(&self) -> &SavepointManager {
        &self.savepoint_manager
    }

    pub fn page_pool(&self) -> &Arc<PagePool> {
        &self.page_pool
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn storage_manager(&self) -> &Arc<StorageManager> {
        &self.storage_manager
    }

    pub fn xct_manager(&self) -> &XctManager {
        &self.xct_manager
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.initialized.load(Ordering::Acquire) {
            let _ = self.uninitialize();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("initialized", &self.is_initialized())
            .field("epoch", &self.clock.current_weak())
            .finish()
    }
}
