//! # Worker
//!
//! A worker owns everything one core needs to run transactions: its
//! transaction context, its log buffer, and its private page-frame chunk.
//! Nothing here is shared with other workers; the only cross-worker state
//! is the [`WorkerControl`] handle the log writers watch.

use std::sync::Arc;

use crate::engine::Engine;
use crate::epoch::AtomicEpoch;
use crate::error::Result;
use crate::log::thread_buffer::{BufferCursors, ThreadLogBuffer};
use crate::memory::WorkerMemory;
use crate::xct::xct::Xct;
use crate::xct::xct_id::ThreadId;

/// The shared face of a worker: what the log manager needs to compute the
/// durable epoch (the in-commit marker) and to flush the worker's buffer
/// (its cursors).
pub struct WorkerControl {
    thread_id: ThreadId,
    in_commit_epoch: AtomicEpoch,
    cursors: Arc<BufferCursors>,
}

impl WorkerControl {
    pub(crate) fn new(thread_id: ThreadId, cursors: Arc<BufferCursors>) -> Arc<WorkerControl> {
        Arc::new(WorkerControl {
            thread_id,
            in_commit_epoch: AtomicEpoch::default(),
            cursors,
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Conservative estimate of the epoch this worker may still publish
    /// log bytes for; invalid when no commit is in flight.
    pub fn in_commit_epoch(&self) -> &AtomicEpoch {
        &self.in_commit_epoch
    }

    pub fn cursors(&self) -> &Arc<BufferCursors> {
        &self.cursors
    }

    #[cfg(test)]
    pub(crate) fn for_tests(thread_id: ThreadId) -> Arc<WorkerControl> {
        WorkerControl::new(thread_id, Arc::new(BufferCursors::default()))
    }
}

impl std::fmt::Debug for WorkerControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerControl")
            .field("thread_id", &self.thread_id)
            .field("in_commit_epoch", &self.in_commit_epoch.load_weak())
            .finish()
    }
}

/// A worker core's private state. Created by [`Engine::attach_worker`];
/// detaching (dropping) releases its page frames and unregisters it from
/// the log manager.
pub struct Worker {
    engine: Arc<Engine>,
    thread_id: ThreadId,
    xct: Xct,
    log_buffer: ThreadLogBuffer,
    memory: WorkerMemory,
    control: Arc<WorkerControl>,
}

impl Worker {
    pub(crate) fn new(engine: Arc<Engine>, thread_id: ThreadId) -> Result<Worker> {
        let config = engine.config().clone();
        let log_buffer = ThreadLogBuffer::new(config.thread_buffer_size);
        let control = WorkerControl::new(thread_id, log_buffer.cursors());
        let memory = WorkerMemory::new(
            Arc::clone(engine.page_pool()),
            config.private_page_pool_initial_grab,
        )?;
        let xct = Xct::new(thread_id, config.max_read_set_size, config.max_write_set_size);
        engine.log_manager().register_worker(Arc::clone(&control));
        Ok(Worker {
            engine,
            thread_id,
            xct,
            log_buffer,
            memory,
            control,
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn xct(&self) -> &Xct {
        &self.xct
    }

    pub(crate) fn xct_mut(&mut self) -> &mut Xct {
        &mut self.xct
    }

    pub fn log_buffer(&self) -> &ThreadLogBuffer {
        &self.log_buffer
    }

    pub(crate) fn log_buffer_mut(&mut self) -> &mut ThreadLogBuffer {
        &mut self.log_buffer
    }

    /// Split borrow for the commit path, which walks the write set while
    /// reading entries out of the log buffer.
    pub(crate) fn xct_and_buffer_mut(&mut self) -> (&mut Xct, &mut ThreadLogBuffer) {
        (&mut self.xct, &mut self.log_buffer)
    }

    pub(crate) fn control(&self) -> &Arc<WorkerControl> {
        &self.control
    }

    pub fn memory(&self) -> &WorkerMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut WorkerMemory {
        &mut self.memory
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.engine.log_manager().unregister_worker(&self.control);
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("thread_id", &self.thread_id)
            .field("xct", &self.xct)
            .field("log_buffer", &self.log_buffer)
            .finish()
    }
}
