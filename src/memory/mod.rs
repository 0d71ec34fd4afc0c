//! # Worker Memory
//!
//! Pre-allocated page frames shared through a central pool, with a private
//! chunk per worker so the hot path never touches the pool lock.
//!
//! ## Exchange protocol
//!
//! Each worker grabs an initial batch of frames at attach time
//! (`private_page_pool_initial_grab`). When its chunk runs dry it refills
//! half the chunk's capacity from the pool; when the chunk is full it
//! returns half to the pool. The halving keeps workers from ping-ponging
//! frames across the pool lock under alternating grab/release workloads.
//!
//! ```text
//!        ┌────────────┐   grab(half)      ┌──────────────┐
//!        │  PagePool  │ ───────────────>  │  PageChunk   │──> grab_free_page
//!        │ (shared)   │ <───────────────  │ (per worker) │<── release_free_page
//!        └────────────┘   release(half)   └──────────────┘
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::PAGE_SIZE;
use crate::error::{Result, XctError};

/// One pooled page frame.
pub type PageFrame = Box<[u8; PAGE_SIZE]>;

/// Shared pool of preallocated page frames.
pub struct PagePool {
    frames: Mutex<Vec<PageFrame>>,
    total: u32,
}

impl PagePool {
    pub fn new(pages: u32) -> Arc<PagePool> {
        let frames = (0..pages).map(|_| Box::new([0u8; PAGE_SIZE])).collect();
        Arc::new(PagePool {
            frames: Mutex::new(frames),
            total: pages,
        })
    }

    pub fn total_pages(&self) -> u32 {
        self.total
    }

    pub fn available(&self) -> usize {
        self.frames.lock().len()
    }

    /// Moves up to `count` frames into `chunk`, bounded by the chunk's
    /// remaining capacity. Errors only when the pool is completely dry.
    pub fn grab(&self, count: u32, chunk: &mut PageChunk) -> Result<()> {
        let mut frames = self.frames.lock();
        if frames.is_empty() {
            return Err(XctError::PagePoolExhausted);
        }
        let want = (count as usize)
            .min(frames.len())
            .min(chunk.capacity() - chunk.len());
        for _ in 0..want {
            chunk.push(frames.pop().expect("len checked above"));
        }
        Ok(())
    }

    /// Moves `count` frames (or all of them, if fewer) back to the pool.
    pub fn release(&self, count: u32, chunk: &mut PageChunk) {
        let mut frames = self.frames.lock();
        let give = (count as usize).min(chunk.len());
        for _ in 0..give {
            frames.push(chunk.pop().expect("len checked above"));
        }
    }
}

impl std::fmt::Debug for PagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagePool")
            .field("total", &self.total)
            .field("available", &self.available())
            .finish()
    }
}

/// A worker-private stash of frames taken from the pool.
pub struct PageChunk {
    frames: Vec<PageFrame>,
    capacity: usize,
}

impl PageChunk {
    pub fn new(capacity: usize) -> PageChunk {
        PageChunk {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    fn push(&mut self, frame: PageFrame) {
        debug_assert!(!self.is_full());
        self.frames.push(frame);
    }

    fn pop(&mut self) -> Option<PageFrame> {
        self.frames.pop()
    }
}

impl std::fmt::Debug for PageChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageChunk")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Per-worker memory binding: the private chunk plus its pool handle.
/// Frames go back to the pool when the worker detaches.
pub struct WorkerMemory {
    pool: Arc<PagePool>,
    chunk: PageChunk,
}

impl WorkerMemory {
    pub fn new(pool: Arc<PagePool>, initial_grab: u32) -> Result<WorkerMemory> {
        let capacity = (initial_grab as usize * 2).max(8);
        let mut chunk = PageChunk::new(capacity);
        pool.grab(initial_grab, &mut chunk)?;
        Ok(WorkerMemory { pool, chunk })
    }

    pub fn free_pages(&self) -> usize {
        self.chunk.len()
    }

    /// Takes one frame from the private chunk, refilling half the chunk
    /// from the pool when empty.
    pub fn grab_free_page(&mut self) -> Result<PageFrame> {
        if self.chunk.is_empty() {
            let refill = (self.chunk.capacity() / 2).max(1) as u32;
            self.pool.grab(refill, &mut self.chunk)?;
        }
        self.chunk.pop().ok_or(XctError::PagePoolExhausted)
    }

    /// Returns one frame, spilling half the chunk back when it is full.
    pub fn release_free_page(&mut self, frame: PageFrame) {
        if self.chunk.is_full() {
            let spill = (self.chunk.len() / 2).max(1) as u32;
            self.pool.release(spill, &mut self.chunk);
        }
        self.chunk.push(frame);
    }
}

impl Drop for WorkerMemory {
    fn drop(&mut self) {
        let remaining = self.chunk.len() as u32;
        self.pool.release(remaining, &mut self.chunk);
    }
}

impl std::fmt::Debug for WorkerMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerMemory")
            .field("chunk", &self.chunk)
            .finish()
    }
}
