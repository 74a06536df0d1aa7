//! Memory pool interface for packet arenas.
//!
//! Packet buffers can source their arenas from a pool instead of the global
//! allocator. The pool is opaque to the protocol layer: it only needs to hand
//! out blocks of at least the requested size and take them back later.
//!
//! ```rust
//! use razwire_protocol::{PacketBuffer, RecyclingPool};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(RecyclingPool::new());
//! let buffer = PacketBuffer::from_pool(512, pool.clone()).unwrap();
//! drop(buffer); // arena goes back to the pool
//! assert_eq!(pool.available(), 1);
//! ```

use parking_lot::Mutex;

/// Default number of idle blocks a [`RecyclingPool`] keeps.
const DEFAULT_MAX_IDLE: usize = 64;

/// Source of byte blocks for packet arenas.
pub trait MemoryPool: Send + Sync {
    /// Returns a block of at least `size` bytes, or `None` if exhausted.
    fn allocate(&self, size: usize) -> Option<Box<[u8]>>;

    /// Takes back a block previously returned by [`MemoryPool::allocate`].
    fn deallocate(&self, block: Box<[u8]>);
}

/// Pass-through pool backed by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapPool;

impl MemoryPool for HeapPool {
    fn allocate(&self, size: usize) -> Option<Box<[u8]>> {
        Some(vec![0u8; size].into_boxed_slice())
    }

    fn deallocate(&self, block: Box<[u8]>) {
        drop(block);
    }
}

/// Free-list pool that keeps released blocks for reuse.
#[derive(Debug)]
pub struct RecyclingPool {
    idle: Mutex<Vec<Box<[u8]>>>,
    max_idle: usize,
}

impl RecyclingPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Creates a pool that keeps at most `max_idle` released blocks.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Number of idle blocks ready for reuse.
    pub fn available(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Default for RecyclingPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool for RecyclingPool {
    fn allocate(&self, size: usize) -> Option<Box<[u8]>> {
        let mut idle = self.idle.lock();
        if let Some(pos) = idle.iter().position(|block| block.len() >= size) {
            return Some(idle.swap_remove(pos));
        }
        drop(idle);
        Some(vec![0u8; size].into_boxed_slice())
    }

    fn deallocate(&self, block: Box<[u8]>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(block);
        } else {
            tracing::trace!("Pool full, releasing {} byte block", block.len());
        }
    }
}
