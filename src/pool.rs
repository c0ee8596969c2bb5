//! Bounded packet-buffer pool.
//!
//! Buffers are pre-built at startup; nothing on the data path allocates
//! packet memory. A min-heap of free indices hands out the lowest free index
//! first, which keeps hot buffers clustered and test behavior deterministic.

use crate::context::Context;
use crate::error::{Error, Result};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

/// One packet buffer: a pool index plus the context (and byte storage) that
/// travels with the packet. Exclusively owned by one worker while in flight.
pub struct Buffer {
    id: u32,
    pub ctx: Context,
}

impl Buffer {
    fn new(id: u32, buffer_size: usize, metadata_size: usize) -> Self {
        Self {
            id,
            ctx: Context::new(buffer_size, metadata_size),
        }
    }

    /// Pool index of this buffer.
    pub fn id(&self) -> u32 {
        self.id
    }
}

struct Inner {
    slots: Vec<Option<Buffer>>,
    free: BinaryHeap<Reverse<u32>>,
}

/// Fixed-capacity buffer pool. `alloc` and `dealloc` are mutually exclusive
/// under a single mutex; both are O(log n) on the free heap.
pub struct Pool {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Pool {
    pub fn new(capacity: usize, buffer_size: usize, metadata_size: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = BinaryHeap::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Some(Buffer::new(i as u32, buffer_size, metadata_size)));
            free.push(Reverse(i as u32));
        }
        Self {
            inner: Mutex::new(Inner { slots, free }),
            capacity,
        }
    }

    /// Takes the buffer with the lowest free index. Fails with `Exhausted`
    /// when none is free; callers drop the packet rather than block.
    pub fn alloc(&self) -> Result<Buffer> {
        let mut inner = self.inner.lock().unwrap();
        let Reverse(id) = inner
            .free
            .pop()
            .ok_or(Error::Exhausted("buffer pool"))?;
        let mut buffer = inner.slots[id as usize]
            .take()
            .expect("free index with occupied slot");
        buffer.ctx.reset();
        Ok(buffer)
    }

    /// Returns a buffer to the pool. Returning a buffer that did not come
    /// from this pool (or one already returned) is a programmer error and is
    /// reported rather than corrupting the free heap.
    pub fn dealloc(&self, buffer: Buffer) -> Result<()> {
        let id = buffer.id;
        if id as usize >= self.capacity {
            return Err(Error::Unknown {
                what: "buffer index",
                id: id.to_string(),
            });
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.slots[id as usize].is_some() {
            return Err(Error::Unknown {
                what: "allocated buffer index",
                id: id.to_string(),
            });
        }
        inner.slots[id as usize] = Some(buffer);
        inner.free.push(Reverse(id));
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free buffers right now.
    pub fn free_count(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }

    /// Number of buffers currently out with workers.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.free_count()
    }
}
