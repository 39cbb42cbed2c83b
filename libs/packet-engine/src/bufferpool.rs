//! A free list of fixed-size, MTU-sized datagram buffers.
//!
//! Allocation only happens on a pool miss; steady-state operation recycles
//! buffers returned by the writer task or dropped by a filtered-out packet.

use std::sync::Arc;

use parking_lot::Mutex;

/// Fixed capacity of every buffer handed out by the pool (the TUN MTU).
pub const BUFFER_SIZE: usize = 1500;

#[derive(Clone)]
pub struct BufferPool {
    free: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a buffer, allocating a new one on a pool miss. Always
    /// returned at full [`BUFFER_SIZE`] capacity.
    pub fn acquire(&self) -> PooledBuffer {
        let buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; BUFFER_SIZE]);
        debug_assert_eq!(buf.len(), BUFFER_SIZE);
        PooledBuffer {
            buf: Some(buf),
            pool: self.free.clone(),
        }
    }
}

/// A buffer on loan from a [`BufferPool`]. Returned to the pool on drop,
/// restored to full capacity. At most one owner exists at a time; this type
/// is not `Clone`, so double-return is a type error rather than a runtime
/// defect.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().expect("buffer taken before drop")
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().expect("buffer taken before drop")
    }

    /// Truncates the logical view to `len` without shrinking the backing
    /// allocation; used after a response is read into the buffer.
    pub fn truncate_view(&self, len: usize) -> &[u8] {
        &self.as_slice()[..len.min(BUFFER_SIZE)]
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.resize(BUFFER_SIZE, 0);
            self.pool.lock().push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_always_returns_full_capacity() {
        let pool = BufferPool::new();
        let buf = pool.acquire();
        assert_eq!(buf.as_slice().len(), BUFFER_SIZE);
    }

    #[test]
    fn returned_buffer_is_recycled_and_restored_to_full_capacity() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire();
            buf.as_mut_slice()[..4].copy_from_slice(&[1, 2, 3, 4]);
            // dropped here -> returned to pool, truncated view should not matter
        }
        let buf = pool.acquire();
        assert_eq!(buf.as_slice().len(), BUFFER_SIZE);
    }

    #[test]
    fn truncate_view_caps_at_buffer_size() {
        let pool = BufferPool::new();
        let buf = pool.acquire();
        assert_eq!(buf.truncate_view(BUFFER_SIZE + 100).len(), BUFFER_SIZE);
        assert_eq!(buf.truncate_view(10).len(), 10);
    }
}
