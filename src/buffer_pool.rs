//! Pool of fixed-size byte buffers for outgoing protocol data.
//!
//! A [`PooledBuffer`] is owned by exactly one holder at a time (the output
//! stream, then the engine while a short write is pending) and goes back to
//! its pool when dropped, which happens exactly once.

use std::mem::ManuallyDrop;
use std::sync::{Arc, LazyLock};

use crossbeam_queue::ArrayQueue;

use crate::error::{Error, Result};

const POOL_CAPACITY: usize = 128;

/// Default size of each pooled buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Global buffer pool shared by connections that don't bring their own.
pub static GLOBAL_BUFFER_POOL: LazyLock<Arc<BufferPool>> =
    LazyLock::new(|| Arc::new(BufferPool::default()));

/// A fixed-capacity byte buffer that returns itself to the pool on drop.
///
/// Bytes are appended up to [`capacity`](Self::capacity). The buffer also
/// remembers how many of its bytes were already handed to the socket, so a
/// short write can resume where it stopped.
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    inner: ManuallyDrop<Vec<u8>>,
    capacity: usize,
    flushed: usize,
}

impl PooledBuffer {
    fn new(pool: Arc<BufferPool>, buf: Vec<u8>) -> Self {
        let capacity = pool.buffer_size;
        Self {
            pool,
            inner: ManuallyDrop::new(buf),
            capacity,
            flushed: 0,
        }
    }

    /// Maximum number of bytes this buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes written into the buffer.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if nothing was written into the buffer.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns true if no more bytes fit.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.capacity
    }

    /// Append as much of `data` as fits, returning the number of bytes taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.capacity.saturating_sub(self.inner.len()));
        self.inner.extend_from_slice(&data[..n]);
        n
    }

    /// All bytes written into the buffer.
    pub fn filled(&self) -> &[u8] {
        &self.inner
    }

    /// Mutable view of the written bytes (for back-patching length fields).
    pub fn filled_mut(&mut self) -> &mut [u8] {
        &mut self.inner
    }

    /// Bytes not yet handed to the socket.
    pub fn unflushed(&self) -> &[u8] {
        &self.inner[self.flushed..]
    }

    /// Record that `n` more bytes were handed to the socket.
    pub fn advance(&mut self, n: usize) {
        self.flushed = (self.flushed + n).min(self.inner.len());
    }

    /// Returns true while some written bytes are still unflushed.
    pub fn has_remaining(&self) -> bool {
        self.flushed < self.inner.len()
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.inner.len())
            .field("capacity", &self.capacity)
            .field("flushed", &self.flushed)
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        // SAFETY: inner is never accessed after this
        let buf = unsafe { ManuallyDrop::take(&mut self.inner) };
        self.pool.release(buf);
    }
}

/// Buffer pool for reusing fixed-size byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
}

impl BufferPool {
    /// Create a pool retaining up to `capacity` idle buffers of `buffer_size` bytes.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity.max(1)),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Size of the buffers handed out by this pool.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of idle buffers currently held by the pool.
    pub fn available(&self) -> usize {
        self.buffers.len()
    }

    /// Take a buffer from the pool, allocating a new one if the pool is empty.
    ///
    /// Allocation failure is reported as an I/O error since it is fatal to the
    /// connection that needed the buffer.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledBuffer> {
        let buf = match self.buffers.pop() {
            Some(buf) => buf,
            None => {
                let mut buf = Vec::new();
                buf.try_reserve_exact(self.buffer_size).map_err(|e| {
                    Error::Io(std::io::Error::new(std::io::ErrorKind::OutOfMemory, e))
                })?;
                buf
            }
        };
        Ok(PooledBuffer::new(Arc::clone(self), buf))
    }

    fn release(&self, mut buf: Vec<u8>) {
        // Clear but preserve capacity
        buf.clear();
        if buf.capacity() < self.buffer_size {
            return;
        }
        // Ignore if pool is full
        let _ = self.buffers.push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(POOL_CAPACITY, DEFAULT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_stops_at_capacity() {
        let pool = Arc::new(BufferPool::new(4, 8));
        let mut buf = pool.acquire().unwrap();
        assert_eq!(buf.append(b"hello"), 5);
        assert_eq!(buf.append(b"world"), 3);
        assert!(buf.is_full());
        assert_eq!(buf.filled(), b"hellowor");
    }

    #[test]
    fn test_flush_progress() {
        let pool = Arc::new(BufferPool::new(4, 16));
        let mut buf = pool.acquire().unwrap();
        buf.append(b"abcdef");
        buf.advance(4);
        assert!(buf.has_remaining());
        assert_eq!(buf.unflushed(), b"ef");
        buf.advance(10);
        assert!(!buf.has_remaining());
        assert!(buf.unflushed().is_empty());
    }

    #[test]
    fn test_buffer_returns_to_pool_once() {
        let pool = Arc::new(BufferPool::new(4, 16));
        let buf = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);
        drop(buf);
        assert_eq!(pool.available(), 1);

        // Reused buffer comes back empty
        let mut buf = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);
        assert!(buf.is_empty());
        buf.append(b"xyz");
        drop(buf);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_full_pool_discards() {
        let pool = Arc::new(BufferPool::new(1, 16));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.available(), 1);
    }
}
