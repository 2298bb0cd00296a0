//! Fixed-count pool of reusable frame buffers.
//!
//! Receive loops mint a buffer per inbound frame and the consumer holds it
//! until the frame is dropped, so pool count bounds the memory a channel can
//! pin. Buffers grow on demand (up to the kind cap enforced by the codec)
//! and never shrink.

use std::sync::{Arc, Mutex, Weak};

use bytes::BytesMut;
use tracing::debug;

struct PoolInner {
    free: Vec<BytesMut>,
    outstanding: usize,
    disposed: bool,
}

/// A fixed-count ring of reusable backing buffers.
pub struct FramePool {
    inner: Mutex<PoolInner>,
    count: usize,
    initial_size: usize,
    growable: bool,
}

impl FramePool {
    /// Create a pool of `count` buffers of `initial_size` bytes each.
    /// Buffers are allocated lazily; when `growable` is false a buffer never
    /// exceeds `initial_size`.
    pub fn new(count: usize, initial_size: usize, growable: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PoolInner {
                free: Vec::with_capacity(count),
                outstanding: 0,
                disposed: false,
            }),
            count,
            initial_size,
            growable,
        })
    }

    /// Take a buffer from the pool. The oldest returned buffer is reused.
    /// Returns `None` when all `count` buffers are outstanding; callers
    /// translate that into a dropped frame.
    pub fn acquire(self: &Arc<Self>) -> Option<PooledBuffer> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.disposed {
            return None;
        }
        let buf = if let Some(buf) = inner.free.pop() {
            buf
        } else if inner.outstanding < self.count {
            BytesMut::with_capacity(self.initial_size)
        } else {
            return None;
        };
        inner.outstanding += 1;
        Some(PooledBuffer {
            buf: Some(buf),
            pool: Arc::downgrade(self),
            growable: self.growable,
            max_len: self.initial_size,
        })
    }

    /// Number of buffers that could be acquired right now.
    pub fn available(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.disposed {
            0
        } else {
            self.count - inner.outstanding
        }
    }

    /// Drop all free buffers and refuse further acquisitions. Outstanding
    /// buffers are freed as their frames drop.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.disposed = true;
        let freed = inner.free.len();
        inner.free.clear();
        debug!("Disposed frame pool ({} free buffers released)", freed);
    }

    fn release(&self, buf: BytesMut) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.outstanding = inner.outstanding.saturating_sub(1);
        if !inner.disposed {
            inner.free.push(buf);
        }
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("FramePool")
            .field("count", &self.count)
            .field("initial_size", &self.initial_size)
            .field("growable", &self.growable)
            .field("free", &inner.free.len())
            .field("outstanding", &inner.outstanding)
            .finish()
    }
}

/// RAII guard for a pooled buffer: dropping it returns the backing storage
/// to its originating pool.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: Weak<FramePool>,
    growable: bool,
    max_len: usize,
}

impl PooledBuffer {
    /// Whether the buffer may grow past the pool's initial size.
    pub fn growable(&self) -> bool {
        self.growable
    }

    /// Ensure at least `len` bytes of capacity, respecting the grow policy.
    /// Returns false when the buffer is fixed-size and too small.
    pub fn ensure_capacity(&mut self, len: usize) -> bool {
        if !self.growable && len > self.max_len {
            return false;
        }
        let buf = self.buf.as_mut().expect("buffer present until drop");
        if buf.capacity() < len {
            buf.reserve(len - buf.len());
        }
        true
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = BytesMut;
    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            if let Some(pool) = self.pool.upgrade() {
                buf.clear();
                pool.release(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_up_to_count() {
        let pool = FramePool::new(2, 64, true);
        let a = pool.acquire();
        let b = pool.acquire();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(pool.acquire().is_none(), "third acquire must fail");
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_release_recycles_buffer() {
        let pool = FramePool::new(1, 64, true);
        {
            let mut buf = pool.acquire().unwrap();
            buf.extend_from_slice(b"hello");
        }
        // Returned buffer is reused, cleared
        let buf = pool.acquire().unwrap();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 5);
    }

    #[test]
    fn test_growth_policy() {
        let pool = FramePool::new(1, 16, false);
        let mut fixed = pool.acquire().unwrap();
        assert!(fixed.ensure_capacity(16));
        assert!(!fixed.ensure_capacity(17), "fixed buffer must not grow");
        drop(fixed);

        let pool = FramePool::new(1, 16, true);
        let mut growable = pool.acquire().unwrap();
        assert!(growable.ensure_capacity(1024));
        assert!(growable.capacity() >= 1024);
    }

    #[test]
    fn test_dispose_stops_acquisition() {
        let pool = FramePool::new(2, 64, true);
        let held = pool.acquire().unwrap();
        pool.dispose();
        assert!(pool.acquire().is_none());
        // Outstanding buffer drop after dispose must not panic
        drop(held);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_buffer_outlives_pool() {
        let pool = FramePool::new(1, 64, true);
        let buf = pool.acquire().unwrap();
        drop(pool);
        // Dropping the buffer after the pool is gone is a no-op
        drop(buf);
    }
}
