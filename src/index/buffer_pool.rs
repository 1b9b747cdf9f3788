//! Scoped pool of key-building scratch buffers
//!
//! A search checks a buffer out for its lifetime; the buffer goes back to the
//! pool (cleared) when the guard drops, including on error paths.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Buffers larger than this are dropped instead of pooled
const MAX_POOLED_CAPACITY: usize = 64 * 1024;

/// Default number of idle buffers kept
pub const DEFAULT_MAX_IDLE: usize = 64;

/// Pool of reusable byte buffers
#[derive(Debug, Clone)]
pub struct KeyBufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl KeyBufferPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                max_idle,
            }),
        }
    }

    /// Check out an empty buffer
    pub fn get(&self) -> PooledBuffer {
        let buf = self.inner.idle.lock().pop().unwrap_or_default();
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of idle buffers waiting in the pool
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

impl Default for KeyBufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

/// Buffer checked out of a [`KeyBufferPool`]
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut idle = self.pool.idle.lock();
        if idle.len() < self.pool.max_idle {
            idle.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_returns_cleared() {
        let pool = KeyBufferPool::new(4);
        {
            let mut buf = pool.get();
            buf.extend_from_slice(b"scratch");
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 1);

        let buf = pool.get();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 7);
    }

    #[test]
    fn test_buffer_returned_on_error_path() {
        fn failing(pool: &KeyBufferPool) -> Result<(), String> {
            let mut buf = pool.get();
            buf.push(1);
            Err("boom".to_string())
        }

        let pool = KeyBufferPool::new(4);
        assert!(failing(&pool).is_err());
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_pool_caps_idle_and_oversized() {
        let pool = KeyBufferPool::new(2);
        let bufs: Vec<_> = (0..4).map(|_| pool.get()).collect();
        drop(bufs);
        assert_eq!(pool.idle_count(), 2);

        let pool = KeyBufferPool::new(2);
        {
            let mut big = pool.get();
            big.reserve(MAX_POOLED_CAPACITY + 1);
        }
        assert_eq!(pool.idle_count(), 0);
    }
}
