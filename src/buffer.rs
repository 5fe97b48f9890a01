//! Byte buffer allocator shared by channels.
//!
//! Channels grab their write buffer (and read cache) here when they are built
//! and hand them back on close, so reopening entry logs does not churn the heap.

use parking_lot::Mutex;

pub const DEFAULT_MAX_POOLED: usize = 16;

pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// 返回一个空的、容量至少为 `capacity` 的 buffer
    pub fn acquire(&self, capacity: usize) -> Vec<u8> {
        let mut free = self.free.lock();
        if let Some(idx) = free.iter().position(|buf| buf.capacity() >= capacity) {
            return free.swap_remove(idx);
        }
        drop(free);
        Vec::with_capacity(capacity)
    }

    /// 归还 buffer。池满或者 buffer 没有容量时直接丢弃。
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() == 0 {
            return;
        }
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    pub fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_reuses_released_buffer() {
        let pool = BufferPool::new(4);
        let mut buf = pool.acquire(64);
        assert!(buf.capacity() >= 64);
        buf.extend_from_slice(b"dirty");
        pool.release(buf);
        assert_eq!(pool.pooled(), 1);

        let buf = pool.acquire(32);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn test_too_small_buffer_not_reused() {
        let pool = BufferPool::new(4);
        pool.release(Vec::with_capacity(8));
        let buf = pool.acquire(128);
        assert!(buf.capacity() >= 128);
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(2);
        for _ in 0..5 {
            pool.release(Vec::with_capacity(16));
        }
        assert_eq!(pool.pooled(), 2);
        pool.release(Vec::new());
        assert_eq!(pool.pooled(), 2);
    }
}
