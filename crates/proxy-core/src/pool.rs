//! A pool of reusable byte buffers.

use std::collections::VecDeque;
use std::sync::Mutex;

/// A bounded free-list of byte buffers, shared by every session of a
/// server.
///
/// Buffers leave the pool with [`BufferPool::request`] and come back with
/// [`BufferPool::recycle`] once whatever used them (typically a write) is
/// done.  A buffer is only kept if it's no bigger than `max_buffer_size`
/// and the pool holds fewer than `max_buffer_count` buffers; anything else
/// is simply dropped.
#[derive(Debug)]
pub struct BufferPool {
    /// Largest capacity worth keeping.
    max_buffer_size: usize,
    /// Most buffers to keep at once.
    max_buffer_count: usize,
    /// Idle buffers.
    free: Mutex<VecDeque<Vec<u8>>>,
}

impl BufferPool {
    /// Construct an empty pool.
    pub fn new(max_buffer_size: usize, max_buffer_count: usize) -> Self {
        BufferPool {
            max_buffer_size,
            max_buffer_count,
            free: Mutex::new(VecDeque::with_capacity(max_buffer_count)),
        }
    }

    /// Return a zero-filled buffer of length `size`.
    ///
    /// The first idle buffer with enough capacity is reused; if there is
    /// none, a new one of exactly `size` is allocated.
    pub fn request(&self, size: usize) -> Vec<u8> {
        let reused = {
            let mut free = self.free.lock().expect("poisoned lock");
            let idx = free.iter().position(|b| b.capacity() >= size);
            idx.and_then(|i| free.remove(i))
        };
        let mut buf = reused.unwrap_or_else(|| Vec::with_capacity(size));
        buf.clear();
        buf.resize(size, 0);
        buf
    }

    /// Give `buf` back to the pool, or drop it if the pool doesn't want
    /// it.
    pub fn recycle(&self, buf: Vec<u8>) {
        if buf.capacity() > self.max_buffer_size {
            return;
        }
        let mut free = self.free.lock().expect("poisoned lock");
        if free.len() < self.max_buffer_count {
            free.push_back(buf);
        }
    }

    /// Return a buffer holding a copy of `data`.
    pub fn assemble_data_buffer(&self, data: &[u8]) -> Vec<u8> {
        let mut buf = self.request(data.len());
        buf.copy_from_slice(data);
        buf
    }

    /// Return the largest buffer capacity the pool keeps.
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Return the number of idle buffers.
    pub fn idle_count(&self) -> usize {
        self.free.lock().expect("poisoned lock").len()
    }
}

impl Default for BufferPool {
    /// 20 buffers of up to 8 KiB.
    fn default() -> Self {
        BufferPool::new(8192, 20)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reuse() {
        let pool = BufferPool::new(1024, 4);
        let b = pool.request(100);
        assert_eq!(b.len(), 100);
        let ptr = b.as_ptr();
        pool.recycle(b);
        assert_eq!(pool.idle_count(), 1);

        let b = pool.request(100);
        assert!(b.capacity() >= 100);
        assert_eq!(b.as_ptr(), ptr);
        assert_eq!(pool.idle_count(), 0);

        // Too small to satisfy a bigger request: a fresh one is made.
        pool.recycle(b);
        let big = pool.request(500);
        assert_eq!(big.len(), 500);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn contents_are_reset() {
        let pool = BufferPool::new(64, 4);
        pool.recycle(pool.assemble_data_buffer(b"leftover secrets"));
        let b = pool.request(8);
        assert_eq!(&b[..], &[0_u8; 8][..]);

        let b = pool.assemble_data_buffer(b"hello");
        assert_eq!(&b[..], b"hello");
    }

    #[test]
    fn bounded() {
        let pool = BufferPool::new(64, 2);
        for _ in 0..5 {
            pool.recycle(Vec::with_capacity(16));
        }
        assert_eq!(pool.idle_count(), 2);

        let pool = BufferPool::new(64, 2);
        pool.recycle(Vec::with_capacity(65));
        assert_eq!(pool.idle_count(), 0);
        pool.recycle(Vec::with_capacity(64));
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn first_fit() {
        let pool = BufferPool::new(1024, 4);
        pool.recycle(Vec::with_capacity(10));
        pool.recycle(Vec::with_capacity(1000));
        pool.recycle(Vec::with_capacity(200));
        let b = pool.request(150);
        assert!(b.capacity() >= 1000);
        assert_eq!(pool.idle_count(), 2);
    }
}
