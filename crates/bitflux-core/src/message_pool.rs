//! Message buffer pooling.
//!
//! Every incoming and outgoing message owns a byte buffer; recycling those
//! buffers bounds allocation on the hot path. The pool is a size-bucketed
//! free list, thread-affine to the library thread. Other threads return
//! buffers through a mailbox which the library thread reclaims at heartbeat.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Smallest pooled capacity: 2^6 = 64 bytes.
const MIN_BUCKET_SHIFT: u32 = 6;
/// Largest pooled capacity: 2^16 = 64 KiB. Larger buffers are not retained.
const MAX_BUCKET_SHIFT: u32 = 16;
/// Buffers kept per bucket before recycles are dropped.
const MAX_PER_BUCKET: usize = 64;

/// Size-bucketed free list of byte buffers.
pub struct MessagePool {
    /// Bucket `i` holds buffers with capacity exactly `2^(MIN_BUCKET_SHIFT + i)`.
    buckets: Vec<Vec<Vec<u8>>>,
    mailbox_tx: Sender<Vec<u8>>,
    mailbox_rx: Receiver<Vec<u8>>,
}

/// Cross-thread handle for returning buffers to a [`MessagePool`].
#[derive(Clone)]
pub struct PoolMailbox(Sender<Vec<u8>>);

impl PoolMailbox {
    /// Posts a buffer back to the owning pool. The buffer is reclaimed at
    /// the pool's next heartbeat.
    pub fn post(&self, buffer: Vec<u8>) {
        // The pool outlives all mailboxes in practice; if it doesn't, the
        // buffer is simply dropped.
        let _ = self.0.send(buffer);
    }
}

impl MessagePool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        let (mailbox_tx, mailbox_rx) = unbounded();
        let bucket_count = (MAX_BUCKET_SHIFT - MIN_BUCKET_SHIFT + 1) as usize;
        Self { buckets: (0..bucket_count).map(|_| Vec::new()).collect(), mailbox_tx, mailbox_rx }
    }

    /// Returns a handle that other threads can use to return buffers.
    pub fn mailbox(&self) -> PoolMailbox {
        PoolMailbox(self.mailbox_tx.clone())
    }

    fn bucket_shift(capacity: usize) -> Option<u32> {
        if capacity < (1 << MIN_BUCKET_SHIFT) {
            return None;
        }
        let shift = usize::BITS - 1 - capacity.leading_zeros();
        if capacity != 1 << shift || shift > MAX_BUCKET_SHIFT {
            None
        } else {
            Some(shift)
        }
    }

    /// Rents a buffer whose capacity is at least `min_capacity`.
    pub fn rent(&mut self, min_capacity: usize) -> Vec<u8> {
        let wanted = min_capacity.max(1 << MIN_BUCKET_SHIFT).next_power_of_two();
        let shift = usize::BITS - 1 - wanted.leading_zeros();
        if shift > MAX_BUCKET_SHIFT {
            // Oversized requests bypass the pool entirely.
            return Vec::with_capacity(min_capacity);
        }
        let index = (shift - MIN_BUCKET_SHIFT) as usize;
        self.buckets[index].pop().unwrap_or_else(|| Vec::with_capacity(wanted))
    }

    /// Returns a buffer to the pool. Length is reset; the bytes are not
    /// necessarily zeroed.
    pub fn recycle(&mut self, mut buffer: Vec<u8>) {
        buffer.clear();
        if let Some(shift) = Self::bucket_shift(buffer.capacity()) {
            let index = (shift - MIN_BUCKET_SHIFT) as usize;
            if self.buckets[index].len() < MAX_PER_BUCKET {
                self.buckets[index].push(buffer);
            }
        }
    }

    /// Drains the cross-thread mailbox back into the buckets. Called by the
    /// library thread once per heartbeat.
    pub fn reclaim_mailbox(&mut self) {
        while let Ok(buffer) = self.mailbox_rx.try_recv() {
            self.recycle(buffer);
        }
    }

    /// Number of buffers currently pooled, all buckets combined.
    pub fn pooled(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_meets_minimum_capacity() {
        let mut pool = MessagePool::new();
        for wanted in [1usize, 63, 64, 65, 1000, 4096, 70_000] {
            let buf = pool.rent(wanted);
            assert!(buf.capacity() >= wanted, "capacity {} < {}", buf.capacity(), wanted);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn recycled_buffer_is_reused() {
        let mut pool = MessagePool::new();
        let mut buf = pool.rent(100);
        buf.extend_from_slice(&[1, 2, 3]);
        let capacity = buf.capacity();
        pool.recycle(buf);
        assert_eq!(pool.pooled(), 1);

        let buf = pool.rent(100);
        assert_eq!(buf.capacity(), capacity);
        assert!(buf.is_empty());
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn oversized_buffers_are_not_retained() {
        let mut pool = MessagePool::new();
        pool.recycle(Vec::with_capacity(1 << 20));
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn odd_capacity_buffers_are_not_retained() {
        let mut pool = MessagePool::new();
        pool.recycle(Vec::with_capacity(100)); // not a power of two
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn bucket_size_is_bounded() {
        let mut pool = MessagePool::new();
        for _ in 0..(MAX_PER_BUCKET + 10) {
            pool.recycle(Vec::with_capacity(256));
        }
        assert_eq!(pool.pooled(), MAX_PER_BUCKET);
    }

    #[test]
    fn mailbox_returns_are_reclaimed() {
        let mut pool = MessagePool::new();
        let mailbox = pool.mailbox();

        let handle = std::thread::spawn(move || {
            mailbox.post(Vec::with_capacity(512));
            mailbox.post(Vec::with_capacity(512));
        });
        handle.join().unwrap();

        assert_eq!(pool.pooled(), 0);
        pool.reclaim_mailbox();
        assert_eq!(pool.pooled(), 2);
    }
}
