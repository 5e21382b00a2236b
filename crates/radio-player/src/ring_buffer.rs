//! Fixed-capacity byte ring buffer shared between pipeline stages.
//!
//! Two instances carry a session's data: one holds compressed stream bytes
//! between the fetcher and the decoder, the other holds little-endian mono
//! PCM between the decoder and the output pump.
//!
//! Every blocking call takes an explicit timeout so that workers come back
//! to check their stop flag on a bounded cadence. There is no other
//! cancellation mechanism in the pipeline.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{RadioError, Result};

/// Thread-safe FIFO of bytes with a fixed capacity.
///
/// ## Design
/// - Storage is allocated once at construction and never grows.
/// - One producer and one consumer may run concurrently without any
///   external locking; data is copied in and out under the internal mutex.
/// - `not_empty` wakes readers, `not_full` wakes writers.
pub struct ByteRingBuffer {
    inner: Mutex<RingInner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct RingInner {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
}

impl RingInner {
    fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    fn push(&mut self, data: &[u8]) -> usize {
        let cap = self.buf.len();
        let n = data.len().min(self.free());
        let tail = (self.head + self.len) % cap;
        let first = n.min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);
        self.len += n;
        n
    }

    fn pop(&mut self, out: &mut [u8]) -> usize {
        let cap = self.buf.len();
        let n = out.len().min(self.len);
        let first = n.min(cap - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        self.head = (self.head + n) % cap;
        self.len -= n;
        n
    }
}

impl ByteRingBuffer {
    /// Allocate a buffer holding up to `capacity` bytes.
    ///
    /// Fails with [`RadioError::BufferAllocation`] when the storage cannot be
    /// reserved or `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RadioError::BufferAllocation(0));
        }
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| RadioError::BufferAllocation(capacity))?;
        storage.resize(capacity, 0u8);
        Ok(Self {
            inner: Mutex::new(RingInner {
                buf: storage.into_boxed_slice(),
                head: 0,
                len: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, RingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently queued (best-effort snapshot).
    pub fn available(&self) -> usize {
        self.lock().len
    }

    /// Bytes that can be written without blocking (best-effort snapshot).
    pub fn free_space(&self) -> usize {
        self.lock().free()
    }

    /// Copy `data` in, waiting up to `timeout` for room.
    ///
    /// Returns the number of bytes accepted. A value below `data.len()` means
    /// the deadline passed with the buffer still full; the caller decides
    /// whether to retry the remainder or drop it.
    pub fn write(&self, data: &[u8], timeout: Duration) -> usize {
        if data.is_empty() {
            return 0;
        }
        let deadline = Instant::now() + timeout;
        let mut written = 0;
        let mut g = self.lock();
        loop {
            let n = g.push(&data[written..]);
            if n > 0 {
                written += n;
                self.not_empty.notify_one();
            }
            if written == data.len() {
                return written;
            }
            let now = Instant::now();
            if now >= deadline {
                return written;
            }
            let (ng, _timeout) = self
                .not_full
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }

    /// Copy up to `out.len()` bytes out, waiting up to `timeout` for any data.
    ///
    /// Returns 0 when the deadline passed with the buffer still empty.
    pub fn read(&self, out: &mut [u8], timeout: Duration) -> usize {
        if out.is_empty() {
            return 0;
        }
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while g.len == 0 {
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            let (ng, _timeout) = self
                .not_empty
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
        let n = g.pop(out);
        drop(g);
        self.not_full.notify_one();
        n
    }

    /// Discard all queued bytes and wake any blocked writer.
    pub fn clear(&self) {
        let mut g = self.lock();
        g.head = 0;
        g.len = 0;
        drop(g);
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(10);

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            ByteRingBuffer::new(0),
            Err(RadioError::BufferAllocation(0))
        ));
    }

    #[test]
    fn reads_reproduce_writes_in_order_across_wraparound() {
        let ring = ByteRingBuffer::new(8).unwrap();
        let mut expected = Vec::new();
        let mut got = Vec::new();
        let mut scratch = [0u8; 5];
        for round in 0u8..20 {
            let chunk = [round, round.wrapping_add(1), round.wrapping_add(2)];
            assert_eq!(ring.write(&chunk, SHORT), 3);
            expected.extend_from_slice(&chunk);
            let n = ring.read(&mut scratch, SHORT);
            got.extend_from_slice(&scratch[..n]);
        }
        loop {
            let n = ring.read(&mut scratch, SHORT);
            if n == 0 {
                break;
            }
            got.extend_from_slice(&scratch[..n]);
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn available_and_free_space_sum_to_capacity() {
        let ring = ByteRingBuffer::new(100).unwrap();
        ring.write(&[1; 30], SHORT);
        ring.write(&[2; 12], SHORT);
        assert_eq!(ring.available(), 42);
        assert_eq!(ring.available() + ring.free_space(), ring.capacity());
    }

    #[test]
    fn full_buffer_reports_partial_write() {
        let ring = ByteRingBuffer::new(4).unwrap();
        assert_eq!(ring.write(&[1, 2, 3, 4, 5, 6], SHORT), 4);
        assert_eq!(ring.free_space(), 0);
    }

    #[test]
    fn empty_read_times_out_with_zero() {
        let ring = ByteRingBuffer::new(4).unwrap();
        let mut out = [0u8; 4];
        let start = Instant::now();
        assert_eq!(ring.read(&mut out, Duration::from_millis(20)), 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn clear_discards_contents() {
        let ring = ByteRingBuffer::new(16).unwrap();
        ring.write(b"hello", SHORT);
        ring.clear();
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.free_space(), 16);
    }

    #[test]
    fn blocked_writer_completes_when_reader_drains() {
        let ring = Arc::new(ByteRingBuffer::new(4).unwrap());
        let writer = ring.clone();
        let handle = thread::spawn(move || writer.write(&[9; 12], Duration::from_secs(2)));

        let mut got = Vec::new();
        let mut out = [0u8; 3];
        while got.len() < 12 {
            let n = ring.read(&mut out, Duration::from_secs(2));
            assert!(n > 0);
            got.extend_from_slice(&out[..n]);
        }
        assert_eq!(handle.join().unwrap(), 12);
        assert_eq!(got, vec![9; 12]);
    }
}
