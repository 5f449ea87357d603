//! Bounded byte ring buffer between the decode worker and the PCM consumer
//!
//! This is the only state shared between the background decode thread and
//! the caller's real-time pull thread.
//!
//! Design:
//! - Producer (decode worker): writes resampled PCM bytes, never blocks
//! - Consumer (real-time puller): reads fixed-size chunks, never blocks
//! - Single internal lock, held only for the copy itself
//! - Overflow drops the newest bytes (live radio favours freshness)
//! - Underflow returns fewer bytes than requested, possibly zero
//!
//! ```text
//!   tail (next read)        head (next write)
//!        v                       v
//!   [....DDDDDDDDDDDDDDDDDDDDDDD.........]   full == false
//!
//!   head == tail: empty when !full, full when full
//! ```

use crate::audio::types::DecodedFormat;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Cursor state guarded by the buffer lock
///
/// Invariants: `head < capacity`, `tail < capacity`, and
/// `head == tail` means empty unless `full` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Cursors {
    head: usize,
    tail: usize,
    full: bool,
}

impl Cursors {
    fn occupied(&self, capacity: usize) -> usize {
        if self.full {
            capacity
        } else if self.head >= self.tail {
            self.head - self.tail
        } else {
            capacity - (self.tail - self.head)
        }
    }

    /// Free bytes reachable from `head` without wrapping
    fn contiguous_free(&self, capacity: usize) -> usize {
        if self.full {
            0
        } else if self.head >= self.tail {
            capacity - self.head
        } else {
            self.tail - self.head
        }
    }

    /// Filled bytes reachable from `tail` without wrapping
    fn contiguous_filled(&self, capacity: usize) -> usize {
        if self.full {
            capacity - self.tail
        } else if self.head >= self.tail {
            self.head - self.tail
        } else {
            capacity - self.tail
        }
    }

    fn advance_head(&mut self, n: usize, capacity: usize) {
        self.head = (self.head + n) % capacity;
        if n > 0 && self.head == self.tail {
            self.full = true;
        }
    }

    fn advance_tail(&mut self, n: usize, capacity: usize) {
        self.tail = (self.tail + n) % capacity;
        if n > 0 {
            self.full = false;
        }
    }
}

struct Inner {
    storage: Box<[u8]>,
    cursors: Cursors,
}

/// Fixed-capacity, thread-safe, lossy byte FIFO
///
/// `write` and `read` may run concurrently from one producer thread and
/// one consumer thread. Neither blocks beyond the internal lock.
pub struct ByteRingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,

    /// Monotonic counters (Relaxed: statistics only)
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    bytes_dropped: AtomicU64,

    /// Writes that could not store everything
    overruns: AtomicU64,

    /// Reads that returned less than requested
    underruns: AtomicU64,
}

impl std::fmt::Debug for ByteRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteRingBuffer")
            .field("capacity", &self.capacity)
            .field("occupied", &self.size())
            .field("overruns", &self.overruns.load(Ordering::Relaxed))
            .field("underruns", &self.underruns.load(Ordering::Relaxed))
            .finish()
    }
}

impl ByteRingBuffer {
    /// Create an empty buffer holding `capacity` bytes
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("ring buffer capacity must be positive".to_string()));
        }

        debug!("Creating PCM ring buffer: capacity={} bytes", capacity);

        Ok(Self {
            inner: Mutex::new(Inner {
                storage: vec![0u8; capacity].into_boxed_slice(),
                cursors: Cursors::default(),
            }),
            capacity,
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_dropped: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        })
    }

    /// Create a buffer holding `duration` of audio in `format`, in whole frames
    pub fn for_format(format: &DecodedFormat, duration: Duration) -> Result<Self> {
        let capacity = format.bytes_for(duration).max(format.frame_bytes());
        debug!(
            "Sizing ring buffer for {:.2}s @ {}Hz {}ch",
            duration.as_secs_f64(),
            format.sample_rate,
            format.channels
        );
        Self::new(capacity)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while copying cannot leave cursors out of range, so the
        // state is still usable after poisoning.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store up to `data.len()` bytes, returning how many were stored
    ///
    /// Bytes that do not fit are dropped; the return value tells the
    /// caller how much was accepted.
    pub fn write(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let cap = self.capacity;
        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut wrote = 0;

        // At most two passes: up to the end of storage, then from index 0
        while wrote < data.len() {
            let space = inner.cursors.contiguous_free(cap);
            if space == 0 {
                break;
            }
            let chunk = space.min(data.len() - wrote);
            let head = inner.cursors.head;
            inner.storage[head..head + chunk].copy_from_slice(&data[wrote..wrote + chunk]);
            inner.cursors.advance_head(chunk, cap);
            wrote += chunk;
        }
        drop(guard);

        self.bytes_written.fetch_add(wrote as u64, Ordering::Relaxed);

        let dropped = data.len() - wrote;
        if dropped > 0 {
            self.bytes_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            let count = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 1 {
                warn!(
                    "PCM ring buffer full, dropped {} bytes (overruns: {})",
                    dropped, count
                );
            } else {
                trace!("PCM ring buffer overrun: dropped {} bytes", dropped);
            }
        }

        wrote
    }

    /// Retrieve up to `dst.len()` bytes in FIFO order, returning how many
    /// were copied
    pub fn read(&self, dst: &mut [u8]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let cap = self.capacity;
        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut got = 0;

        while got < dst.len() {
            let avail = inner.cursors.contiguous_filled(cap);
            if avail == 0 {
                break;
            }
            let chunk = avail.min(dst.len() - got);
            let tail = inner.cursors.tail;
            dst[got..got + chunk].copy_from_slice(&inner.storage[tail..tail + chunk]);
            inner.cursors.advance_tail(chunk, cap);
            got += chunk;
        }
        drop(guard);

        self.bytes_read.fetch_add(got as u64, Ordering::Relaxed);

        if got < dst.len() {
            let count = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                debug!("PCM ring buffer underrun (total: {})", count);
            }
        }

        got
    }

    /// Occupied bytes at the instant of the call
    pub fn size(&self) -> usize {
        self.lock().cursors.occupied(self.capacity)
    }

    /// Free bytes at the instant of the call
    pub fn free(&self) -> usize {
        self.capacity - self.size()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard all buffered bytes
    ///
    /// Used when a new session starts so audio from the previous URL is
    /// never delivered.
    pub fn clear(&self) {
        let mut guard = self.lock();
        let discarded = guard.cursors.occupied(self.capacity);
        guard.cursors = Cursors::default();
        drop(guard);

        if discarded > 0 {
            debug!("PCM ring buffer cleared ({} bytes discarded)", discarded);
        }
    }

    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            capacity: self.capacity,
            occupied: self.size(),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_dropped: self.bytes_dropped.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

/// Ring buffer statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferStats {
    /// Buffer capacity in bytes
    pub capacity: usize,

    /// Currently occupied bytes
    pub occupied: usize,

    /// Total bytes accepted by `write`
    pub bytes_written: u64,

    /// Total bytes returned by `read`
    pub bytes_read: u64,

    /// Total bytes rejected because the buffer was full
    pub bytes_dropped: u64,

    /// Writes that dropped at least one byte
    pub overruns: u64,

    /// Reads that returned less than requested
    pub underruns: u64,
}

impl RingBufferStats {
    /// Fill level (0.0 to 1.0)
    pub fn fill_percent(&self) -> f32 {
        self.occupied as f32 / self.capacity as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_helpers_empty() {
        let c = Cursors::default();
        assert_eq!(c.occupied(8), 0);
        assert_eq!(c.contiguous_free(8), 8);
        assert_eq!(c.contiguous_filled(8), 0);
    }

    #[test]
    fn test_cursor_helpers_wrapped() {
        // Data occupies [6, 8) and [0, 2)
        let c = Cursors { head: 2, tail: 6, full: false };
        assert_eq!(c.occupied(8), 4);
        assert_eq!(c.contiguous_free(8), 4);
        assert_eq!(c.contiguous_filled(8), 2);
    }

    #[test]
    fn test_cursor_helpers_full() {
        let c = Cursors { head: 3, tail: 3, full: true };
        assert_eq!(c.occupied(8), 8);
        assert_eq!(c.contiguous_free(8), 0);
        assert_eq!(c.contiguous_filled(8), 5);
    }

    #[test]
    fn test_advance_sets_and_clears_full() {
        let mut c = Cursors { head: 4, tail: 0, full: false };
        c.advance_head(4, 8);
        assert_eq!(c.head, 0);
        assert!(c.full);

        c.advance_tail(1, 8);
        assert!(!c.full);
        assert_eq!(c.occupied(8), 7);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(ByteRingBuffer::new(0), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_length_ops() {
        let rb = ByteRingBuffer::new(4).unwrap();
        assert_eq!(rb.write(&[]), 0);
        assert_eq!(rb.read(&mut []), 0);
        let stats = rb.stats();
        assert_eq!(stats.overruns, 0);
        assert_eq!(stats.underruns, 0);
    }

    #[test]
    fn test_for_format_one_second() {
        let rb = ByteRingBuffer::for_format(&DecodedFormat::default(), Duration::from_secs(1)).unwrap();
        assert_eq!(rb.capacity(), 48000 * 2 * 2);
    }

    #[test]
    fn test_clear_resets() {
        let rb = ByteRingBuffer::new(8).unwrap();
        rb.write(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(rb.free(), 0);

        rb.clear();
        assert_eq!(rb.size(), 0);
        assert_eq!(rb.free(), 8);

        let mut out = [0u8; 4];
        assert_eq!(rb.read(&mut out), 0);
        assert_eq!(rb.write(&[9, 10]), 2);
        assert_eq!(rb.read(&mut out), 2);
        assert_eq!(&out[..2], &[9, 10]);
    }

    #[test]
    fn test_stats_accounting() {
        let rb = ByteRingBuffer::new(4).unwrap();
        rb.write(&[1, 2, 3, 4, 5, 6]);
        let mut out = [0u8; 8];
        rb.read(&mut out);

        let stats = rb.stats();
        assert_eq!(stats.bytes_written, 4);
        assert_eq!(stats.bytes_dropped, 2);
        assert_eq!(stats.bytes_read, 4);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.underruns, 1);
        assert_eq!(stats.fill_percent(), 0.0);
    }
}
