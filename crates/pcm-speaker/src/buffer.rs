//! Fixed-capacity circular buffer of PCM frames.
//!
//! This is the only handoff point between the application (producer, `write`/`flush`) and the
//! playback consumer (device callback). The design mirrors a bounded audio queue:
//! - storage is allocated once and never grows
//! - `push` accepts only what fits and never blocks
//! - a single [`Condvar`] signals "state changed" (frames drained, frames pushed, closed)
//! - a `closed` flag lives under the same mutex so waiters cannot miss a shutdown
//!
//! Cursors are monotonically increasing frame counters. The producer only advances `written`,
//! the consumer only advances `read`; occupancy is always `written - read`.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Result, SpeakerError};

/// Outcome of a bounded wait on the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    /// The awaited condition holds.
    Ready,
    /// The buffer was closed while waiting.
    Closed,
    /// The timeout elapsed first.
    TimedOut,
}

/// Thread-safe ring of mono PCM frames.
pub struct CircularBuffer {
    capacity: usize,
    inner: Mutex<Ring>,
    cv: Condvar,
}

struct Ring {
    data: Box<[i32]>,
    /// Total frames ever pushed. Producer-owned.
    written: u64,
    /// Total frames ever popped. Consumer-owned.
    read: u64,
    closed: bool,
}

impl Ring {
    fn occupied(&self) -> usize {
        (self.written - self.read) as usize
    }
}

impl CircularBuffer {
    /// Allocate a buffer holding exactly `capacity` frames.
    ///
    /// `capacity` must be non-zero; [`crate::SpeakerConfig`] guarantees this for engine buffers.
    /// Fails with [`SpeakerError::Io`] when the storage cannot be allocated.
    pub fn new(capacity: usize) -> Result<Self> {
        debug_assert!(capacity > 0, "circular buffer capacity must be non-zero");
        let len = capacity.max(1);
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            SpeakerError::io(format!("cannot allocate a {capacity}-frame buffer: {e}"))
        })?;
        data.resize(len, 0);
        Ok(Self {
            capacity,
            inner: Mutex::new(Ring {
                data: data.into_boxed_slice(),
                written: 0,
                read: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // A poisoned ring still holds consistent cursors; keep serving it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently buffered (snapshot).
    pub fn occupied(&self) -> usize {
        self.lock().occupied()
    }

    /// Free space in frames (snapshot).
    pub fn free(&self) -> usize {
        self.capacity - self.lock().occupied()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().occupied() == 0
    }

    /// Total frames drained by the consumer since creation.
    pub fn drained_total(&self) -> u64 {
        self.lock().read
    }

    /// Copy as many leading frames of `frames` as fit into free space.
    ///
    /// Returns the number accepted (`0..=frames.len()`). Never blocks and never overwrites
    /// unread frames. A closed buffer accepts nothing.
    pub fn push(&self, frames: &[i32]) -> usize {
        let mut g = self.lock();
        if g.closed {
            return 0;
        }
        let accepted = frames.len().min(self.capacity - g.occupied());
        if accepted == 0 {
            return 0;
        }

        let start = (g.written % self.capacity as u64) as usize;
        let first = accepted.min(self.capacity - start);
        g.data[start..start + first].copy_from_slice(&frames[..first]);
        g.data[..accepted - first].copy_from_slice(&frames[first..accepted]);
        g.written += accepted as u64;

        drop(g);
        self.cv.notify_all();
        if accepted < frames.len() {
            tracing::trace!(
                offered = frames.len(),
                accepted,
                capacity = self.capacity,
                "circular buffer full"
            );
        }
        accepted
    }

    /// Remove up to `max_frames` frames in FIFO order.
    pub fn pop(&self, max_frames: usize) -> Vec<i32> {
        let mut out = vec![0; max_frames.min(self.capacity)];
        let n = self.pop_into(&mut out);
        out.truncate(n);
        out
    }

    /// Drain frames into `out` without allocating. Returns how many were written.
    pub fn pop_into(&self, out: &mut [i32]) -> usize {
        let mut g = self.lock();
        let taken = out.len().min(g.occupied());
        if taken == 0 {
            return 0;
        }

        let start = (g.read % self.capacity as u64) as usize;
        let first = taken.min(self.capacity - start);
        out[..first].copy_from_slice(&g.data[start..start + first]);
        out[first..taken].copy_from_slice(&g.data[..taken - first]);
        g.read += taken as u64;

        drop(g);
        self.cv.notify_all();
        taken
    }

    /// Discard all buffered frames.
    ///
    /// Only called while no consumer is running, so advancing the read cursor here does not
    /// race with the consumer.
    pub fn clear(&self) {
        let mut g = self.lock();
        g.read = g.written;
        drop(g);
        self.cv.notify_all();
    }

    /// Refuse further pushes and wake every waiter. Buffered frames stay until cleared.
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Accept pushes again after a [`close`](Self::close).
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wake every waiter so it re-checks external conditions (consumer progress, failures).
    pub fn notify(&self) {
        self.cv.notify_all();
    }

    /// Block until at least one frame of free space exists, the buffer closes, or `timeout`.
    pub fn wait_for_free(&self, timeout: Duration) -> WaitStatus {
        self.wait_while(timeout, |ring, capacity| ring.occupied() >= capacity)
    }

    /// Block until the buffer is empty, closes, or `timeout` elapses.
    pub fn wait_until_empty(&self, timeout: Duration) -> WaitStatus {
        self.wait_while(timeout, |ring, _| ring.occupied() > 0)
    }

    /// Block for at most one state-change notification (or `timeout`).
    ///
    /// Callers waiting on conditions tracked outside the ring (consumer counters) re-check them
    /// after this returns `Ready` or `TimedOut`.
    pub fn wait_for_signal(&self, timeout: Duration) -> WaitStatus {
        let g = self.lock();
        if g.closed {
            return WaitStatus::Closed;
        }
        let (g, res) = self
            .cv
            .wait_timeout(g, timeout)
            .unwrap_or_else(|e| e.into_inner());
        if g.closed {
            WaitStatus::Closed
        } else if res.timed_out() {
            WaitStatus::TimedOut
        } else {
            WaitStatus::Ready
        }
    }

    fn wait_while(
        &self,
        timeout: Duration,
        pending: impl Fn(&Ring, usize) -> bool,
    ) -> WaitStatus {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        loop {
            if g.closed {
                return WaitStatus::Closed;
            }
            if !pending(&*g, self.capacity) {
                return WaitStatus::Ready;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitStatus::TimedOut;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            g = ng;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_accepts_only_free_space() {
        let buf = CircularBuffer::new(4).unwrap();
        assert_eq!(buf.push(&[1, 2, 3]), 3);
        assert_eq!(buf.push(&[4, 5, 6]), 1);
        assert_eq!(buf.occupied(), 4);
        assert_eq!(buf.free(), 0);
        assert_eq!(buf.push(&[7]), 0);
    }

    #[test]
    fn pop_returns_fifo_and_fewer_when_short() {
        let buf = CircularBuffer::new(8).unwrap();
        buf.push(&[10, 20, 30]);
        assert_eq!(buf.pop(2), vec![10, 20]);
        assert_eq!(buf.pop(5), vec![30]);
        assert!(buf.pop(5).is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn wraps_around_capacity_boundary() {
        let buf = CircularBuffer::new(5).unwrap();
        assert_eq!(buf.push(&[1, 2, 3, 4]), 4);
        assert_eq!(buf.pop(3), vec![1, 2, 3]);
        assert_eq!(buf.push(&[5, 6, 7, 8]), 4);
        assert_eq!(buf.occupied(), 5);

        let mut out = [0; 8];
        let n = buf.pop_into(&mut out);
        assert_eq!(&out[..n], &[4, 5, 6, 7, 8]);
        assert_eq!(buf.drained_total(), 8);
    }

    #[test]
    fn closed_buffer_rejects_push_and_wakes_waiters() {
        let buf = Arc::new(CircularBuffer::new(2).unwrap());
        buf.push(&[1, 2]);

        let waiter = buf.clone();
        let handle = thread::spawn(move || waiter.wait_for_free(Duration::from_secs(5)));

        thread::sleep(Duration::from_millis(20));
        buf.close();
        assert_eq!(handle.join().unwrap(), WaitStatus::Closed);
        assert_eq!(buf.push(&[3]), 0);

        buf.reopen();
        buf.clear();
        assert_eq!(buf.push(&[3]), 1);
    }

    #[test]
    fn wait_until_empty_sees_consumer_drain() {
        let buf = Arc::new(CircularBuffer::new(16).unwrap());
        buf.push(&[0; 16]);

        let consumer = buf.clone();
        let handle = thread::spawn(move || {
            let mut out = [0; 4];
            while consumer.pop_into(&mut out) > 0 {
                thread::sleep(Duration::from_millis(1));
            }
        });

        assert_eq!(buf.wait_until_empty(Duration::from_secs(5)), WaitStatus::Ready);
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_free_times_out_when_nobody_drains() {
        let buf = CircularBuffer::new(1).unwrap();
        buf.push(&[1]);
        assert_eq!(buf.wait_for_free(Duration::from_millis(10)), WaitStatus::TimedOut);
    }

    #[test]
    fn unallocatable_capacity_is_an_error() {
        // 48 kHz for i32::MAX seconds: far beyond any address space.
        let err = CircularBuffer::new(48_000 * i32::MAX as usize).err().unwrap();
        assert!(matches!(err, SpeakerError::Io(_)));
    }

    #[test]
    fn concurrent_producer_consumer_preserves_order() {
        let buf = Arc::new(CircularBuffer::new(64).unwrap());
        let total = 10_000;

        let producer = buf.clone();
        let handle = thread::spawn(move || {
            let frames: Vec<i32> = (0..total).collect();
            let mut offset = 0;
            while offset < frames.len() {
                offset += producer.push(&frames[offset..(offset + 37).min(frames.len())]);
            }
        });

        let mut seen = Vec::with_capacity(total as usize);
        while seen.len() < total as usize {
            seen.extend(buf.pop(13));
        }
        handle.join().unwrap();
        assert!(seen.iter().copied().eq(0..total));
    }
}
