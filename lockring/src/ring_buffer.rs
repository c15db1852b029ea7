//! Locked byte ring with unlocked copies.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::RingConfig;
use crate::error::{Error, Result};
use crate::reservation::Reservation;

/// A fixed-capacity byte ring shared by many producers and one consumer.
///
/// `LockedRing` stages opaque byte payloads. Producers append with
/// [`write`](Self::write); a single consumer drains everything that has
/// accumulated with [`read`](Self::read) once at least the drain threshold
/// (half the capacity by default) is pending.
///
/// # Semantics
///
/// - **Write**: Never blocks. Fails with [`Error::InsufficientSpace`] and
///   writes nothing when the payload does not fit.
/// - **Read**: Never blocks. Copies nothing until the threshold is reached,
///   then copies every published byte into the caller's scratch buffer.
/// - **Flush**: Like read, but ignores the threshold.
///
/// # Locking
///
/// The mutex only covers index bookkeeping. A write reserves a disjoint range
/// under the lock, copies into it after releasing the lock, and then commits.
/// Committed bytes become visible to the reader once no reservation before
/// them is still being copied, so the reader never sees a half-written range.
///
/// Only one thread may read at a time. A second concurrent reader panics.
///
/// # Example
///
/// ```
/// use giztoy_lockring::LockedRing;
///
/// let ring = LockedRing::new(8).unwrap();
/// ring.write(b"abc").unwrap();
///
/// // 3 bytes pending, below the threshold of 4
/// let mut scratch = vec![0u8; ring.capacity()];
/// assert_eq!(ring.read(&mut scratch).len(), 0);
///
/// ring.write(b"de").unwrap();
/// let drained = ring.read(&mut scratch).len();
/// assert_eq!(&scratch[..drained], b"abcde");
/// ```
pub struct LockedRing {
    inner: Arc<RingInner>,
}

pub(crate) struct RingInner {
    storage: Box<[UnsafeCell<u8>]>,
    threshold: usize,
    cursors: Mutex<Cursors>,
    // Bytes whose copies have completed and that the reader may drain,
    // counted from `tail`.
    published: AtomicUsize,
    // Owned by the reader; atomic so accessors can observe it.
    tail: AtomicUsize,
    reading: AtomicBool,
}

struct Cursors {
    head: usize,
    // Reserved and not yet drained. Writers may use `capacity - used`.
    used: usize,
    // Reservations not yet published, oldest first. The front entry starts
    // at `tail + published`.
    in_flight: VecDeque<InFlight>,
    // Ticket of `in_flight[0]`.
    first_ticket: u64,
    next_ticket: u64,
}

struct InFlight {
    len: usize,
    committed: bool,
}

// SAFETY: the byte region is only written through reservations, which cover
// disjoint ranges handed out under the cursor lock, and only read by the single
// reader after the range has been published with release ordering.
unsafe impl Sync for RingInner {}

/// Outcome of [`LockedRing::read`] and [`LockedRing::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// This many bytes were copied to the front of the scratch buffer.
    Drained(usize),
    /// Nothing was copied. `pending` bytes are published but below the
    /// threshold (or the ring is empty).
    Deferred { pending: usize },
}

impl Drain {
    /// Returns the number of bytes populated in the scratch buffer.
    pub fn len(&self) -> usize {
        match *self {
            Drain::Drained(n) => n,
            Drain::Deferred { .. } => 0,
        }
    }

    /// Returns true if nothing was copied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if bytes were copied and the tail advanced.
    pub fn is_drained(&self) -> bool {
        matches!(self, Drain::Drained(_))
    }
}

impl Clone for LockedRing {
    fn clone(&self) -> Self {
        LockedRing {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for LockedRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cursors = self.inner.cursors.lock();
        f.debug_struct("LockedRing")
            .field("capacity", &self.inner.capacity())
            .field("threshold", &self.inner.threshold)
            .field("head", &cursors.head)
            .field("tail", &self.inner.tail.load(Ordering::Acquire))
            .field("used", &cursors.used)
            .field("in_flight", &cursors.in_flight.len())
            .field("published", &self.inner.published.load(Ordering::Acquire))
            .finish()
    }
}

impl LockedRing {
    /// Creates a new ring with the given capacity and the default drain
    /// threshold of `capacity / 2`.
    ///
    /// Returns [`Error::Allocation`] if the backing region cannot be
    /// allocated.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        assert!(capacity > 0, "capacity must be greater than 0");
        Self::build(capacity, capacity / 2)
    }

    /// Creates a new ring from a config. Invalid configs are reported as
    /// [`Error::InvalidConfig`] instead of panicking.
    pub fn with_config(config: &RingConfig) -> Result<Self> {
        config.validate()?;
        Self::build(config.capacity, config.effective_threshold())
    }

    fn build(capacity: usize, threshold: usize) -> Result<Self> {
        let mut storage: Vec<UnsafeCell<u8>> = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|source| Error::Allocation { capacity, source })?;
        storage.resize_with(capacity, || UnsafeCell::new(0));

        debug!("lockring: allocated {} bytes, drain threshold {}", capacity, threshold);

        Ok(LockedRing {
            inner: Arc::new(RingInner {
                storage: storage.into_boxed_slice(),
                threshold,
                cursors: Mutex::new(Cursors {
                    head: 0,
                    used: 0,
                    in_flight: VecDeque::new(),
                    first_ticket: 0,
                    next_ticket: 0,
                }),
                published: AtomicUsize::new(0),
                tail: AtomicUsize::new(0),
                reading: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the ring capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Returns the drain threshold used by [`read`](Self::read).
    pub fn drain_threshold(&self) -> usize {
        self.inner.threshold
    }

    /// Returns the number of bytes reserved and not yet drained.
    pub fn len(&self) -> usize {
        self.inner.cursors.lock().used
    }

    /// Returns true if nothing is reserved or waiting to be drained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of bytes a write could currently claim.
    pub fn available(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Returns the number of bytes the reader could drain right now.
    pub fn pending(&self) -> usize {
        self.inner.published.load(Ordering::Acquire)
    }

    /// Returns the offset the next write will start at.
    pub fn head(&self) -> usize {
        self.inner.cursors.lock().head
    }

    /// Returns the offset the next drain will start at.
    pub fn tail(&self) -> usize {
        self.inner.tail.load(Ordering::Acquire)
    }

    /// Reserves `len` bytes for a two-phase write.
    ///
    /// The returned [`Reservation`] owns a range no other writer can touch.
    /// Fill it through the reservation; dropping it commits the bytes.
    pub fn reserve(&self, len: usize) -> Result<Reservation<'_>> {
        if len == 0 {
            return Ok(Reservation::new(&self.inner, 0, 0, 0));
        }

        let capacity = self.capacity();
        let mut cursors = self.inner.cursors.lock();
        let available = capacity - cursors.used;
        if len > available {
            trace!(
                "lockring: rejected {} byte write, {} available",
                len, available
            );
            return Err(Error::InsufficientSpace {
                requested: len,
                available,
            });
        }

        let offset = cursors.head;
        cursors.head = (offset + len) % capacity;
        cursors.used += len;
        let ticket = cursors.next_ticket;
        cursors.next_ticket += 1;
        cursors.in_flight.push_back(InFlight {
            len,
            committed: false,
        });
        drop(cursors);

        Ok(Reservation::new(&self.inner, ticket, offset, len))
    }

    /// Writes a payload into the ring.
    ///
    /// Either the whole payload is written or nothing is. Writing an empty
    /// payload always succeeds and changes nothing.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        let mut reservation = self.reserve(payload.len())?;
        reservation.copy_from_slice(payload);
        Ok(())
    }

    /// Drains the ring into `scratch` if at least the drain threshold is
    /// pending.
    ///
    /// Drained bytes land at the front of `scratch` in write order.
    ///
    /// # Panics
    ///
    /// Panics if `scratch` is smaller than the ring capacity, or if another
    /// thread is reading concurrently.
    pub fn read(&self, scratch: &mut [u8]) -> Drain {
        self.drain(scratch, self.inner.threshold)
    }

    /// Drains every published byte into `scratch`, ignoring the threshold.
    ///
    /// # Panics
    ///
    /// Same as [`read`](Self::read).
    pub fn flush(&self, scratch: &mut [u8]) -> Drain {
        self.drain(scratch, 0)
    }

    fn drain(&self, scratch: &mut [u8], threshold: usize) -> Drain {
        let inner = &*self.inner;
        let capacity = inner.capacity();
        assert!(
            scratch.len() >= capacity,
            "scratch buffer of {} bytes is smaller than ring capacity {}",
            scratch.len(),
            capacity
        );
        let _reader = ReaderGuard::enter(&inner.reading);

        let pending = inner.published.load(Ordering::Acquire);
        if pending == 0 || pending < threshold {
            return Drain::Deferred { pending };
        }

        let tail = inner.tail.load(Ordering::Relaxed);
        let split1 = pending.min(capacity - tail);
        let split2 = pending - split1;

        // SAFETY: `[tail, tail + pending)` (circular) is published, so every
        // writer into it has committed and no writer can reserve it again
        // until `used` is released below.
        unsafe {
            std::ptr::copy_nonoverlapping(inner.ptr(tail), scratch.as_mut_ptr(), split1);
            if split2 > 0 {
                std::ptr::copy_nonoverlapping(
                    inner.ptr(0),
                    scratch.as_mut_ptr().add(split1),
                    split2,
                );
            }
        }

        inner.tail.store((tail + pending) % capacity, Ordering::Release);
        inner.published.fetch_sub(pending, Ordering::AcqRel);
        inner.cursors.lock().used -= pending;

        trace!("lockring: drained {} bytes from offset {}", pending, tail);
        Drain::Drained(pending)
    }
}

impl RingInner {
    pub(crate) fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Raw pointer to the byte at `offset`; `offset == capacity` is allowed.
    pub(crate) fn ptr(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.capacity());
        UnsafeCell::raw_get(self.storage.as_ptr().wrapping_add(offset))
    }

    /// Marks a reservation as populated and publishes the longest run of
    /// committed reservations at the front of the queue.
    pub(crate) fn commit(&self, ticket: u64) {
        let mut cursors = self.cursors.lock();
        let index = (ticket - cursors.first_ticket) as usize;
        cursors.in_flight[index].committed = true;

        let mut ready = 0;
        while cursors.in_flight.front().is_some_and(|r| r.committed) {
            if let Some(r) = cursors.in_flight.pop_front() {
                ready += r.len;
            }
            cursors.first_ticket += 1;
        }
        if ready > 0 {
            self.published.fetch_add(ready, Ordering::Release);
        }
    }
}

struct ReaderGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ReaderGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        let busy = flag.swap(true, Ordering::Acquire);
        assert!(!busy, "lockring: concurrent readers are not supported");
        ReaderGuard { flag }
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(ring: &LockedRing) -> Vec<u8> {
        vec![0u8; ring.capacity()]
    }

    #[test]
    fn test_new() {
        let ring = LockedRing::new(64).unwrap();
        assert_eq!(ring.capacity(), 64);
        assert_eq!(ring.drain_threshold(), 32);
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.tail(), 0);
        assert!(ring.is_empty());
        assert_eq!(ring.available(), 64);
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn test_new_zero_capacity() {
        let _ = LockedRing::new(0);
    }

    #[test]
    fn test_allocation_failure() {
        let err = LockedRing::new(usize::MAX).unwrap_err();
        assert!(matches!(err, Error::Allocation { capacity: usize::MAX, .. }));
    }

    #[test]
    fn test_with_config() {
        let ring = LockedRing::with_config(&RingConfig::new(32).drain_threshold(4)).unwrap();
        assert_eq!(ring.drain_threshold(), 4);

        ring.write(b"abcd").unwrap();
        let mut buf = scratch(&ring);
        assert_eq!(ring.read(&mut buf), Drain::Drained(4));
        assert_eq!(&buf[..4], b"abcd");
    }

    #[test]
    fn test_with_invalid_config() {
        let err = LockedRing::with_config(&RingConfig::new(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_threshold_gating() {
        let ring = LockedRing::new(100).unwrap();
        let mut buf = scratch(&ring);

        ring.write(&[1u8; 40]).unwrap();
        assert_eq!(ring.read(&mut buf), Drain::Deferred { pending: 40 });
        assert_eq!(ring.tail(), 0);

        ring.write(&[2u8; 20]).unwrap();
        assert_eq!(ring.read(&mut buf), Drain::Drained(60));
        assert_eq!(ring.tail(), ring.head());
        assert_eq!(ring.tail(), 60);
        assert_eq!(&buf[..40], &[1u8; 40][..]);
        assert_eq!(&buf[40..60], &[2u8; 20][..]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wraparound_write_and_read() {
        let ring = LockedRing::new(16).unwrap();
        let mut buf = scratch(&ring);
        let payload: Vec<u8> = (0..20).collect();

        ring.write(&payload[..10]).unwrap();
        assert_eq!(ring.read(&mut buf), Drain::Drained(10));
        let mut out = buf[..10].to_vec();

        // Straddles offset 16.
        ring.write(&payload[10..]).unwrap();
        assert_eq!(ring.head(), 4);
        assert_eq!(ring.read(&mut buf), Drain::Drained(10));
        out.extend_from_slice(&buf[..10]);

        assert_eq!(out, payload);
        assert_eq!(ring.tail(), 4);
    }

    #[test]
    fn test_write_ending_exactly_at_capacity() {
        let ring = LockedRing::new(8).unwrap();
        let mut buf = scratch(&ring);

        ring.write(b"abcdefgh").unwrap();
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.available(), 0);

        assert_eq!(ring.read(&mut buf), Drain::Drained(8));
        assert_eq!(&buf[..8], b"abcdefgh");
        assert_eq!(ring.tail(), 0);
        assert_eq!(ring.available(), 8);
    }

    #[test]
    fn test_insufficient_space_changes_nothing() {
        let ring = LockedRing::new(8).unwrap();
        ring.write(b"12345").unwrap();

        let err = ring.write(b"6789").unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientSpace {
                requested: 4,
                available: 3
            }
        ));
        assert_eq!(ring.head(), 5);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.pending(), 5);

        let mut buf = scratch(&ring);
        assert_eq!(ring.read(&mut buf), Drain::Drained(5));
        assert_eq!(&buf[..5], b"12345");
    }

    #[test]
    fn test_payload_larger_than_capacity() {
        let ring = LockedRing::new(4).unwrap();
        assert!(ring.write(b"too long").unwrap_err().is_insufficient_space());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_empty_write_is_noop() {
        let ring = LockedRing::new(8).unwrap();
        ring.write(b"abc").unwrap();
        ring.write(&[]).unwrap();
        assert_eq!(ring.head(), 3);
        assert_eq!(ring.len(), 3);

        // Even when the ring is full.
        ring.write(b"defgh").unwrap();
        ring.write(&[]).unwrap();
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_repeated_read_when_empty() {
        let ring = LockedRing::new(8).unwrap();
        let mut buf = scratch(&ring);
        for _ in 0..3 {
            assert_eq!(ring.read(&mut buf), Drain::Deferred { pending: 0 });
            assert_eq!(ring.tail(), 0);
        }

        ring.write(b"abcd").unwrap();
        assert!(ring.read(&mut buf).is_drained());
        for _ in 0..3 {
            let drain = ring.read(&mut buf);
            assert!(drain.is_empty());
            assert_eq!(ring.tail(), 4);
        }
    }

    #[test]
    fn test_capacity_one_ring() {
        let ring = LockedRing::new(1).unwrap();
        let mut buf = scratch(&ring);
        assert_eq!(ring.read(&mut buf), Drain::Deferred { pending: 0 });

        for byte in b"xyz" {
            ring.write(&[*byte]).unwrap();
            assert!(ring.write(&[0]).is_err());
            assert_eq!(ring.read(&mut buf), Drain::Drained(1));
            assert_eq!(buf[0], *byte);
        }
    }

    #[test]
    fn test_flush_ignores_threshold() {
        let ring = LockedRing::new(100).unwrap();
        let mut buf = scratch(&ring);
        assert_eq!(ring.flush(&mut buf), Drain::Deferred { pending: 0 });

        ring.write(b"tiny").unwrap();
        assert_eq!(ring.read(&mut buf).len(), 0);
        assert_eq!(ring.flush(&mut buf), Drain::Drained(4));
        assert_eq!(&buf[..4], b"tiny");
        assert!(ring.is_empty());
    }

    #[test]
    fn test_scratch_larger_than_capacity() {
        let ring = LockedRing::new(4).unwrap();
        let mut buf = vec![0xffu8; 16];
        ring.write(b"ab").unwrap();
        assert_eq!(ring.read(&mut buf), Drain::Drained(2));
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(buf[2], 0xff);
    }

    #[test]
    #[should_panic(expected = "smaller than ring capacity")]
    fn test_undersized_scratch_panics() {
        let ring = LockedRing::new(16).unwrap();
        let mut buf = vec![0u8; 15];
        let _ = ring.read(&mut buf);
    }

    #[test]
    fn test_reader_flag_released_after_read() {
        let ring = LockedRing::new(4).unwrap();
        let mut buf = scratch(&ring);
        let _ = ring.read(&mut buf);
        assert!(!ring.inner.reading.load(Ordering::Acquire));
    }

    #[test]
    #[should_panic(expected = "concurrent readers are not supported")]
    fn test_concurrent_reader_panics() {
        let ring = LockedRing::new(4).unwrap();
        // Simulate a reader that is still inside `read`.
        let _active = ReaderGuard::enter(&ring.inner.reading);
        let mut buf = scratch(&ring);
        let _ = ring.read(&mut buf);
    }

    #[test]
    fn test_reserved_bytes_invisible_until_committed() {
        let ring = LockedRing::new(8).unwrap();
        let mut buf = scratch(&ring);

        let mut first = ring.reserve(4).unwrap();
        ring.write(b"efgh").unwrap();

        // The second write committed, but sits behind an open reservation.
        assert_eq!(ring.pending(), 0);
        assert_eq!(ring.len(), 8);
        assert_eq!(ring.flush(&mut buf), Drain::Deferred { pending: 0 });

        first.copy_from_slice(b"abcd");
        drop(first);

        assert_eq!(ring.pending(), 8);
        assert_eq!(ring.read(&mut buf), Drain::Drained(8));
        assert_eq!(&buf[..8], b"abcdefgh");
    }

    #[test]
    fn test_drain_releases_space() {
        let ring = LockedRing::new(10).unwrap();
        let mut buf = scratch(&ring);

        ring.write(&[7u8; 6]).unwrap();
        assert_eq!(ring.available(), 4);
        assert!(ring.write(&[0u8; 5]).is_err());

        ring.read(&mut buf);
        assert_eq!(ring.available(), 10);
        ring.write(&[8u8; 10]).unwrap();
        assert_eq!(ring.read(&mut buf), Drain::Drained(10));
        assert_eq!(&buf[..10], &[8u8; 10][..]);
    }

    #[test]
    fn test_clone_shares_ring() {
        let ring = LockedRing::new(8).unwrap();
        let other = ring.clone();
        other.write(b"shared").unwrap();
        assert_eq!(ring.len(), 6);
        assert_eq!(ring.head(), other.head());
    }

    #[test]
    fn test_drain_len() {
        assert_eq!(Drain::Drained(5).len(), 5);
        assert!(Drain::Drained(5).is_drained());
        assert_eq!(Drain::Deferred { pending: 5 }.len(), 0);
        assert!(Drain::Deferred { pending: 5 }.is_empty());
        assert!(!Drain::Deferred { pending: 0 }.is_drained());
    }

    #[test]
    fn test_debug_output() {
        let ring = LockedRing::new(8).unwrap();
        ring.write(b"ab").unwrap();
        let s = format!("{:?}", ring);
        assert!(s.contains("capacity: 8"));
        assert!(s.contains("head: 2"));
    }
}
