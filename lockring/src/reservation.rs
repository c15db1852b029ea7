//! Two-phase write handle.

use std::fmt;

use crate::ring_buffer::RingInner;

/// A range of ring bytes reserved for one writer.
///
/// Obtained from [`LockedRing::reserve`](crate::LockedRing::reserve). The range
/// was claimed under the ring lock and belongs to this handle alone, so it can
/// be filled without holding the lock. The handle cannot be cloned.
///
/// Dropping the reservation commits it. The bytes become readable once every
/// reservation taken before it has been committed too. A reservation dropped
/// without being filled commits whatever stale bytes the range held.
///
/// # Leaking
///
/// A reservation leaked with [`std::mem::forget`] is never committed. The
/// reader cannot drain past it and its space is never released, so the ring
/// stalls: later writes are accepted until the ring fills but stay unreadable,
/// and then every write fails with
/// [`Error::InsufficientSpace`](crate::Error::InsufficientSpace).
///
/// ```
/// use giztoy_lockring::LockedRing;
///
/// let ring = LockedRing::new(8).unwrap();
/// let mut reservation = ring.reserve(4).unwrap();
/// let (first, second) = reservation.segments_mut();
/// first.copy_from_slice(b"ping");
/// assert!(second.is_empty());
/// drop(reservation);
///
/// assert_eq!(ring.pending(), 4);
/// ```
pub struct Reservation<'a> {
    ring: &'a RingInner,
    ticket: u64,
    offset: usize,
    len: usize,
}

impl<'a> Reservation<'a> {
    pub(crate) fn new(ring: &'a RingInner, ticket: u64, offset: usize, len: usize) -> Self {
        Reservation {
            ring,
            ticket,
            offset,
            len,
        }
    }

    /// Returns the ring offset the range starts at.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the number of reserved bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length reservation.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the range wraps past the end of the ring.
    pub fn wraps(&self) -> bool {
        self.len > self.ring.capacity() - self.offset
    }

    /// Returns the reserved range as two slices in write order. The second
    /// slice is empty unless the range wraps to the start of the ring.
    pub fn segments_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        if self.len == 0 {
            return (&mut [], &mut []);
        }
        let split1 = self.len.min(self.ring.capacity() - self.offset);
        let split2 = self.len - split1;

        // SAFETY: `[offset, offset + split1)` and `[0, split2)` lie inside the
        // storage, do not overlap each other (split1 + split2 <= capacity), and
        // were handed to this reservation alone. The reader does not touch
        // them before the reservation is committed.
        unsafe {
            (
                std::slice::from_raw_parts_mut(self.ring.ptr(self.offset), split1),
                std::slice::from_raw_parts_mut(self.ring.ptr(0), split2),
            )
        }
    }

    /// Fills the whole range from `payload`.
    ///
    /// # Panics
    ///
    /// Panics if `payload.len()` differs from the reserved length.
    pub fn copy_from_slice(&mut self, payload: &[u8]) {
        assert_eq!(
            payload.len(),
            self.len,
            "payload length does not match reservation"
        );
        let (first, second) = self.segments_mut();
        let split1 = first.len();
        first.copy_from_slice(&payload[..split1]);
        second.copy_from_slice(&payload[split1..]);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.len > 0 {
            self.ring.commit(self.ticket);
        }
    }
}

impl fmt::Debug for Reservation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
