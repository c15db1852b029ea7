//! Fixed-capacity byte ring for batching messages between threads.
//!
//! [`LockedRing`] stages variable-length byte payloads (log lines, events)
//! written by any number of producer threads and drained in bulk by a single
//! consumer. Both sides are non-blocking: a write that does not fit fails, and
//! a read that finds too little data returns without copying.
//!
//! # Writing
//!
//! [`LockedRing::write`] copies a whole payload or nothing. Internally it is a
//! [`reserve`](LockedRing::reserve) followed by a copy: the reservation claims
//! a disjoint byte range under a mutex, and the copy runs after the mutex is
//! released, so concurrent producers copy in parallel.
//!
//! ```
//! use giztoy_lockring::LockedRing;
//!
//! let ring = LockedRing::new(1024).unwrap();
//! ring.write(b"event 1\n").unwrap();
//!
//! let mut reservation = ring.reserve(8).unwrap();
//! reservation.copy_from_slice(b"event 2\n");
//! drop(reservation); // commit
//! ```
//!
//! # Draining
//!
//! [`LockedRing::read`] waits for the drain threshold (half the capacity by
//! default) before copying everything pending into a scratch buffer at least
//! as large as the ring. [`LockedRing::flush`] ignores the threshold.
//!
//! ```
//! use giztoy_lockring::{Drain, LockedRing};
//!
//! let ring = LockedRing::new(16).unwrap();
//! let mut scratch = vec![0u8; ring.capacity()];
//!
//! ring.write(b"hello").unwrap();
//! assert_eq!(ring.read(&mut scratch), Drain::Deferred { pending: 5 });
//!
//! ring.write(b" world").unwrap();
//! assert_eq!(ring.read(&mut scratch), Drain::Drained(11));
//! assert_eq!(&scratch[..11], b"hello world");
//! ```
//!
//! # Thread Safety
//!
//! `LockedRing` is `Send + Sync`; `Clone` shares the same ring via `Arc`.
//! Only one thread may drain at a time.

mod bytes;
mod config;
mod error;
mod reservation;
mod ring_buffer;

pub use bytes::*;
pub use config::RingConfig;
pub use error::{Error, Result};
pub use reservation::Reservation;
pub use ring_buffer::{Drain, LockedRing};
