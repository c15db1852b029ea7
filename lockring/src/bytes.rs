//! Convenience constructors for common ring sizes.

use crate::LockedRing;
use crate::error::Result;

/// Creates a 1KB ring.
pub fn lockring_1kb() -> Result<LockedRing> {
    LockedRing::new(1024)
}

/// Creates a 4KB ring.
pub fn lockring_4kb() -> Result<LockedRing> {
    LockedRing::new(4096)
}

/// Creates a 16KB ring.
pub fn lockring_16kb() -> Result<LockedRing> {
    LockedRing::new(16384)
}

/// Creates a 64KB ring.
pub fn lockring_64kb() -> Result<LockedRing> {
    LockedRing::new(65536)
}

/// Creates a ring with the specified capacity.
///
/// # Panics
///
/// Panics if `size` is 0.
pub fn lockring(size: usize) -> Result<LockedRing> {
    LockedRing::new(size)
}
