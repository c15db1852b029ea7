//! Error types for ring operations.

use std::collections::TryReserveError;

/// Result type alias for lockring.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ring operations.
///
/// Misuse of the API (zero capacity, undersized scratch buffers, a second
/// concurrent reader) is not represented here; those panic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing region could not be allocated.
    #[error("lockring: cannot allocate {capacity} bytes: {source}")]
    Allocation {
        capacity: usize,
        #[source]
        source: TryReserveError,
    },

    /// A write did not fit into the free space. Nothing was written.
    #[error("lockring: insufficient space: requested {requested}, available {available}")]
    InsufficientSpace { requested: usize, available: usize },

    /// Invalid configuration.
    #[error("lockring: invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns true if the error is a rejected write that may succeed after
    /// the consumer drains.
    pub fn is_insufficient_space(&self) -> bool {
        matches!(self, Error::InsufficientSpace { .. })
    }
}
