//! Ring configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`LockedRing`](crate::LockedRing).
///
/// `drain_threshold` is the number of published bytes that must accumulate
/// before [`read`](crate::LockedRing::read) copies anything out. When unset it
/// defaults to half the capacity.
///
/// ```
/// use giztoy_lockring::RingConfig;
///
/// let config = RingConfig::new(4096).drain_threshold(1024);
/// assert_eq!(config.effective_threshold(), 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Size of the backing region in bytes.
    pub capacity: usize,

    /// Minimum pending bytes before a drain happens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_threshold: Option<usize>,
}

impl RingConfig {
    /// Create a config with the default threshold (half the capacity).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            drain_threshold: None,
        }
    }

    /// Set the drain threshold.
    pub fn drain_threshold(mut self, threshold: usize) -> Self {
        self.drain_threshold = Some(threshold);
        self
    }

    /// Returns the threshold the ring will actually use.
    pub fn effective_threshold(&self) -> usize {
        self.drain_threshold.unwrap_or(self.capacity / 2)
    }

    /// Check the config before building a ring from it.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig(
                "capacity must be greater than 0".into(),
            ));
        }
        if let Some(threshold) = self.drain_threshold {
            if threshold > self.capacity {
                return Err(Error::InvalidConfig(format!(
                    "drain threshold {} exceeds capacity {}",
                    threshold, self.capacity
                )));
            }
        }
        Ok(())
    }
}
