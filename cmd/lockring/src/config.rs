//! Stress run configuration.

use std::path::Path;

use anyhow::{bail, Context, Result};
use giztoy_lockring::RingConfig;
use serde::{Deserialize, Serialize};

/// Bytes at the start of every payload: producer id (u32) + sequence (u64).
pub const HEADER_SIZE: usize = 12;

/// Configuration file format.
///
/// ```yaml
/// ring:
///   capacity: 65536
///   drain_threshold: 16384
/// producers: 4
/// messages: 100000
/// payload_size: 64
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressConfig {
    #[serde(default = "default_ring")]
    pub ring: RingConfig,
    #[serde(default = "default_producers")]
    pub producers: usize,
    /// Messages written by each producer.
    #[serde(default = "default_messages")]
    pub messages: u64,
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
}

fn default_ring() -> RingConfig {
    RingConfig::new(64 * 1024)
}

fn default_producers() -> usize {
    4
}

fn default_messages() -> u64 {
    100_000
}

fn default_payload_size() -> usize {
    64
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            ring: default_ring(),
            producers: default_producers(),
            messages: default_messages(),
            payload_size: default_payload_size(),
        }
    }
}

impl StressConfig {
    /// Load a config from a YAML or JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let config = match ext {
            "json" => serde_json::from_slice(&data)?,
            _ => serde_yaml::from_slice(&data)?,
        };
        Ok(config)
    }

    /// Check that a run with this config can complete.
    pub fn validate(&self) -> Result<()> {
        self.ring.validate()?;
        if self.producers == 0 {
            bail!("producers must be greater than 0");
        }
        if self.payload_size < HEADER_SIZE {
            bail!(
                "payload size {} is smaller than the {} byte header",
                self.payload_size,
                HEADER_SIZE
            );
        }
        let total = (self.producers as u64)
            .checked_mul(self.messages)
            .and_then(|n| n.checked_mul(self.payload_size as u64));
        if total.is_none() {
            bail!(
                "{} producers x {} messages of {} bytes overflows the byte count",
                self.producers,
                self.messages,
                self.payload_size
            );
        }
        if self.payload_size > self.ring.capacity {
            bail!(
                "payload size {} exceeds ring capacity {}",
                self.payload_size,
                self.ring.capacity
            );
        }
        Ok(())
    }
}
