//! Multi-producer stress run with payload verification.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, ensure, Result};
use chrono::Utc;
use giztoy_lockring::{Drain, LockedRing};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{StressConfig, HEADER_SIZE};

/// Result of one stress run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressReport {
    pub timestamp: String,
    pub capacity: usize,
    pub drain_threshold: usize,
    pub producers: usize,
    pub payload_size: usize,
    pub messages: u64,
    pub bytes: u64,
    /// Writes rejected with insufficient space and retried.
    pub rejected_writes: u64,
    pub drains: u64,
    pub deferred_reads: u64,
    pub elapsed_ms: u64,
    pub throughput_mb_s: f64,
}

/// Fill a payload for `(producer, seq)`.
pub fn encode_payload(buf: &mut [u8], producer: u32, seq: u64) {
    buf[..4].copy_from_slice(&producer.to_le_bytes());
    buf[4..HEADER_SIZE].copy_from_slice(&seq.to_le_bytes());
    for (i, b) in buf[HEADER_SIZE..].iter_mut().enumerate() {
        *b = filler(producer, seq, i);
    }
}

/// Check a payload and return its `(producer, seq)`.
pub fn decode_payload(buf: &[u8]) -> Result<(u32, u64)> {
    ensure!(buf.len() >= HEADER_SIZE, "payload shorter than header");
    let producer = u32::from_le_bytes(buf[..4].try_into()?);
    let seq = u64::from_le_bytes(buf[4..HEADER_SIZE].try_into()?);
    for (i, b) in buf[HEADER_SIZE..].iter().enumerate() {
        ensure!(
            *b == filler(producer, seq, i),
            "corrupt payload from producer {} seq {} at byte {}",
            producer,
            seq,
            HEADER_SIZE + i
        );
    }
    Ok((producer, seq))
}

fn filler(producer: u32, seq: u64, i: usize) -> u8 {
    (producer as u64)
        .wrapping_mul(31)
        .wrapping_add(seq)
        .wrapping_add(i as u64) as u8
}

/// Run producers against one consumer and verify every payload.
pub fn run(config: &StressConfig) -> Result<StressReport> {
    config.validate()?;
    let ring = LockedRing::with_config(&config.ring)?;
    info!(
        "Starting {} producers x {} messages of {} bytes, capacity {}",
        config.producers,
        config.messages,
        config.payload_size,
        ring.capacity()
    );

    let started = Instant::now();
    let finished = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..config.producers)
        .map(|id| {
            let ring = ring.clone();
            let finished = Arc::clone(&finished);
            let messages = config.messages;
            let payload_size = config.payload_size;
            thread::spawn(move || produce(&ring, id as u32, messages, payload_size, &finished))
        })
        .collect();

    let total = config.producers as u64 * config.messages;
    let mut next_seq = vec![0u64; config.producers];
    let mut scratch = vec![0u8; ring.capacity()];
    let mut received = 0u64;
    let mut drains = 0u64;
    let mut deferred_reads = 0u64;

    while received < total {
        let producers_done = finished.load(Ordering::Acquire) == config.producers;
        // A threshold close to the capacity can leave every producer stuck
        // below it.
        let stalled = ring.available() < config.payload_size;
        let drain = if producers_done || stalled {
            ring.flush(&mut scratch)
        } else {
            ring.read(&mut scratch)
        };

        let n = match drain {
            Drain::Drained(n) => n,
            Drain::Deferred { .. } => {
                deferred_reads += 1;
                thread::yield_now();
                continue;
            }
        };
        drains += 1;
        ensure!(
            n % config.payload_size == 0,
            "drained {} bytes, not a whole number of payloads",
            n
        );

        for payload in scratch[..n].chunks(config.payload_size) {
            let (producer, seq) = decode_payload(payload)?;
            let expected = next_seq
                .get_mut(producer as usize)
                .ok_or_else(|| anyhow!("unknown producer {}", producer))?;
            ensure!(
                seq == *expected,
                "producer {} sent seq {} but {} was expected",
                producer,
                seq,
                expected
            );
            *expected += 1;
            received += 1;
        }
        debug!("Drained {} bytes, {}/{} messages", n, received, total);
    }

    let mut rejected_writes = 0u64;
    for handle in handles {
        rejected_writes += handle
            .join()
            .map_err(|_| anyhow!("producer thread panicked"))?;
    }

    let elapsed = started.elapsed();
    let bytes = total * config.payload_size as u64;
    let secs = elapsed.as_secs_f64();
    let throughput_mb_s = if secs > 0.0 {
        bytes as f64 / secs / (1024.0 * 1024.0)
    } else {
        0.0
    };

    Ok(StressReport {
        timestamp: Utc::now().to_rfc3339(),
        capacity: ring.capacity(),
        drain_threshold: ring.drain_threshold(),
        producers: config.producers,
        payload_size: config.payload_size,
        messages: total,
        bytes,
        rejected_writes,
        drains,
        deferred_reads,
        elapsed_ms: elapsed.as_millis() as u64,
        throughput_mb_s,
    })
}

/// Write `messages` payloads, retrying while the ring is full.
/// Returns the number of rejected attempts.
fn produce(
    ring: &LockedRing,
    id: u32,
    messages: u64,
    payload_size: usize,
    finished: &AtomicUsize,
) -> u64 {
    let mut payload = vec![0u8; payload_size];
    let mut rejected = 0u64;

    for seq in 0..messages {
        encode_payload(&mut payload, id, seq);
        // Only InsufficientSpace can occur; the payload fits the capacity.
        while ring.write(&payload).is_err() {
            rejected += 1;
            thread::yield_now();
        }
    }

    debug!("Producer {} done, {} rejected writes", id, rejected);
    finished.fetch_add(1, Ordering::Release);
    rejected
}
