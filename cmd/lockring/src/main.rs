//! lockring - Stress and verification tool for the locked byte ring.

mod config;
mod stress;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::StressConfig;

/// Stress tool for giztoy-lockring.
///
/// Spawns producer threads that write tagged payloads into one ring while the
/// main thread drains it, then checks that every payload arrived intact and in
/// per-producer order.
#[derive(Parser, Debug)]
#[command(name = "lockring")]
#[command(about = "Multi-producer stress test for the locked byte ring")]
#[command(version)]
struct Args {
    /// Config file (YAML or JSON); flags override its values
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Ring capacity in bytes
    #[arg(long)]
    capacity: Option<usize>,

    /// Pending bytes required before a drain (default: capacity / 2)
    #[arg(long)]
    threshold: Option<usize>,

    /// Number of producer threads
    #[arg(short = 'p', long)]
    producers: Option<usize>,

    /// Messages per producer
    #[arg(short = 'n', long)]
    messages: Option<u64>,

    /// Payload size in bytes (at least 12)
    #[arg(short = 's', long)]
    payload_size: Option<usize>,

    /// Output the report as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    fn stress_config(&self) -> Result<StressConfig> {
        let mut config = match &self.file {
            Some(path) => StressConfig::load(path)?,
            None => StressConfig::default(),
        };
        if let Some(capacity) = self.capacity {
            config.ring.capacity = capacity;
        }
        if let Some(threshold) = self.threshold {
            config.ring.drain_threshold = Some(threshold);
        }
        if let Some(producers) = self.producers {
            config.producers = producers;
        }
        if let Some(messages) = self.messages {
            config.messages = messages;
        }
        if let Some(payload_size) = self.payload_size {
            config.payload_size = payload_size;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = args.stress_config()?;
    let report = stress::run(&config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Capacity:        {} bytes (threshold {})", report.capacity, report.drain_threshold);
        println!("Producers:       {}", report.producers);
        println!("Messages:        {} x {} bytes", report.messages, report.payload_size);
        println!("Drains:          {} ({} deferred reads)", report.drains, report.deferred_reads);
        println!("Rejected writes: {}", report.rejected_writes);
        println!("Elapsed:         {} ms", report.elapsed_ms);
        println!("Throughput:      {:.2} MB/s", report.throughput_mb_s);
        println!("All payloads verified.");
    }

    Ok(())
}
