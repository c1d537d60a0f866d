//! Buffered Pipeline Example
//!
//! This example runs the whole telemetry pipeline against simulated sources
//! and a publisher that prints envelopes to stdout, toggling the uplink
//! flags by hand to show the spill-and-recover behavior.
//!
//! ## What You'll Learn
//!
//! - Registering reading sources
//! - Starting and stopping the subsystem
//! - How the uplink flags gate spilling vs. publishing
//!
//! ## Running the Example
//!
//! ```bash
//! cargo run --example 01_buffered_pipeline
//! ```

use std::sync::Arc;
use std::time::Duration;

use petrel_core::publish::{PublishError, Publisher};
use petrel_core::{Flag, FixedSource, SourceSet, TelemetryConfig, TelemetrySystem};

/// Publisher that prints every envelope it accepts
struct StdoutPublisher;

impl Publisher for StdoutPublisher {
    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        println!("[{topic}] {}", String::from_utf8_lossy(payload));
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Petrel Buffered Pipeline Example");
    println!("================================\n");

    let mut sources = SourceSet::new();
    sources.register(Box::new(FixedSource::new(
        "sht4x",
        &["C", "%rH"],
        &[21.4, 48.0],
    )))?;
    sources.register(Box::new(FixedSource::new(
        "ltr390",
        &["uvi", "lux"],
        &[2.0, 11500.0],
    )))?;

    let mut config = TelemetryConfig::for_capacity(4096);
    config.sample_period = Duration::from_millis(200);
    config.spill_root = std::env::temp_dir().join("petrel-example-spill");
    // Drain as soon as a handful of readings are buffered
    config.low_water_items = 3;

    let mut system = TelemetrySystem::init(config, sources, Arc::new(StdoutPublisher))?;
    let signals = system.signals();
    system.start()?;

    println!("Sampling with the uplink down for 2 seconds...");
    std::thread::sleep(Duration::from_secs(2));
    println!("Buffered items: {}\n", system.buffered_items());

    println!("Bringing the uplink up; buffered readings drain oldest-first:\n");
    signals.clear(Flag::UplinkDown);
    signals.set(Flag::UplinkStarted);
    signals.set(Flag::UplinkConnected);
    std::thread::sleep(Duration::from_secs(2));

    system.stop();
    println!("\nDone. Final stats: {:?}", system.stats()?);
    Ok(())
}
