//! Pipeline Configuration
//!
//! All tunables in one struct, deserializable from the node's config file.
//! Defaults reproduce the reference deployment: an 8 KiB ring with the low
//! watermark at half capacity and the high watermark at one eighth, a 15-item
//! count trigger, a 128 KiB storage floor, 5 s retry cooldown, batches of 10,
//! and a stats line every 250 sampler cycles.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default ring capacity in bytes
pub const DEFAULT_RING_CAPACITY: usize = 8 * 1024;

/// Default storage floor in KiB; below this the spill task pauses sampling
pub const DEFAULT_DISK_FLOOR_KIB: u64 = 128;

/// Tunables for one telemetry subsystem instance
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Ring buffer capacity in encoded bytes
    pub ring_capacity: usize,
    /// Set `LOW_WATER` when free ring bytes drop below this
    pub low_water_free: usize,
    /// Set `HIGH_WATER` when free ring bytes drop below this (more urgent)
    pub high_water_free: usize,
    /// Also set `LOW_WATER` when the item count exceeds this; 0 disables
    pub low_water_items: usize,
    /// Sampler cycle period
    pub sample_period: Duration,
    /// Backoff before retrying a full ring or a bounced publish
    pub retry_cooldown: Duration,
    /// Most readings drained into one published envelope
    pub batch_max: usize,
    /// Spill file directory
    pub spill_root: PathBuf,
    /// Byte quota for the spill root
    pub disk_quota_bytes: u64,
    /// Free-space floor in KiB reserved on the spill store
    pub disk_floor_kib: u64,
    /// Emit a diagnostics log line every this many sampler cycles
    pub stats_interval_cycles: u32,
    /// Topic the drain task publishes envelopes to
    pub sensor_topic: String,
    /// Device identifier carried in envelope metadata
    pub device_id: String,
    /// Bound on the stop() wait for an in-flight spill file to close
    pub stop_flush_timeout: Duration,
}

impl TelemetryConfig {
    /// Config for a given ring capacity with thresholds derived the
    /// reference way: low water at half capacity (less one max-ish item),
    /// high water at one eighth
    pub fn for_capacity(ring_capacity: usize) -> Self {
        Self {
            ring_capacity,
            low_water_free: (ring_capacity / 2).saturating_sub(32),
            high_water_free: ring_capacity / 8,
            low_water_items: 15,
            sample_period: Duration::from_secs(10),
            retry_cooldown: Duration::from_secs(5),
            batch_max: 10,
            spill_root: PathBuf::from("log_data"),
            disk_quota_bytes: 4 * 1024 * 1024,
            disk_floor_kib: DEFAULT_DISK_FLOOR_KIB,
            stats_interval_cycles: 250,
            sensor_topic: String::from("telemetry/sensor"),
            device_id: String::from("petrel-node"),
            stop_flush_timeout: Duration::from_secs(5),
        }
    }

    /// Spill byte budget for one file: free space minus the floor
    pub fn spill_budget_bytes(&self, free_kib: u64) -> u64 {
        free_kib.saturating_sub(self.disk_floor_kib) * 1024
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::for_capacity(DEFAULT_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_derive_from_capacity() {
        let config = TelemetryConfig::for_capacity(4096);
        assert_eq!(config.low_water_free, 2048 - 32);
        assert_eq!(config.high_water_free, 512);
    }

    #[test]
    fn spill_budget_respects_floor() {
        let config = TelemetryConfig::default();
        assert_eq!(config.spill_budget_bytes(200), (200 - 128) * 1024);
        // At or below the floor there is no budget
        assert_eq!(config.spill_budget_bytes(128), 0);
        assert_eq!(config.spill_budget_bytes(17), 0);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: TelemetryConfig = serde_json::from_str(r#"{"batch_max": 4}"#).unwrap();
        assert_eq!(config.batch_max, 4);
        assert_eq!(config.ring_capacity, DEFAULT_RING_CAPACITY);
    }
}
