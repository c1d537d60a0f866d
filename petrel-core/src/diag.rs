//! Diagnostics Snapshot
//!
//! Side channel, not core logic: a point-in-time view of pipeline health
//! (uptime, spill-store occupancy, watermark state) logged periodically by
//! the sampler and exposed for the node's command channel to serialize.

use std::sync::Arc;
use std::time::Instant;

use log::info;
use serde::Serialize;

use crate::errors::TelemetryResult;
use crate::signal::{Flag, SignalGroup};
use crate::store::SpillStore;

/// Point-in-time pipeline health
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Milliseconds since the subsystem started
    pub uptime_ms: u64,
    /// Spill store free space, KiB
    pub disk_free_kib: u64,
    /// Spill store quota, KiB
    pub disk_total_kib: u64,
    /// `LOW_WATER` currently set
    pub ring_low_water: bool,
    /// `HIGH_WATER` currently set
    pub ring_high_water: bool,
    /// Free space currently below the reserve floor
    pub disk_high_water: bool,
}

/// Snapshot producer shared with the sampler task
pub struct Diagnostics {
    started: Instant,
    store: Arc<SpillStore>,
    signals: Arc<SignalGroup>,
    disk_floor_kib: u64,
}

impl Diagnostics {
    /// New producer; uptime counts from here
    pub fn new(store: Arc<SpillStore>, signals: Arc<SignalGroup>, disk_floor_kib: u64) -> Self {
        Self {
            started: Instant::now(),
            store,
            signals,
            disk_floor_kib,
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> TelemetryResult<StatsSnapshot> {
        let flags = self.signals.get();
        let disk_free_kib = self.store.free_kib()?;
        Ok(StatsSnapshot {
            uptime_ms: self.started.elapsed().as_millis() as u64,
            disk_free_kib,
            disk_total_kib: self.store.total_kib(),
            ring_low_water: flags.contains(Flag::LowWater),
            ring_high_water: flags.contains(Flag::HighWater),
            disk_high_water: disk_free_kib < self.disk_floor_kib,
        })
    }

    /// Log the snapshot at info level
    pub fn log_stats(&self) {
        match self.snapshot() {
            Ok(stats) => {
                let ms = stats.uptime_ms;
                let uptime = format!(
                    "{:02}:{:02}:{:02}.{:03}",
                    ms / 3_600_000,
                    ms / 60_000 % 60,
                    ms / 1000 % 60,
                    ms % 1000
                );
                info!(
                    "current stats: disk_free_kb={} disk_total_kb={} low_water={} high_water={} uptime={}",
                    stats.disk_free_kib,
                    stats.disk_total_kib,
                    stats.ring_low_water,
                    stats.ring_high_water,
                    uptime
                );
            }
            Err(e) => info!("stats unavailable: {e}"),
        }
    }
}
