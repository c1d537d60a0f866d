//! The Three Pipeline Tasks
//!
//! One module per task, one thread per task at runtime:
//!
//! - [`sampler`] polls the reading sources on a fixed period and feeds the
//!   ring buffer, raising the pressure watermarks.
//! - [`spill`] is the backpressure valve: when the uplink is absent and the
//!   ring is nearly full, it drains the ring into timestamped spill files,
//!   and pauses sampling when storage itself runs out.
//! - [`drain`] batches the oldest buffered readings (files first) into an
//!   envelope and hands it to the publisher, retrying until accepted.
//!
//! Task bodies are plain functions over a [`TaskContext`] so tests can drive
//! them on their own threads without the runtime. Each returns `Ok(())` on a
//! cooperative shutdown; an `Err` is corruption-tier and the spawner aborts
//! the process.

pub mod drain;
pub mod sampler;
pub mod spill;

use std::sync::Arc;

use crate::config::TelemetryConfig;
use crate::iter::ClearThresholds;
use crate::ring::ReadingRing;
use crate::signal::SignalGroup;
use crate::source::SourceSet;
use crate::store::SpillStore;

/// Shared handles injected into every task at spawn time
///
/// All cheap clones; the task threads each hold one.
#[derive(Clone)]
pub struct TaskContext {
    /// Ring buffer store
    pub ring: Arc<ReadingRing>,
    /// Spill file store
    pub store: Arc<SpillStore>,
    /// Watermark flag group
    pub signals: Arc<SignalGroup>,
    /// Registered reading sources
    pub sources: Arc<SourceSet>,
    /// Pipeline tunables
    pub config: Arc<TelemetryConfig>,
}

impl TaskContext {
    /// Thresholds the read iterator clears watermarks against
    pub fn clear_thresholds(&self) -> ClearThresholds {
        ClearThresholds {
            high_water_free: self.config.high_water_free,
        }
    }

    /// Build the read iterator a consuming task drives
    pub fn read_iter(&self) -> crate::iter::ReadIter {
        crate::iter::ReadIter::new(
            Arc::clone(&self.ring),
            Arc::clone(&self.store),
            Arc::clone(&self.signals),
            self.clear_thresholds(),
        )
    }
}
