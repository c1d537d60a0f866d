//! Buffered telemetry pipeline for Petrel sensor nodes
//!
//! Store-and-forward core for devices whose uplink is frequently absent:
//! readings flow from sampled sources into a bounded ring buffer, spill to
//! timestamped files when the ring fills while offline, and drain
//! oldest-first to a publisher once the uplink returns. No reading is
//! silently dropped - backpressure stalls the sampler instead.
//!
//! Key constraints:
//! - Single-core, memory-constrained targets; fixed buffer footprints
//! - Tasks coordinate through sticky level-triggered flags, not shared locks
//! - At-least-once delivery end to end
//!
//! ```no_run
//! use std::sync::Arc;
//! use petrel_core::{TelemetrySystem, TelemetryConfig, SourceSet, FixedSource};
//! # use petrel_core::publish::{Publisher, PublishError};
//! # struct Stdout;
//! # impl Publisher for Stdout {
//! #     fn enqueue(&self, _t: &str, _p: &[u8]) -> Result<(), PublishError> { Ok(()) }
//! # }
//!
//! let mut sources = SourceSet::new();
//! sources.register(Box::new(FixedSource::new("sht4x", &["C", "%rH"], &[21.0, 48.0])))?;
//!
//! let mut system = TelemetrySystem::init(
//!     TelemetryConfig::default(),
//!     sources,
//!     Arc::new(Stdout),
//! )?;
//! system.start()?;
//! # system.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod diag;
pub mod errors;
pub mod frame;
pub mod iter;
pub mod payload;
pub mod publish;
pub mod ring;
pub mod signal;
pub mod source;
pub mod store;
pub mod tasks;

mod runtime;

// Public API
pub use config::TelemetryConfig;
pub use diag::StatsSnapshot;
pub use errors::{TelemetryError, TelemetryResult};
pub use frame::{FramedReading, MAX_FRAME_BYTES};
pub use payload::{FixedSource, ScalarReading};
pub use publish::Publisher;
pub use runtime::TelemetrySystem;
pub use signal::{Flag, FlagSet, SignalGroup};
pub use source::{ReadingSource, SourceError, SourceSet};

/// Crate version, for diagnostics
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
