//! Error Types for the Telemetry Pipeline
//!
//! ## Design Philosophy
//!
//! Petrel splits failures into three tiers, and the type system keeps the
//! tiers apart:
//!
//! 1. **Transient/retryable**: a sensor that failed to measure, a ring buffer
//!    with no room, a publish that bounced off a flaky uplink. These never
//!    surface as `TelemetryError` - each task handles them locally with the
//!    watermark flags and retry delays.
//!
//! 2. **Degraded-mode**: disk below the reserve floor, uplink absent. Also
//!    handled in-task by flag transitions (pause sampling, spill instead of
//!    publish).
//!
//! 3. **Fatal/corruption**: everything in this module. A stored frame whose
//!    declared length exceeds the maximum, a file that was just listed but
//!    cannot be opened, an oversized ring reservation, a publish rejected as
//!    malformed. These indicate memory corruption or misconfiguration, and
//!    the pipeline aborts rather than risk an unbounded read or silent data
//!    loss. Task entry points propagate them out with `?`; the runtime treats
//!    a task returning `Err` as unrecoverable.
//!
//! Nothing recoverable is allowed to propagate up and take the device down.

use thiserror::Error;

/// Result type for pipeline operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Unrecoverable pipeline errors
///
/// Every variant here is in the fatal/corruption tier; see the module docs.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A frame declared a length beyond the fixed maximum.
    ///
    /// Raised when decoding a spill file or accepting a payload. Indicates
    /// on-disk corruption or a source handing over garbage.
    #[error("frame of {declared} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Total encoded size the frame claims
        declared: usize,
        /// Hard frame-size ceiling
        max: usize,
    },

    /// A spill file ended mid-record.
    #[error("truncated frame in {file}: {detail}")]
    TruncatedFrame {
        /// Offending spill file
        file: String,
        /// What was being read when the bytes ran out
        detail: &'static str,
    },

    /// A ring reservation was requested that can never succeed.
    ///
    /// `reserve()` with a size above the total ring capacity is a
    /// configuration or programming error, not backpressure.
    #[error("reservation of {requested} bytes exceeds ring capacity {capacity}")]
    OversizedReservation {
        /// Bytes requested
        requested: usize,
        /// Total ring capacity
        capacity: usize,
    },

    /// A frame referenced a source index with no registration.
    #[error("no source registered at index {0}")]
    UnknownSource(u8),

    /// Storage operation failed in a way degraded mode cannot absorb.
    ///
    /// Opening a file that was just statted as present, or a write failing
    /// while the byte budget says space remains.
    #[error("spill storage failure at {path}: {source}")]
    Storage {
        /// Path involved
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The publisher rejected a message as malformed.
    ///
    /// Retryable publish failures never reach this type; a rejection means
    /// the message itself is misconfigured.
    #[error("publisher rejected message: {0}")]
    PublishRejected(&'static str),

    /// Payload could not be marshaled into the output envelope.
    #[error("marshal failed for source {source_idx}: {reason}")]
    Marshal {
        /// Registration index of the source
        source_idx: u8,
        /// Why the payload would not marshal
        reason: &'static str,
    },

    /// A task thread could not be spawned at startup.
    #[error("failed to spawn {name}: {source}")]
    TaskSpawn {
        /// Task thread name
        name: &'static str,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },
}
