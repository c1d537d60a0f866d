//! Uplink Connectors for Petrel Sensor Nodes
//!
//! ## Overview
//!
//! The telemetry core publishes through the [`petrel_core::Publisher`] seam
//! and learns about connectivity through the uplink watermark flags; this
//! crate supplies both ends for concrete transports. MQTT is the primary
//! (and default) uplink for Petrel deployments: persistent connections suit
//! always-on broker topologies, QoS 1 matches the pipeline's at-least-once
//! contract, and topic hierarchies keep multi-node fleets separable.
//!
//! ## Division of Labor
//!
//! Two halves per transport:
//!
//! 1. **Publisher** - accepts serialized envelopes from the drain task and
//!    hands them to the protocol client. Acceptance means the transport owns
//!    delivery; the drain task retries anything not accepted.
//! 2. **Bridge** - runs the protocol event loop on its own thread and maps
//!    connection state onto the shared [`SignalGroup`](petrel_core::SignalGroup):
//!    `UPLINK_STARTED` once the loop is live, `UPLINK_CONNECTED` /
//!    `UPLINK_DOWN` tracking the broker session. The core tasks never see a
//!    socket; they see flags.
//!
//! ## Example
//!
//! ```rust,no_run
//! use petrel_connectors::mqtt::{MqttConfig, MqttUplink};
//! # use std::sync::Arc;
//! # use petrel_core::SignalGroup;
//!
//! let signals = Arc::new(SignalGroup::new());
//! let config = MqttConfig::new("broker.local", 1883, "petrel-node-01");
//! let uplink = MqttUplink::start(config, Arc::clone(&signals))?;
//!
//! // uplink.publisher() goes to TelemetrySystem::init; the bridge thread
//! // keeps the uplink flags current from here on
//! # Ok::<(), petrel_connectors::ConnectorError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttPublisher, MqttUplink};

use thiserror::Error;

/// Connector setup failures
///
/// Runtime publish failures travel as [`petrel_core::publish::PublishError`];
/// this type covers construction and teardown.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Configuration rejected before any connection attempt
    #[error("configuration error: {0}")]
    Config(&'static str),

    /// The bridge thread could not be spawned
    #[error("failed to spawn bridge thread: {0}")]
    Spawn(#[from] std::io::Error),
}
