//! Common test utilities for pipeline integration tests
//!
//! Provides:
//! - Deterministic sequenced reading sources
//! - A recording publisher with scriptable failures
//! - Config and polling helpers for whole-system scenarios

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

use petrel_core::frame::Payload;
use petrel_core::publish::{PublishError, Publisher};
use petrel_core::{ReadingSource, SourceError, TelemetryConfig};

/// Source emitting readings tagged 0, 1, 2, ... up to a fixed count
///
/// Payload layout: `u32-le sequence` then zero padding out to `payload_len`,
/// so tests can pin exact frame sizes while keeping content checkable.
pub struct SeqSource {
    name: &'static str,
    payload_len: usize,
    max_readings: u32,
    next: u32,
}

impl SeqSource {
    pub fn new(name: &'static str, payload_len: usize, max_readings: u32) -> Self {
        assert!(payload_len >= 4);
        Self {
            name,
            payload_len,
            max_readings,
            next: 0,
        }
    }
}

impl ReadingSource for SeqSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn measure(&mut self) -> Result<Payload, SourceError> {
        if self.next >= self.max_readings {
            // Exhausted: behaves like a sensor gone quiet
            return Err(SourceError::Measurement("source exhausted"));
        }
        let mut bytes = vec![0u8; self.payload_len];
        bytes[..4].copy_from_slice(&self.next.to_le_bytes());
        self.next += 1;
        Payload::from_slice(&bytes).map_err(|_| SourceError::Measurement("payload too large"))
    }

    fn marshal(&self, payload: &[u8], out: &mut Vec<Value>) -> Result<(), SourceError> {
        let bytes: [u8; 4] = payload
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(SourceError::Payload("short seq payload"))?;
        out.push(serde_json::json!({
            "sensor": self.name,
            "seq": u32::from_le_bytes(bytes),
        }));
        Ok(())
    }
}

/// Publisher recording every accepted envelope, failing the first N tries
pub struct RecordingPublisher {
    envelopes: Mutex<Vec<Value>>,
    fail_remaining: AtomicUsize,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            envelopes: Mutex::new(Vec::new()),
            fail_remaining: AtomicUsize::new(failures),
        }
    }

    /// Accepted envelopes, oldest first
    pub fn envelopes(&self) -> Vec<Value> {
        self.envelopes.lock().unwrap().clone()
    }

    /// Per-envelope data-array sizes
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.envelopes()
            .iter()
            .map(|e| e["data"].as_array().map_or(0, Vec::len))
            .collect()
    }

    /// Every `seq` value published, in publish order
    pub fn published_seqs(&self) -> Vec<u32> {
        self.published_entries()
            .iter()
            .filter_map(|entry| entry["seq"].as_u64().map(|s| s as u32))
            .collect()
    }

    /// `seq` values published by one named sensor, in publish order
    pub fn published_seqs_for(&self, sensor: &str) -> Vec<u32> {
        self.published_entries()
            .iter()
            .filter(|entry| entry["sensor"] == sensor)
            .filter_map(|entry| entry["seq"].as_u64().map(|s| s as u32))
            .collect()
    }

    /// Flattened data-array entries across all envelopes, in publish order
    pub fn published_entries(&self) -> Vec<Value> {
        self.envelopes()
            .iter()
            .flat_map(|e| e["data"].as_array().cloned().unwrap_or_default())
            .collect()
    }
}

impl Publisher for RecordingPublisher {
    fn enqueue(&self, _topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PublishError::NotConnected);
        }
        let value =
            serde_json::from_slice(payload).map_err(|_| PublishError::Rejected("not json"))?;
        self.envelopes.lock().unwrap().push(value);
        Ok(())
    }
}

/// Fast-cycling config rooted in a test directory
pub fn fast_config(spill_root: &Path, ring_capacity: usize) -> TelemetryConfig {
    let mut config = TelemetryConfig::for_capacity(ring_capacity);
    config.spill_root = spill_root.to_path_buf();
    config.sample_period = Duration::from_millis(2);
    config.retry_cooldown = Duration::from_millis(10);
    config.stop_flush_timeout = Duration::from_secs(2);
    config
}

/// Poll `predicate` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
