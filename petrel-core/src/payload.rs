//! Scalar Payload Codec and Marshaling Schema
//!
//! Most environmental sources boil down to "a timestamp and a few floats":
//! temperature plus relative humidity, UV index plus ambient lux. This module
//! gives those sources a shared payload layout and the JSON shape the broker
//! side expects, so an individual source only supplies its name and channel
//! units.
//!
//! ## Payload Layout
//!
//! ```text
//! ┌──────────────────┬─────────────┬─────────────┬───
//! │ i64-le unix secs │ f32-le ch 0 │ f32-le ch 1 │ ...
//! └──────────────────┴─────────────┴─────────────┴───
//! ```
//!
//! ## Marshaled Shape
//!
//! One JSON object per channel, timestamp repeated as ISO-8601 UTC:
//!
//! ```json
//! {"timestamp": "2026-08-06T11:42:07Z", "value": 21.4, "unit": "C", "sensor": "sht4x"}
//! ```

use chrono::{TimeZone, Utc};
use heapless::Vec as BoundedVec;
use serde_json::{json, Value};

use crate::frame::Payload;
use crate::source::{ReadingSource, SourceError};

/// Most channels one scalar source may carry
pub const MAX_CHANNELS: usize = 8;

const TIMESTAMP_BYTES: usize = 8;
const CHANNEL_BYTES: usize = 4;

/// A timestamped set of scalar channel values
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarReading {
    /// Measurement time, unix seconds UTC
    pub timestamp: i64,
    /// One value per channel, in registration order
    pub values: BoundedVec<f32, MAX_CHANNELS>,
}

impl ScalarReading {
    /// Reading taken now
    pub fn now(values: &[f32]) -> Result<Self, SourceError> {
        Self::at(Utc::now().timestamp(), values)
    }

    /// Reading with an explicit timestamp
    pub fn at(timestamp: i64, values: &[f32]) -> Result<Self, SourceError> {
        let values = BoundedVec::from_slice(values)
            .map_err(|_| SourceError::Measurement("too many channels"))?;
        Ok(Self { timestamp, values })
    }

    /// Encode to frame payload bytes
    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        // Cannot overflow: 8 + 8 * 4 bytes is far under the payload ceiling
        let _ = payload.extend_from_slice(&self.timestamp.to_le_bytes());
        for value in &self.values {
            let _ = payload.extend_from_slice(&value.to_le_bytes());
        }
        payload
    }

    /// Decode from frame payload bytes
    pub fn decode(payload: &[u8]) -> Result<Self, SourceError> {
        if payload.len() < TIMESTAMP_BYTES
            || (payload.len() - TIMESTAMP_BYTES) % CHANNEL_BYTES != 0
        {
            return Err(SourceError::Payload("bad scalar payload length"));
        }
        let channels = (payload.len() - TIMESTAMP_BYTES) / CHANNEL_BYTES;
        if channels > MAX_CHANNELS {
            return Err(SourceError::Payload("too many channels"));
        }

        let timestamp = i64::from_le_bytes(
            payload[..TIMESTAMP_BYTES]
                .try_into()
                .unwrap_or_else(|_| unreachable!("length checked above")),
        );
        let mut values = BoundedVec::new();
        for chunk in payload[TIMESTAMP_BYTES..].chunks_exact(CHANNEL_BYTES) {
            let bytes: [u8; CHANNEL_BYTES] = chunk
                .try_into()
                .unwrap_or_else(|_| unreachable!("chunks_exact yields full chunks"));
            let _ = values.push(f32::from_le_bytes(bytes));
        }
        Ok(Self { timestamp, values })
    }

    /// Append one envelope object per channel
    pub fn marshal_into(
        &self,
        sensor: &str,
        units: &[&str],
        out: &mut Vec<Value>,
    ) -> Result<(), SourceError> {
        if units.len() != self.values.len() {
            return Err(SourceError::Payload("channel count mismatch"));
        }
        let iso8601 = iso8601_utc(self.timestamp);
        for (value, unit) in self.values.iter().zip(units) {
            out.push(json!({
                "timestamp": iso8601,
                "value": value,
                "unit": unit,
                "sensor": sensor,
            }));
        }
        Ok(())
    }
}

/// Format unix seconds as `YYYY-MM-DDTHH:MM:SSZ`
pub fn iso8601_utc(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        // Out-of-range timestamps come from unset RTCs; keep the raw value visible
        None => format!("unix:{timestamp}"),
    }
}

/// Scalar source returning a fixed set of values
///
/// Stands in for a real driver in examples and tests; the production
/// temperature/humidity and light managers implement [`ReadingSource`] the
/// same way around their hardware reads.
pub struct FixedSource {
    name: &'static str,
    units: &'static [&'static str],
    values: Vec<f32>,
}

impl FixedSource {
    /// Source reporting `values` (one per unit) on every cycle
    pub fn new(name: &'static str, units: &'static [&'static str], values: &[f32]) -> Self {
        debug_assert_eq!(units.len(), values.len());
        Self {
            name,
            units,
            values: values.to_vec(),
        }
    }

    /// Replace the reported values
    pub fn set_values(&mut self, values: &[f32]) {
        self.values = values.to_vec();
    }
}

impl ReadingSource for FixedSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn measure(&mut self) -> Result<Payload, SourceError> {
        Ok(ScalarReading::now(&self.values)?.encode())
    }

    fn marshal(&self, payload: &[u8], out: &mut Vec<Value>) -> Result<(), SourceError> {
        ScalarReading::decode(payload)?.marshal_into(self.name, self.units, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_roundtrip() {
        let reading = ScalarReading::at(1_750_000_000, &[21.5, 48.25]).unwrap();
        let decoded = ScalarReading::decode(&reading.encode()).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn empty_channel_set_roundtrips() {
        let reading = ScalarReading::at(0, &[]).unwrap();
        assert_eq!(ScalarReading::decode(&reading.encode()).unwrap(), reading);
    }

    #[test]
    fn bad_length_rejected() {
        assert_eq!(
            ScalarReading::decode(&[0u8; 3]),
            Err(SourceError::Payload("bad scalar payload length"))
        );
        // 8-byte timestamp plus a half channel
        assert_eq!(
            ScalarReading::decode(&[0u8; 10]),
            Err(SourceError::Payload("bad scalar payload length"))
        );
    }

    #[test]
    fn marshal_emits_one_object_per_channel() {
        let reading = ScalarReading::at(1_600_000_000, &[19.0, 55.0]).unwrap();
        let mut out = Vec::new();
        reading
            .marshal_into("sht4x", &["C", "%rH"], &mut out)
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["sensor"], "sht4x");
        assert_eq!(out[0]["unit"], "C");
        assert_eq!(out[0]["value"], 19.0);
        assert_eq!(out[1]["unit"], "%rH");
        assert_eq!(out[0]["timestamp"], "2020-09-13T12:26:40Z");
    }

    #[test]
    fn marshal_channel_mismatch_rejected() {
        let reading = ScalarReading::at(0, &[1.0]).unwrap();
        let mut out = Vec::new();
        assert!(reading.marshal_into("x", &["C", "F"], &mut out).is_err());
    }

    #[test]
    fn fixed_source_measures_and_marshals() {
        let mut source = FixedSource::new("uv", &["idx", "lux"], &[3.0, 1200.0]);
        let payload = source.measure().unwrap();
        let mut out = Vec::new();
        source.marshal(&payload, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["value"], 1200.0);
    }
}
