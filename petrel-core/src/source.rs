//! Reading Sources - the Measurement Producers
//!
//! A reading source wraps one physical (or simulated) sensor behind two
//! operations: `measure`, which produces an opaque payload, and `marshal`,
//! which turns a payload back into JSON objects for the output envelope. The
//! pipeline never interprets payload bytes itself; the frame's source index
//! routes each reading back to the source that produced it, even when the
//! reading spent time in a spill file in between.
//!
//! Sources register at startup into a [`SourceSet`] and are addressed by
//! their registration index from then on. The set is shared by the sampler
//! (measuring) and the drain task (marshaling); each source sits behind its
//! own short-lived lock so a slow `measure` never blocks marshaling of
//! another source's readings. A slow sensor read still blocks the whole
//! sampler cycle - a documented constraint of the current design.

use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;

use crate::frame::Payload;

/// Most registrations a [`SourceSet`] accepts
pub const MAX_SOURCES: usize = 4;

/// Failures raised by a reading source
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceError {
    /// The sensor failed to produce a reading this cycle
    ///
    /// Transient: the sampler logs it and skips the source for the cycle.
    #[error("measurement failed: {0}")]
    Measurement(&'static str),

    /// A payload handed back for marshaling was not one this source produced
    ///
    /// Corruption-tier: the drain task treats this as fatal.
    #[error("payload malformed: {0}")]
    Payload(&'static str),

    /// The registry is full
    #[error("source registry full ({MAX_SOURCES} max)")]
    RegistryFull,
}

/// One measurement producer
pub trait ReadingSource: Send {
    /// Short name for diagnostics and marshaled output
    fn name(&self) -> &'static str;

    /// Take one measurement, returning the framed payload bytes
    fn measure(&mut self) -> Result<Payload, SourceError>;

    /// Append the JSON representation of `payload` to the envelope data array
    fn marshal(&self, payload: &[u8], out: &mut Vec<Value>) -> Result<(), SourceError>;
}

/// Startup-time registry of reading sources, indexed by registration order
///
/// The registration index is the `source_idx` carried in every frame.
pub struct SourceSet {
    sources: Vec<Mutex<Box<dyn ReadingSource>>>,
}

impl SourceSet {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Register a source, returning its index
    pub fn register(&mut self, source: Box<dyn ReadingSource>) -> Result<u8, SourceError> {
        if self.sources.len() >= MAX_SOURCES {
            return Err(SourceError::RegistryFull);
        }
        self.sources.push(Mutex::new(source));
        Ok((self.sources.len() - 1) as u8)
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Run `measure` on the source at `idx`
    pub fn measure(&self, idx: u8) -> Option<Result<Payload, SourceError>> {
        let source = self.sources.get(idx as usize)?;
        let mut source = source.lock().unwrap_or_else(|e| e.into_inner());
        Some(source.measure())
    }

    /// Run `marshal` on the source at `idx`; `None` for an unknown index
    pub fn marshal(
        &self,
        idx: u8,
        payload: &[u8],
        out: &mut Vec<Value>,
    ) -> Option<Result<(), SourceError>> {
        let source = self.sources.get(idx as usize)?;
        let source = source.lock().unwrap_or_else(|e| e.into_inner());
        Some(source.marshal(payload, out))
    }

    /// Source name at `idx`, for log lines
    pub fn name(&self, idx: u8) -> Option<&'static str> {
        let source = self.sources.get(idx as usize)?;
        let source = source.lock().unwrap_or_else(|e| e.into_inner());
        Some(source.name())
    }
}

impl Default for SourceSet {
    fn default() -> Self {
        Self::new()
    }
}
