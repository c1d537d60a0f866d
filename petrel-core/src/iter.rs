//! Unified Read Iterator Over Spill Files and the Ring Buffer
//!
//! ## Overview
//!
//! Both consumers of buffered data - the spill task writing to disk and the
//! drain task publishing to the uplink - need the same thing: "give me the
//! next framed reading, oldest first". This module is the one draining
//! algorithm they share, a state machine that walks spill files to
//! exhaustion before touching the ring so that data always leaves the node
//! in sampling order.
//!
//! ```text
//!            ┌──────┐ files requested         ┌───────────────┐
//!            │ Init │────and present─────────▶│ FilesNoneOpen │◀─┐
//!            └──────┘                         └───────┬───────┘  │
//!                │                              none  │ oldest   │ EOF:
//!                │ otherwise                    left  │ opened   │ close,
//!                ▼                                    ▼          │ delete
//!          ┌──────────┐◀──── clear has-files ──┌──────────────┐  │
//!          │ RingOnly │                        │ FilesOneOpen │──┘
//!          └──────────┘                        └──────────────┘
//!            empty: reset to Init, re-enable polling
//! ```
//!
//! ## Acknowledgement
//!
//! Each call yields at most one reading. Ring readings are *claimed*, not
//! consumed: the ring hands each frame out exactly once, but the caller
//! acknowledges it only after its sink (the spill file or the publisher)
//! has accepted it, at which point the slot is released and the watermark
//! clears are re-evaluated. Readings from spill files need no
//! acknowledgement - the file itself is deleted only once every record in
//! it has been read out.
//!
//! The iterator is the sole clearer of `HIGH_WATER` (free space recovered
//! past the threshold), `LOW_WATER` (ring fully drained), and
//! `HAS_SPILL_FILES` (no files left), and the sole re-setter of
//! `POLL_ENABLED` after a disk-full pause - the "drained confirmation" the
//! spill task blocks on.
//!
//! ## Corruption
//!
//! A frame in a spill file whose declared length fails the sanity check
//! cannot be skipped (the stream offset is unrecoverable), so it aborts the
//! drain rather than risk an unbounded read. Same for a file that was just
//! listed but will not open.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};

use crate::errors::TelemetryResult;
use crate::frame::FramedReading;
use crate::ring::ReadingRing;
use crate::signal::{Flag, SignalGroup, Wait};
use crate::store::SpillStore;

/// Which sources a caller wants drained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Ring buffer only - used by the spill task (files never feed files)
    RingOnly,
    /// Spill files to exhaustion, then the ring - used by the drain task
    FilesThenRing,
}

/// Where an unacknowledged reading came from
enum Origin {
    Ring,
    File,
}

enum IterState {
    Init,
    FilesNoneOpen,
    FilesOneOpen {
        reader: BufReader<File>,
        path: PathBuf,
    },
    RingOnly,
}

/// Watermark thresholds the iterator re-evaluates on release
pub struct ClearThresholds {
    /// Clear `HIGH_WATER` once free bytes recover to at least this
    pub high_water_free: usize,
}

/// The shared draining state machine
///
/// Long-lived: each consuming task owns one and drives it across wakeups.
/// The flag protocol keeps the two consumers out of each other's way; the
/// ring's claim cursor guarantees no frame is handed out twice even across
/// an uplink transition.
pub struct ReadIter {
    ring: Arc<ReadingRing>,
    store: Arc<SpillStore>,
    signals: Arc<SignalGroup>,
    thresholds: ClearThresholds,
    state: IterState,
    /// Yield order of not-yet-acknowledged readings
    unacked: VecDeque<Origin>,
}

impl ReadIter {
    /// New iterator in the initial routing state
    pub fn new(
        ring: Arc<ReadingRing>,
        store: Arc<SpillStore>,
        signals: Arc<SignalGroup>,
        thresholds: ClearThresholds,
    ) -> Self {
        Self {
            ring,
            store,
            signals,
            thresholds,
            state: IterState::Init,
            unacked: VecDeque::new(),
        }
    }

    /// Count of yielded readings awaiting acknowledgement
    pub fn unacked(&self) -> usize {
        self.unacked.len()
    }

    /// Yield the next oldest reading, or `None` when drained (or shutting down)
    ///
    /// Callers loop over this to fill a batch, acknowledging consumed
    /// readings via [`ReadIter::ack_one`] / [`ReadIter::ack_all`].
    pub fn next_reading(&mut self, mode: DrainMode) -> TelemetryResult<Option<FramedReading>> {
        loop {
            // Take ownership of the state; every arm produces the next one
            match std::mem::replace(&mut self.state, IterState::Init) {
                IterState::Init => {
                    self.state = if mode == DrainMode::FilesThenRing
                        && self.signals.is_set(Flag::HasSpillFiles)
                    {
                        IterState::FilesNoneOpen
                    } else {
                        IterState::RingOnly
                    };
                }

                IterState::FilesNoneOpen => match self.store.oldest_file()? {
                    Some(path) => {
                        let file = self.store.open_for_read(&path)?;
                        info!("draining spill file: {}", path.display());
                        self.state = IterState::FilesOneOpen {
                            reader: BufReader::new(file),
                            path,
                        };
                    }
                    None => {
                        self.signals.clear(Flag::HasSpillFiles);
                        self.state = IterState::RingOnly;
                    }
                },

                IterState::FilesOneOpen { mut reader, path } => {
                    // Never read a file the spill task is still appending
                    if self.signals.wait_all(Flag::DoneWriting, None) == Wait::Shutdown {
                        self.state = IterState::FilesOneOpen { reader, path };
                        return Ok(None);
                    }
                    let origin = path.display().to_string();
                    match FramedReading::decode_from(&mut reader, &origin)? {
                        Some(frame) => {
                            self.state = IterState::FilesOneOpen { reader, path };
                            self.unacked.push_back(Origin::File);
                            return Ok(Some(frame));
                        }
                        None => {
                            drop(reader);
                            self.store.remove(&path)?;
                            self.store.log_free_space();
                            self.state = IterState::FilesNoneOpen;
                        }
                    }
                }

                IterState::RingOnly => {
                    match self.ring.try_claim_oldest() {
                        Some(frame) => {
                            self.state = IterState::RingOnly;
                            self.unacked.push_back(Origin::Ring);
                            return Ok(Some(frame));
                        }
                        None => {
                            // State already reset to Init by the take above
                            if self.unacked.is_empty() {
                                self.drained_clears();
                            }
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    /// Acknowledge the oldest yielded reading
    ///
    /// For a ring reading this releases its slot and re-evaluates the
    /// watermark clears; for a file reading it is bookkeeping only.
    pub fn ack_one(&mut self) {
        match self.unacked.pop_front() {
            Some(Origin::Ring) => {
                self.ring.release_oldest();
                self.release_clears();
            }
            Some(Origin::File) | None => {}
        }
    }

    /// Acknowledge every yielded reading, oldest first
    pub fn ack_all(&mut self) {
        while !self.unacked.is_empty() {
            self.ack_one();
        }
    }

    /// Clears evaluated after a slot release
    fn release_clears(&self) {
        let free = self.ring.free_bytes();
        if free >= self.thresholds.high_water_free {
            self.signals.clear(Flag::HighWater);
            debug!(
                "high-water clear: {} >= {}",
                free, self.thresholds.high_water_free
            );
        }
        if self.ring.is_empty() {
            self.drained_clears();
        }
    }

    /// The ring is confirmed empty: drop the pressure flags and let the
    /// sampler run again. In the normal case the spill files were drained
    /// first, so storage is empty too.
    fn drained_clears(&self) {
        if self.ring.free_bytes() >= self.thresholds.high_water_free {
            self.signals.clear(Flag::HighWater);
        }
        self.signals.clear(Flag::LowWater);
        info!("ring buffer drained; sensor polling re-enabled");
        self.signals.set(Flag::PollEnabled);
    }
}
