//! Byte-Budgeted FIFO Ring for Framed Readings
//!
//! ## Overview
//!
//! The ring buffer store is the single hand-off point between the sampler
//! (sole writer) and the read iterators driven by the spill and drain tasks.
//! It holds variable-length framed readings in strict commit order against a
//! fixed byte capacity, and it is the only component in the core with its
//! own lock - everything else coordinates through the watermark flags.
//!
//! ## Reserve / Commit
//!
//! Writes are two-phase, mirroring an acquire/complete ring API:
//!
//! ```text
//! reserve(len) ──ok──▶ Reservation ──commit(frame)──▶ enqueued
//!      │                    │
//!      │ Full               │ drop without commit
//!      ▼                    ▼
//!  caller backs off    bytes returned to the ring
//! ```
//!
//! `reserve` accounts the bytes immediately, so a slow writer can fill its
//! frame without racing the occupancy checks. Requesting more bytes than the
//! whole ring can ever hold is a programming or configuration error and fails
//! loudly rather than blocking forever.
//!
//! ## Claim / Release
//!
//! Reads are destructive only on release. `claim_oldest` hands out the next
//! unclaimed frame and advances a cursor *inside the ring*, so a frame is
//! claimed at most once even if two consumers race across an uplink
//! transition; its bytes stay accounted until `release_oldest` frees the
//! front slot. Consumers release only after their sink (spill file or
//! publisher) has accepted the data, which is what lets a failed publish
//! retry the same readings instead of losing them.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::frame::FramedReading;

/// Reservation failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Not enough free bytes right now; back off and retry
    #[error("ring full: {requested} bytes requested, {free} free")]
    Full {
        /// Bytes asked for
        requested: usize,
        /// Bytes currently free
        free: usize,
    },

    /// The request can never succeed - larger than the whole ring
    #[error("reservation of {requested} bytes exceeds ring capacity {capacity}")]
    Oversized {
        /// Bytes asked for
        requested: usize,
        /// Total capacity
        capacity: usize,
    },
}

struct RingInner {
    items: VecDeque<FramedReading>,
    /// Bytes held by committed frames
    used: usize,
    /// Bytes held by outstanding reservations
    reserved: usize,
    /// Leading frames handed out via claim but not yet released
    claimed: usize,
}

/// Fixed-capacity FIFO of framed readings, accounted in encoded bytes
pub struct ReadingRing {
    capacity: usize,
    inner: Mutex<RingInner>,
    readable: Condvar,
}

impl ReadingRing {
    /// New ring holding at most `capacity` encoded bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(RingInner {
                items: VecDeque::new(),
                used: 0,
                reserved: 0,
                claimed: 0,
            }),
            readable: Condvar::new(),
        }
    }

    /// Total byte capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes available for new reservations
    pub fn free_bytes(&self) -> usize {
        let inner = self.lock();
        self.capacity - inner.used - inner.reserved
    }

    /// Number of committed, unreleased frames
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True when no committed frames remain
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Acquire `len` bytes for a frame about to be committed
    pub fn reserve(&self, len: usize) -> Result<Reservation<'_>, RingError> {
        if len > self.capacity {
            return Err(RingError::Oversized {
                requested: len,
                capacity: self.capacity,
            });
        }

        let mut inner = self.lock();
        let free = self.capacity - inner.used - inner.reserved;
        if len > free {
            return Err(RingError::Full {
                requested: len,
                free,
            });
        }

        inner.reserved += len;
        Ok(Reservation {
            ring: self,
            len,
            armed: true,
        })
    }

    /// Claim the oldest unclaimed frame without blocking
    ///
    /// The frame keeps its bytes and its slot until [`ReadingRing::release_oldest`];
    /// it will not be handed out again. Returns `None` when every committed
    /// frame is already claimed (or the ring is empty).
    pub fn try_claim_oldest(&self) -> Option<FramedReading> {
        let mut inner = self.lock();
        let frame = inner.items.get(inner.claimed)?.clone();
        inner.claimed += 1;
        Some(frame)
    }

    /// Claim the oldest unclaimed frame, blocking up to `timeout` for one
    pub fn claim_oldest(&self, timeout: Duration) -> Option<FramedReading> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(frame) = inner.items.get(inner.claimed) {
                let frame = frame.clone();
                inner.claimed += 1;
                return Some(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .readable
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
    }

    /// Copy the frame at logical position `n` without claiming it
    ///
    /// `peek_nth(0)` is the oldest frame, claimed or not. Diagnostics and
    /// tests only; consumers go through claim/release.
    pub fn peek_nth(&self, n: usize) -> Option<FramedReading> {
        self.lock().items.get(n).cloned()
    }

    /// Free the oldest claimed frame's slot, returning the bytes it held
    ///
    /// Frames are released in claim order. Releasing with no outstanding
    /// claim is a no-op returning `None`.
    pub fn release_oldest(&self) -> Option<usize> {
        let mut inner = self.lock();
        if inner.claimed == 0 {
            return None;
        }
        let frame = inner.items.pop_front()?;
        inner.claimed -= 1;
        let size = frame.stored_size();
        inner.used -= size;
        Some(size)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RingInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit_frame(&self, len: usize, frame: FramedReading) {
        let mut inner = self.lock();
        debug_assert_eq!(frame.stored_size(), len, "commit size != reserved size");
        inner.reserved -= len;
        inner.used += frame.stored_size();
        inner.items.push_back(frame);
        self.readable.notify_all();
    }

    fn cancel_reservation(&self, len: usize) {
        let mut inner = self.lock();
        inner.reserved -= len;
    }
}

/// Bytes acquired from the ring, waiting to be filled and committed
///
/// Dropping a reservation without committing returns the bytes.
#[must_use = "a reservation holds ring bytes until committed or dropped"]
pub struct Reservation<'a> {
    ring: &'a ReadingRing,
    len: usize,
    armed: bool,
}

impl Reservation<'_> {
    /// Bytes this reservation holds
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for the degenerate zero-byte reservation
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Enqueue the frame, consuming the reservation
    pub fn commit(mut self, frame: FramedReading) {
        self.armed = false;
        self.ring.commit_frame(self.len, frame);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.ring.cancel_reservation(self.len);
        }
    }
}
