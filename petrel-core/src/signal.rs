//! Watermark Signaling for Cross-Task Coordination
//!
//! ## Overview
//!
//! The three pipeline tasks never share a lock in their core logic; they
//! coordinate through one process-wide set of sticky, level-triggered flags.
//! A [`SignalGroup`] is a bitset guarded by a mutex, with a condition
//! variable broadcast on every change. Waiters ask for a *conjunction* of
//! flags and block until all of them are simultaneously set.
//!
//! ## Why Level-Triggered AND-Wait?
//!
//! Edge-triggered signaling loses wakeups: if the producer raises a flag
//! before the consumer reaches its wait, the notification is gone. Here the
//! flags are state, not events - a task entering `wait_all` after the bits
//! were already raised proceeds immediately, and the bits stay up until the
//! single task that owns clearing them decides the condition has passed.
//! Every flag has exactly one setter role and one clearer role, which removes
//! write-write races by construction:
//!
//! ```text
//! LOW_WATER        set: sampler / spill     clear: read iterator
//! HIGH_WATER       set: sampler             clear: read iterator
//! HAS_SPILL_FILES  set: spill task / init   clear: read iterator
//! DONE_WRITING     set: spill task / init   clear: spill task
//! POLL_ENABLED     set: iterator / init     clear: spill task / stop()
//! UPLINK_*         set: transport bridge    clear: transport bridge
//! SHUTDOWN         set: stop()              clear: never
//! ```
//!
//! ## Shutdown
//!
//! [`Flag::Shutdown`] is terminal. Every `wait_all` observes it regardless of
//! the requested mask, so a stop request reaches tasks parked on conditions
//! that will never come true again (e.g. the spill task waiting for the
//! uplink to drop). Callers must treat [`Wait::Shutdown`] as "unwind now".

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One coordination flag
///
/// Values are bit positions in the shared set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Flag {
    /// Enough buffered data to be worth draining to the uplink
    LowWater = 1 << 0,
    /// Ring buffer nearly full; spill to disk if the uplink is absent
    HighWater = 1 << 1,
    /// At least one spill file exists on persistent storage
    HasSpillFiles = 1 << 2,
    /// No spill file is currently being appended (clear = writing in progress)
    DoneWriting = 1 << 3,
    /// Sampler may poll sources; cleared when storage is critically full
    PollEnabled = 1 << 4,
    /// Uplink transport has been started
    UplinkStarted = 1 << 5,
    /// Uplink transport currently holds a broker connection
    UplinkConnected = 1 << 6,
    /// Uplink transport currently has no broker connection
    UplinkDown = 1 << 7,
    /// Terminal stop request; observed by every wait
    Shutdown = 1 << 8,
}

impl Flag {
    const fn bit(self) -> u32 {
        self as u32
    }
}

/// A set of [`Flag`]s, used both as wait mask and snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagSet(u32);

impl FlagSet {
    /// Empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Set containing exactly `flag`
    pub const fn of(flag: Flag) -> Self {
        Self(flag.bit())
    }

    /// Union with another flag
    pub const fn with(self, flag: Flag) -> Self {
        Self(self.0 | flag.bit())
    }

    /// Does this set contain `flag`?
    pub const fn contains(self, flag: Flag) -> bool {
        self.0 & flag.bit() != 0
    }

    const fn contains_all(self, mask: FlagSet) -> bool {
        self.0 & mask.0 == mask.0
    }
}

impl From<Flag> for FlagSet {
    fn from(flag: Flag) -> Self {
        FlagSet::of(flag)
    }
}

/// Outcome of a [`SignalGroup::wait_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// All requested flags were simultaneously set
    Satisfied,
    /// The timeout elapsed first
    TimedOut,
    /// [`Flag::Shutdown`] was raised while waiting
    Shutdown,
}

/// Sticky level-triggered flag group shared by all pipeline tasks
///
/// Created once at subsystem init and injected into each task at spawn time;
/// lives for the lifetime of the whole telemetry subsystem.
pub struct SignalGroup {
    bits: Mutex<u32>,
    changed: Condvar,
}

impl SignalGroup {
    /// New group with all flags clear
    pub fn new() -> Self {
        Self {
            bits: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    /// Raise flags; waiters whose condition is now met wake up
    pub fn set(&self, flags: impl Into<FlagSet>) {
        let mask: FlagSet = flags.into();
        let mut bits = self.bits.lock().unwrap_or_else(|e| e.into_inner());
        *bits |= mask.0;
        self.changed.notify_all();
    }

    /// Clear flags
    pub fn clear(&self, flags: impl Into<FlagSet>) {
        let mask: FlagSet = flags.into();
        let mut bits = self.bits.lock().unwrap_or_else(|e| e.into_inner());
        *bits &= !mask.0;
        self.changed.notify_all();
    }

    /// Snapshot the current flag state
    pub fn get(&self) -> FlagSet {
        FlagSet(*self.bits.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Is `flag` currently set?
    pub fn is_set(&self, flag: Flag) -> bool {
        self.get().contains(flag)
    }

    /// Block until every flag in `mask` is simultaneously set
    ///
    /// Level-triggered: returns immediately if the condition already holds.
    /// Flags are never cleared on return. `timeout` of `None` waits forever
    /// (or until shutdown).
    pub fn wait_all(&self, mask: impl Into<FlagSet>, timeout: Option<Duration>) -> Wait {
        let mask: FlagSet = mask.into();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut bits = self.bits.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            let snapshot = FlagSet(*bits);
            if snapshot.contains_all(mask) {
                return Wait::Satisfied;
            }
            if snapshot.contains(Flag::Shutdown) {
                return Wait::Shutdown;
            }

            match deadline {
                None => {
                    bits = self.changed.wait(bits).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wait::TimedOut;
                    }
                    let (guard, _) = self
                        .changed
                        .wait_timeout(bits, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    bits = guard;
                }
            }
        }
    }

    /// Sleep that a stop request can interrupt
    ///
    /// Implemented as a wait on [`Flag::Shutdown`] with `period` as the
    /// timeout: the normal outcome is [`Wait::TimedOut`].
    pub fn sleep_interruptible(&self, period: Duration) -> Wait {
        match self.wait_all(Flag::Shutdown, Some(period)) {
            Wait::Satisfied | Wait::Shutdown => Wait::Shutdown,
            Wait::TimedOut => Wait::TimedOut,
        }
    }
}

impl Default for SignalGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn set_before_wait_proceeds_immediately() {
        // Level-triggered: no lost wakeup when the flag beat the waiter
        let group = SignalGroup::new();
        group.set(Flag::LowWater);
        assert_eq!(
            group.wait_all(Flag::LowWater, Some(Duration::from_millis(1))),
            Wait::Satisfied
        );
    }

    #[test]
    fn wait_requires_all_flags_simultaneously() {
        let group = SignalGroup::new();
        group.set(Flag::UplinkStarted);
        let mask = FlagSet::of(Flag::UplinkStarted).with(Flag::UplinkConnected);
        assert_eq!(
            group.wait_all(mask, Some(Duration::from_millis(5))),
            Wait::TimedOut
        );

        group.set(Flag::UplinkConnected);
        assert_eq!(group.wait_all(mask, None), Wait::Satisfied);
    }

    #[test]
    fn flags_are_sticky_across_waits() {
        let group = SignalGroup::new();
        group.set(Flag::HighWater);
        assert_eq!(group.wait_all(Flag::HighWater, None), Wait::Satisfied);
        // A second waiter still sees the flag
        assert_eq!(group.wait_all(Flag::HighWater, None), Wait::Satisfied);
        assert!(group.is_set(Flag::HighWater));
    }

    #[test]
    fn cross_thread_wakeup() {
        let group = Arc::new(SignalGroup::new());
        let waiter = {
            let group = Arc::clone(&group);
            thread::spawn(move || group.wait_all(Flag::DoneWriting, Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        group.set(Flag::DoneWriting);
        assert_eq!(waiter.join().unwrap(), Wait::Satisfied);
    }

    #[test]
    fn shutdown_interrupts_unrelated_wait() {
        let group = Arc::new(SignalGroup::new());
        let waiter = {
            let group = Arc::clone(&group);
            thread::spawn(move || {
                let mask = FlagSet::of(Flag::UplinkDown).with(Flag::HighWater);
                group.wait_all(mask, Some(Duration::from_secs(5)))
            })
        };
        thread::sleep(Duration::from_millis(20));
        group.set(Flag::Shutdown);
        assert_eq!(waiter.join().unwrap(), Wait::Shutdown);
    }

    #[test]
    fn interruptible_sleep_times_out_normally() {
        let group = SignalGroup::new();
        assert_eq!(
            group.sleep_interruptible(Duration::from_millis(5)),
            Wait::TimedOut
        );
        group.set(Flag::Shutdown);
        assert_eq!(
            group.sleep_interruptible(Duration::from_secs(5)),
            Wait::Shutdown
        );
    }
}
