//! Sampler Task - Poll Sources While Able to Buffer Safely
//!
//! Each cycle: gate on `POLL_ENABLED`, sweep the registered sources, frame
//! and commit every successful measurement, then recompute the pressure
//! watermarks from ring occupancy. A full ring is the critical backpressure
//! case - the sampler stalls (waiting for the uplink to return and a
//! cooldown to pass) rather than drop a reading. A failed measurement only
//! costs that source its slot in the current cycle.

use log::{debug, error, info, warn};

use crate::diag::Diagnostics;
use crate::errors::{TelemetryError, TelemetryResult};
use crate::frame::FramedReading;
use crate::ring::RingError;
use crate::signal::{Flag, FlagSet, Wait};

use super::TaskContext;

/// Task entry point; returns on cooperative shutdown
pub fn run(ctx: &TaskContext, diag: &Diagnostics) -> TelemetryResult<()> {
    info!("sampler task starting");
    let mut cycle: u32 = 0;

    loop {
        if ctx.signals.wait_all(Flag::PollEnabled, None) == Wait::Shutdown {
            return Ok(());
        }
        debug!("polling {} sources", ctx.sources.len());

        for idx in 0..ctx.sources.len() as u8 {
            let measured = match ctx.sources.measure(idx) {
                Some(result) => result,
                None => return Err(TelemetryError::UnknownSource(idx)),
            };
            match measured {
                Ok(payload) => {
                    let frame = FramedReading::new(idx, payload);
                    if !store_with_backpressure(ctx, frame)? {
                        return Ok(()); // shutdown while stalled
                    }
                }
                Err(e) => {
                    warn!(
                        "measure failed for {}: {e}; skipping this cycle",
                        ctx.sources.name(idx).unwrap_or("?")
                    );
                }
            }
        }

        raise_watermarks(ctx);

        if ctx.signals.sleep_interruptible(ctx.config.sample_period) == Wait::Shutdown {
            return Ok(());
        }

        cycle += 1;
        if cycle > ctx.config.stats_interval_cycles {
            diag.log_stats();
            cycle = 0;
        }
    }
}

/// Commit one frame, stalling through ring-full conditions
///
/// Returns `Ok(false)` if shutdown interrupted the stall.
fn store_with_backpressure(ctx: &TaskContext, frame: FramedReading) -> TelemetryResult<bool> {
    let size = frame.stored_size();
    loop {
        match ctx.ring.reserve(size) {
            Ok(reservation) => {
                reservation.commit(frame);
                return Ok(true);
            }
            Err(RingError::Full { .. }) => {
                // Ring full, likely storage full and the uplink offline too.
                // Nothing drains until the uplink returns, and the filesystem
                // takes a while after that, so add a cooldown between tries.
                error!("no room in ring buffer for measurement; stalling sampler");
                let resume = FlagSet::of(Flag::UplinkConnected).with(Flag::PollEnabled);
                if ctx.signals.wait_all(resume, None) == Wait::Shutdown {
                    return Ok(false);
                }
                if ctx.signals.sleep_interruptible(ctx.config.retry_cooldown) == Wait::Shutdown {
                    return Ok(false);
                }
            }
            Err(RingError::Oversized {
                requested,
                capacity,
            }) => {
                return Err(TelemetryError::OversizedReservation {
                    requested,
                    capacity,
                })
            }
        }
    }
}

/// Set (never clear) the pressure flags from current occupancy
fn raise_watermarks(ctx: &TaskContext) {
    let config = &ctx.config;
    let free = ctx.ring.free_bytes();
    let count = ctx.ring.len();

    if free < config.low_water_free
        || (config.low_water_items != 0 && count > config.low_water_items)
    {
        ctx.signals.set(Flag::LowWater);
        info!(
            "low-water set: {free} free < {} | {count} items > {}",
            config.low_water_free, config.low_water_items
        );
    }
    if free < config.high_water_free {
        ctx.signals.set(Flag::HighWater);
        info!("high-water set: {free} free < {}", config.high_water_free);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::frame::Payload;
    use crate::ring::ReadingRing;
    use crate::signal::SignalGroup;
    use crate::source::{ReadingSource, SourceError, SourceSet};
    use crate::store::SpillStore;
    use std::sync::Arc;
    use std::time::Duration;

    struct ByteSource {
        payload_len: usize,
        fail: bool,
    }

    impl ReadingSource for ByteSource {
        fn name(&self) -> &'static str {
            "bytes"
        }

        fn measure(&mut self) -> Result<Payload, SourceError> {
            if self.fail {
                return Err(SourceError::Measurement("sensor offline"));
            }
            Payload::from_slice(&vec![7u8; self.payload_len])
                .map_err(|_| SourceError::Measurement("too large"))
        }

        fn marshal(
            &self,
            _payload: &[u8],
            _out: &mut Vec<serde_json::Value>,
        ) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn context(ring_capacity: usize, sources: SourceSet) -> (TaskContext, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = TelemetryConfig::for_capacity(ring_capacity);
        config.sample_period = Duration::from_millis(1);
        config.stats_interval_cycles = u32::MAX;
        let ctx = TaskContext {
            ring: Arc::new(ReadingRing::new(ring_capacity)),
            store: Arc::new(SpillStore::open(tmp.path().join("spill"), 1 << 20).unwrap()),
            signals: Arc::new(SignalGroup::new()),
            sources: Arc::new(sources),
            config: Arc::new(config),
        };
        (ctx, tmp)
    }

    fn run_cycles(ctx: &TaskContext, cycles: usize) {
        // Drive the task on a thread, then stop it cooperatively
        let diag = Diagnostics::new(
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.signals),
            ctx.config.disk_floor_kib,
        );
        let task_ctx = ctx.clone();
        let handle = std::thread::spawn(move || run(&task_ctx, &diag));
        std::thread::sleep(Duration::from_millis(cycles as u64 * 5));
        ctx.signals.set(Flag::Shutdown);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn samples_into_ring_when_polling_enabled() {
        let mut sources = SourceSet::new();
        sources
            .register(Box::new(ByteSource {
                payload_len: 16,
                fail: false,
            }))
            .unwrap();
        let (ctx, _tmp) = context(4096, sources);
        ctx.signals.set(Flag::PollEnabled);

        run_cycles(&ctx, 3);
        assert!(ctx.ring.len() >= 1);
        let frame = ctx.ring.peek_nth(0).unwrap();
        assert_eq!(frame.source_idx, 0);
        assert_eq!(frame.payload.len(), 16);
    }

    #[test]
    fn polling_disabled_produces_nothing() {
        let mut sources = SourceSet::new();
        sources
            .register(Box::new(ByteSource {
                payload_len: 16,
                fail: false,
            }))
            .unwrap();
        let (ctx, _tmp) = context(4096, sources);
        // POLL_ENABLED never set

        run_cycles(&ctx, 3);
        assert!(ctx.ring.is_empty());
    }

    #[test]
    fn failed_source_skipped_others_still_sampled() {
        let mut sources = SourceSet::new();
        sources
            .register(Box::new(ByteSource {
                payload_len: 8,
                fail: true,
            }))
            .unwrap();
        sources
            .register(Box::new(ByteSource {
                payload_len: 8,
                fail: false,
            }))
            .unwrap();
        let (ctx, _tmp) = context(4096, sources);
        ctx.signals.set(Flag::PollEnabled);

        run_cycles(&ctx, 3);
        assert!(!ctx.ring.is_empty());
        // Every committed frame came from the healthy source
        for n in 0..ctx.ring.len() {
            assert_eq!(ctx.ring.peek_nth(n).unwrap().source_idx, 1);
        }
    }

    #[test]
    fn watermarks_raised_under_pressure() {
        let mut sources = SourceSet::new();
        sources
            .register(Box::new(ByteSource {
                payload_len: 59, // 64 encoded bytes
                fail: false,
            }))
            .unwrap();
        let (ctx, _tmp) = context(256, sources);
        ctx.signals.set(Flag::PollEnabled);
        ctx.signals.set(Flag::UplinkConnected); // unblock any full-ring stall

        run_cycles(&ctx, 8);
        // 256-byte ring fills within four commits: both watermarks must be up
        assert!(ctx.signals.is_set(Flag::LowWater));
        assert!(ctx.signals.is_set(Flag::HighWater));
    }

    #[test]
    fn full_ring_stalls_instead_of_dropping() {
        let mut sources = SourceSet::new();
        sources
            .register(Box::new(ByteSource {
                payload_len: 95, // 100 encoded bytes
                fail: false,
            }))
            .unwrap();
        let (ctx, _tmp) = context(200, sources);
        ctx.signals.set(Flag::PollEnabled);
        // Uplink absent: the stall has nothing to wait for but shutdown

        run_cycles(&ctx, 5);
        // Exactly two frames fit; the third reservation stalled, no drops
        assert_eq!(ctx.ring.len(), 2);
        assert_eq!(ctx.ring.free_bytes(), 0);
    }
}
