//! Subsystem Assembly and Lifecycle
//!
//! [`TelemetrySystem`] wires the pieces together: it owns the ring, the
//! spill store, the flag group, the source registry, and the three task
//! threads. Explicit context objects go into each task at spawn time -
//! there is no global state anywhere in the pipeline, so two systems can
//! coexist in one process (the integration tests lean on this).
//!
//! ## Startup
//!
//! `init` raises `POLL_ENABLED` and `DONE_WRITING`, marks the uplink down
//! until a transport bridge says otherwise, and scans the spill root:
//! files left over from a previous run raise `HAS_SPILL_FILES`, so the
//! first drain picks them up before anything sampled this boot. Polling
//! starts immediately; pending files wait for low water like any other
//! buffered data.
//!
//! ## Shutdown
//!
//! `stop` is cooperative: clear `POLL_ENABLED`, give an in-flight spill
//! file a bounded window to close (`DONE_WRITING`), then raise `SHUTDOWN`
//! and join the task threads. No task is ever killed mid-write.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info, warn};

use crate::config::TelemetryConfig;
use crate::diag::{Diagnostics, StatsSnapshot};
use crate::errors::{TelemetryError, TelemetryResult};
use crate::publish::Publisher;
use crate::ring::ReadingRing;
use crate::signal::{Flag, FlagSet, SignalGroup, Wait};
use crate::source::SourceSet;
use crate::store::SpillStore;
use crate::tasks::{self, TaskContext};

/// The assembled telemetry subsystem
pub struct TelemetrySystem {
    ctx: TaskContext,
    diag: Arc<Diagnostics>,
    publisher: Arc<dyn Publisher>,
    handles: Vec<JoinHandle<()>>,
}

impl TelemetrySystem {
    /// Build the subsystem: allocate the ring, open the spill store, run the
    /// startup scan, and initialize the flag group
    pub fn init(
        config: TelemetryConfig,
        sources: SourceSet,
        publisher: Arc<dyn Publisher>,
    ) -> TelemetryResult<Self> {
        let signals = Arc::new(SignalGroup::new());
        // Polling starts enabled; pre-existing files drain at low water
        signals.set(FlagSet::of(Flag::PollEnabled).with(Flag::DoneWriting));
        signals.set(Flag::UplinkDown);

        let store = Arc::new(SpillStore::open(
            config.spill_root.clone(),
            config.disk_quota_bytes,
        )?);
        if store.has_files()? {
            info!("previously saved sensor data detected");
            signals.set(Flag::HasSpillFiles);
        }

        let ring = Arc::new(ReadingRing::new(config.ring_capacity));
        let diag = Arc::new(Diagnostics::new(
            Arc::clone(&store),
            Arc::clone(&signals),
            config.disk_floor_kib,
        ));

        Ok(Self {
            ctx: TaskContext {
                ring,
                store,
                signals,
                sources: Arc::new(sources),
                config: Arc::new(config),
            },
            diag,
            publisher,
            handles: Vec::new(),
        })
    }

    /// Spawn the sampler, spill, and drain threads
    pub fn start(&mut self) -> TelemetryResult<()> {
        if !self.handles.is_empty() {
            return Ok(());
        }

        let sampler = {
            let ctx = self.ctx.clone();
            let diag = Arc::clone(&self.diag);
            spawn_task("petrel-sampler", move || tasks::sampler::run(&ctx, &diag))?
        };
        let spill = {
            let ctx = self.ctx.clone();
            spawn_task("petrel-spill", move || {
                let mut iter = ctx.read_iter();
                tasks::spill::run(&ctx, &mut iter)
            })?
        };
        let drain = {
            let ctx = self.ctx.clone();
            let publisher = Arc::clone(&self.publisher);
            spawn_task("petrel-drain", move || {
                let mut iter = ctx.read_iter();
                tasks::drain::run(&ctx, &mut iter, publisher.as_ref())
            })?
        };

        self.handles = vec![sampler, spill, drain];
        self.diag.log_stats();
        info!("telemetry subsystem started");
        Ok(())
    }

    /// Cooperative shutdown; in-flight disk writes complete first
    pub fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        self.ctx.signals.clear(Flag::PollEnabled);
        info!("waiting for spill task to finish up");
        if self
            .ctx
            .signals
            .wait_all(Flag::DoneWriting, Some(self.ctx.config.stop_flush_timeout))
            == Wait::TimedOut
        {
            warn!("spill file still open at stop deadline");
        }

        self.ctx.signals.set(Flag::Shutdown);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("task thread panicked during shutdown");
            }
        }
        info!("telemetry subsystem stopped");
    }

    /// Watermark flag group, shared with transport bridges and tests
    pub fn signals(&self) -> Arc<SignalGroup> {
        Arc::clone(&self.ctx.signals)
    }

    /// Current diagnostics snapshot
    pub fn stats(&self) -> TelemetryResult<StatsSnapshot> {
        self.diag.snapshot()
    }

    /// Any data still buffered in the ring or on disk?
    pub fn pending_data(&self) -> TelemetryResult<bool> {
        Ok(!self.ctx.ring.is_empty() || self.ctx.store.has_files()?)
    }

    /// Ring occupancy in items, for diagnostics
    pub fn buffered_items(&self) -> usize {
        self.ctx.ring.len()
    }
}

impl Drop for TelemetrySystem {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn a named task thread that aborts the process on a fatal error
fn spawn_task<F>(name: &'static str, body: F) -> TelemetryResult<JoinHandle<()>>
where
    F: FnOnce() -> TelemetryResult<()> + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            if let Err(e) = body() {
                error!("{name} failed fatally: {e}");
                std::process::abort();
            }
        })
        .map_err(|e| TelemetryError::TaskSpawn {
            name,
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::FixedSource;
    use crate::publish::PublishError;
    use std::time::Duration;

    struct NullPublisher;

    impl Publisher for NullPublisher {
        fn enqueue(&self, _topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
            Ok(())
        }
    }

    fn system(tmp: &tempfile::TempDir) -> TelemetrySystem {
        let mut config = TelemetryConfig::for_capacity(1024);
        config.spill_root = tmp.path().join("spill");
        config.sample_period = Duration::from_millis(2);
        let mut sources = SourceSet::new();
        sources
            .register(Box::new(FixedSource::new("temp", &["C"], &[20.0])))
            .unwrap();
        TelemetrySystem::init(config, sources, Arc::new(NullPublisher)).unwrap()
    }

    #[test]
    fn init_raises_startup_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let sys = system(&tmp);
        let flags = sys.signals();
        assert!(flags.is_set(Flag::PollEnabled));
        assert!(flags.is_set(Flag::DoneWriting));
        assert!(flags.is_set(Flag::UplinkDown));
        assert!(!flags.is_set(Flag::HasSpillFiles));
    }

    #[test]
    fn init_detects_preexisting_spill_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("spill")).unwrap();
        std::fs::write(tmp.path().join("spill/01000000.BIN"), b"").unwrap();

        let sys = system(&tmp);
        assert!(sys.signals().is_set(Flag::HasSpillFiles));
        assert!(sys.pending_data().unwrap());
    }

    #[test]
    fn start_stop_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sys = system(&tmp);
        sys.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        sys.stop();

        // Sampler ran while polling was enabled
        assert!(sys.buffered_items() >= 1);
        // Stop leaves no spill file half-open
        assert!(sys.signals().is_set(Flag::DoneWriting));
    }

    #[test]
    fn stop_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sys = system(&tmp);
        sys.start().unwrap();
        sys.stop();
        sys.stop();
    }
}
