//! Drain Task - At Low Water and Connected, Publish Until Empty
//!
//! Wakes when the uplink is started, connected, and there is enough buffered
//! data to be worth a batch. Pulls up to `batch_max` readings through the
//! read iterator (spill files first, so data leaves in sampling order),
//! marshals each through its owning source into the envelope's data array,
//! and hands the serialized envelope to the publisher.
//!
//! A drained batch is never dropped: a retryable publish failure holds the
//! batch and retries after the cooldown, forever. Ring slots are
//! acknowledged only after the publisher accepts the envelope, preserving
//! at-least-once delivery end to end.

use log::{debug, warn};
use serde_json::json;

use crate::errors::{TelemetryError, TelemetryResult};
use crate::iter::{DrainMode, ReadIter};
use crate::publish::{PublishError, Publisher};
use crate::signal::{Flag, FlagSet, Wait};
use crate::source::SourceError;

use super::TaskContext;

/// Task entry point; returns on cooperative shutdown
pub fn run(ctx: &TaskContext, iter: &mut ReadIter, publisher: &dyn Publisher) -> TelemetryResult<()> {
    let wake = FlagSet::of(Flag::UplinkStarted)
        .with(Flag::UplinkConnected)
        .with(Flag::LowWater);

    loop {
        if ctx.signals.wait_all(wake, None) == Wait::Shutdown {
            return Ok(());
        }
        debug!("marshalling loop");

        let mut data = Vec::new();
        let mut drained = 0usize;
        while drained < ctx.config.batch_max {
            let Some(frame) = iter.next_reading(DrainMode::FilesThenRing)? else {
                break;
            };
            match ctx.sources.marshal(frame.source_idx, &frame.payload, &mut data) {
                None => return Err(TelemetryError::UnknownSource(frame.source_idx)),
                Some(Err(e)) => {
                    // A payload its own source cannot decode is corruption
                    return Err(TelemetryError::Marshal {
                        source_idx: frame.source_idx,
                        reason: marshal_reason(e),
                    });
                }
                Some(Ok(())) => drained += 1,
            }
        }

        if drained == 0 {
            continue;
        }

        let envelope = json!({
            "metadata": { "device_id": ctx.config.device_id },
            "data": data,
        });
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|_| TelemetryError::PublishRejected("envelope serialization failed"))?;

        if !publish_with_retry(ctx, publisher, &bytes)? {
            return Ok(()); // shutdown mid-retry; unacked readings stay buffered
        }
        iter.ack_all();
    }
}

/// Retry forever on retryable failures; `Ok(false)` means shutdown
fn publish_with_retry(
    ctx: &TaskContext,
    publisher: &dyn Publisher,
    bytes: &[u8],
) -> TelemetryResult<bool> {
    loop {
        match publisher.enqueue(&ctx.config.sensor_topic, bytes) {
            Ok(()) => return Ok(true),
            Err(PublishError::Rejected(reason)) => {
                return Err(TelemetryError::PublishRejected(reason))
            }
            Err(e) => {
                warn!("publish failed ({e}); retrying after cooldown");
                if ctx.signals.sleep_interruptible(ctx.config.retry_cooldown) == Wait::Shutdown {
                    return Ok(false);
                }
            }
        }
    }
}

fn marshal_reason(e: SourceError) -> &'static str {
    match e {
        SourceError::Payload(reason) | SourceError::Measurement(reason) => reason,
        SourceError::RegistryFull => "registry full",
    }
}
