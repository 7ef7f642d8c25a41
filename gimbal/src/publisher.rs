use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::telemetry::TelemetryRingBuffer;
use crate::types::TelemetrySample;

/// Uplink forwarding telemetry samples
pub trait Publisher {
    fn publish(&mut self, sample: &TelemetrySample) -> Result<()>;
}

/// Publishes telemetry through the log
#[derive(Default, Debug)]
pub struct LogPublisher {
    published: u64,
}

impl LogPublisher {
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl Publisher for LogPublisher {
    fn publish(&mut self, sample: &TelemetrySample) -> Result<()> {
        self.published += 1;
        log::info!("telemetry pitch {:>7.2}° roll {:>7.2}°", sample.pitch_deg, sample.roll_deg);
        Ok(())
    }
}

/// Forward the oldest sample, waiting at most `timeout` for one.
///
/// Returns `false` when nothing was published.
pub fn publish_next<P: Publisher>(buffer: &TelemetryRingBuffer, publisher: &mut P, timeout: Duration) -> bool {
    match buffer.pop(timeout) {
        Some(sample) => match publisher.publish(&sample) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Telemetry sample dropped: {:#}", e);
                false
            },
        },
        None => false,
    }
}

/// Publisher task: sleep on the buffer and forward every sample.
pub fn publisher_task<P: Publisher>(buffer: Arc<TelemetryRingBuffer>, mut publisher: P) -> Result<()> {
    loop {
        let sample = buffer.pop_blocking();
        if let Err(e) = publisher.publish(&sample) {
            log::warn!("Telemetry sample dropped: {:#}", e);
        }
    }
}
