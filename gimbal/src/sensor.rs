use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::config::SensorParameters;
use crate::estimator::{EstimatorStats, OrientationEstimator};
use crate::shared::SharedState;

/// Consecutive read failures tolerated while calibrating
const MAX_CALIBRATION_FAULTS: usize = 10;

/// Inertial sensor delivering readings of type `R`
///
/// `read` blocks until the next sample is available, pacing the sensor task.
pub trait SensorSource<R> {
    fn read(&mut self) -> Result<R>;
}

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct SensorStats {
    pub samples: u64,
    pub read_errors: u64,
    /// Estimates not published because the orientation lock was busy
    pub stale_writes: u64,
}

/// Feeds an estimator from a sensor and publishes the orientation
pub struct SensorTask<E, S> {
    params: SensorParameters,
    estimator: E,
    source: S,
    shared: Arc<SharedState>,
    stats: SensorStats,
}

impl<E, S> SensorTask<E, S>
where
    E: OrientationEstimator,
    S: SensorSource<E::Input>,
{
    pub fn new(params: SensorParameters, estimator: E, source: S, shared: Arc<SharedState>) -> Self {
        Self {
            params,
            estimator,
            source,
            shared,
            stats: SensorStats::default(),
        }
    }

    /// Seed the estimator from a burst of static samples and publish the first orientation.
    pub fn calibrate(&mut self) -> Result<()> {
        let mut samples = Vec::with_capacity(self.params.calibration_samples);
        let mut faults = 0;
        while samples.len() < self.params.calibration_samples {
            match self.source.read() {
                Ok(sample) => {
                    samples.push(sample);
                    faults = 0;
                },
                Err(e) => {
                    self.stats.read_errors += 1;
                    faults += 1;
                    if faults >= MAX_CALIBRATION_FAULTS {
                        return Err(e.context("Sensor not responding"));
                    }
                },
            }
        }
        self.estimator.initialize(&samples).context("Calibrating estimator")?;

        if !self.shared.orientation.write(self.estimator.orientation()) {
            bail!("Cannot publish the initial orientation");
        }
        Ok(())
    }

    /// Read one sample and publish the resulting estimate.
    pub fn poll_once(&mut self) {
        let sample = match self.source.read() {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.read_errors += 1;
                if self.stats.read_errors == 1 {
                    log::error!("Sensor read failed: {:#}", e);
                }
                return;
            },
        };
        self.stats.samples += 1;

        if let Some(orientation) = self.estimator.update(&sample) {
            if !self.shared.orientation.write(orientation) {
                self.stats.stale_writes += 1;
            }
        }
    }

    /// Calibrate, signal readiness once then estimate until `stop` is raised.
    pub fn run(&mut self, ready: Sender<()>, stop: &AtomicBool) -> Result<()> {
        self.calibrate()?;
        let _ = ready.send(());
        drop(ready);

        while !stop.load(Ordering::Relaxed) {
            self.poll_once();
        }
        log::info!("Sensor task stopped: {:?} {:?}", self.stats, self.estimator.stats());
        Ok(())
    }

    pub fn stats(&self) -> SensorStats {
        self.stats
    }

    pub fn estimator_stats(&self) -> EstimatorStats {
        self.estimator.stats()
    }
}
