//! Orientation estimation
//!
//! Two interchangeable estimators provide the platform tilt:
//! - [`KalmanEstimator`] fuses raw gyro rates with the accelerometer tilt (reference),
//! - [`QuaternionEstimator`] consumes orientation already fused by a motion processor.
//!
//! The binary instantiates the Kalman filter unless the `dmp` feature is enabled,
//! so only one estimator ever runs. The library builds both so they can be
//! compared side by side (`examples/estimator.rs`) and tested together.

use anyhow::Result;

use crate::types::OrientationSample;

pub mod dmp;
pub mod kalman;

pub use dmp::QuaternionEstimator;
pub use kalman::{KalmanAxis, KalmanEstimator};

/// Faults absorbed by an estimator
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct EstimatorStats {
    /// Inputs ignored because of a non positive time step
    pub skipped: u64,
    /// Inputs rejected by a sanity check
    pub discarded: u64,
}

pub trait OrientationEstimator {
    /// Sensor reading consumed by the estimator
    type Input;

    /// Seed the estimate from a burst of static readings.
    fn initialize(&mut self, samples: &[Self::Input]) -> Result<()>;

    /// Fold a new reading into the estimate.
    ///
    /// Returns `None` when the reading was not used, the previous estimate is then kept.
    fn update(&mut self, input: &Self::Input) -> Option<OrientationSample>;

    /// Current estimate
    fn orientation(&self) -> OrientationSample;

    fn stats(&self) -> EstimatorStats;
}
