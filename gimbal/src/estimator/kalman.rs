use anyhow::{bail, Result};

use super::{EstimatorStats, OrientationEstimator};
use crate::config::KalmanConfig;
use crate::types::{tilt_from_gravity, ImuSample, OrientationSample};

/// One axis Kalman filter estimating the angle and the gyro bias
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct KalmanAxis {
    /// Angle in radian
    pub angle: f32,
    /// Gyro bias in rad/s
    pub bias: f32,
    /// Error covariance of [angle, bias]
    pub p: [[f32; 2]; 2],
}

impl KalmanAxis {
    pub fn new(angle: f32, bias: f32) -> Self {
        Self {
            angle,
            bias,
            p: [[0.0; 2]; 2],
        }
    }

    /// Propagate the angle with the unbiased rate
    pub fn predict(&mut self, rate: f32, dt: f32, config: &KalmanConfig) {
        self.angle += dt * (rate - self.bias);

        let p = &mut self.p;
        p[0][0] += dt * (dt * p[1][1] - p[0][1] - p[1][0] + config.q_angle);
        p[0][1] -= dt * p[1][1];
        p[1][0] -= dt * p[1][1];
        p[1][1] += config.q_bias * dt;
    }

    /// Correct angle and bias with a measured angle
    pub fn correct(&mut self, measured: f32, config: &KalmanConfig) {
        let s = self.p[0][0] + config.r_measure;
        let k0 = self.p[0][0] / s;
        let k1 = self.p[1][0] / s;

        let y = measured - self.angle;
        self.angle += k0 * y;
        self.bias += k1 * y;

        // P = (I - KH) P, all four terms
        let p00 = self.p[0][0];
        let p01 = self.p[0][1];
        self.p[0][0] -= k0 * p00;
        self.p[0][1] -= k0 * p01;
        self.p[1][0] -= k1 * p00;
        self.p[1][1] -= k1 * p01;
    }

    /// Predict then correct. A non positive `dt` leaves the filter untouched.
    pub fn step(&mut self, rate: f32, measured: f32, dt: f32, config: &KalmanConfig) -> bool {
        if !(dt > 0.0) {
            return false;
        }
        self.predict(rate, dt, config);
        self.correct(measured, config);
        true
    }
}

/// Pitch and roll Kalman filters fed with raw IMU samples
#[derive(Clone, Debug)]
pub struct KalmanEstimator {
    config: KalmanConfig,
    pitch: KalmanAxis,
    roll: KalmanAxis,
    stats: EstimatorStats,
}

impl KalmanEstimator {
    pub fn new(config: KalmanConfig) -> Self {
        Self {
            config,
            pitch: KalmanAxis::new(0.0, 0.0),
            roll: KalmanAxis::new(0.0, 0.0),
            stats: EstimatorStats::default(),
        }
    }

    pub fn pitch(&self) -> &KalmanAxis {
        &self.pitch
    }

    pub fn roll(&self) -> &KalmanAxis {
        &self.roll
    }
}

impl OrientationEstimator for KalmanEstimator {
    type Input = ImuSample;

    fn initialize(&mut self, samples: &[ImuSample]) -> Result<()> {
        if samples.is_empty() {
            bail!("No static sample to calibrate the Kalman filter");
        }

        let n = samples.len() as f32;
        let mut accel = [0.0f32; 3];
        let mut gyro = [0.0f32; 3];
        for sample in samples {
            for i in 0..3 {
                accel[i] += sample.accel[i] / n;
                gyro[i] += sample.gyro[i] / n;
            }
        }
        if accel.iter().all(|a| *a == 0.0) || accel.iter().any(|a| !a.is_finite()) {
            bail!("Calibration samples have no usable gravity reading");
        }

        let (pitch, roll) = tilt_from_gravity(&accel);
        let mean = ImuSample {
            accel,
            gyro,
            dt: 0.0,
        };
        self.pitch = KalmanAxis::new(pitch, mean.pitch_rate());
        self.roll = KalmanAxis::new(roll, mean.roll_rate());
        log::info!(
            "Kalman seeded: pitch {:.2}° roll {:.2}°, bias [{:.4}, {:.4}] rad/s",
            pitch.to_degrees(),
            roll.to_degrees(),
            self.pitch.bias,
            self.roll.bias
        );
        Ok(())
    }

    fn update(&mut self, input: &ImuSample) -> Option<OrientationSample> {
        let (pitch_tilt, roll_tilt) = input.tilt();
        if !self.pitch.step(input.pitch_rate(), pitch_tilt, input.dt, &self.config) {
            self.stats.skipped += 1;
            return None;
        }
        self.roll.step(input.roll_rate(), roll_tilt, input.dt, &self.config);
        Some(self.orientation())
    }

    fn orientation(&self) -> OrientationSample {
        OrientationSample {
            pitch_rad: self.pitch.angle,
            roll_rad: self.roll.angle,
        }
    }

    fn stats(&self) -> EstimatorStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn static_sample(pitch: f32, roll: f32, gyro: [f32; 3], dt: f32) -> ImuSample {
        ImuSample {
            accel: [-pitch.sin(), roll.sin() * pitch.cos(), roll.cos() * pitch.cos()],
            gyro,
            dt,
        }
    }

    #[test]
    fn test_calibration_seeds_angle_and_bias() {
        let mut estimator = KalmanEstimator::new(KalmanConfig::default());
        let samples: Vec<_> = (0..100).map(|_| static_sample(0.1, -0.05, [0.02, -0.01, 0.0], 0.005)).collect();
        estimator.initialize(&samples).unwrap();

        assert_abs_diff_eq!(estimator.orientation().pitch_rad, 0.1, epsilon = 1e-5);
        assert_abs_diff_eq!(estimator.orientation().roll_rad, -0.05, epsilon = 1e-5);
        assert_abs_diff_eq!(estimator.pitch().bias, -0.01, epsilon = 1e-6);
        assert_abs_diff_eq!(estimator.roll().bias, 0.02, epsilon = 1e-6);
    }

    #[test]
    fn test_calibration_without_samples_fails() {
        let mut estimator = KalmanEstimator::new(KalmanConfig::default());
        assert!(estimator.initialize(&[]).is_err());
        assert!(estimator.initialize(&[ImuSample::default()]).is_err());
    }

    #[test]
    fn test_converges_to_tilt_and_bias() {
        let mut estimator = KalmanEstimator::new(KalmanConfig::default());
        estimator.initialize(&[static_sample(0.0, 0.0, [0.0; 3], 0.005)]).unwrap();

        // Stationary platform with an unknown gyro bias
        let sample = static_sample(0.3, -0.2, [0.04, 0.05, 0.0], 0.005);
        for _ in 0..20_000 {
            estimator.update(&sample);
        }
        assert_abs_diff_eq!(estimator.orientation().pitch_rad, 0.3, epsilon = 1e-3);
        assert_abs_diff_eq!(estimator.orientation().roll_rad, -0.2, epsilon = 1e-3);
        assert_abs_diff_eq!(estimator.pitch().bias, 0.05, epsilon = 1e-3);
        assert_abs_diff_eq!(estimator.roll().bias, 0.04, epsilon = 1e-3);
    }

    #[test]
    fn test_non_positive_dt_is_skipped() {
        let mut estimator = KalmanEstimator::new(KalmanConfig::default());
        estimator.initialize(&[static_sample(0.1, 0.1, [0.0; 3], 0.005)]).unwrap();
        estimator.update(&static_sample(0.2, 0.2, [0.1, 0.1, 0.0], 0.005));
        let pitch = *estimator.pitch();
        let roll = *estimator.roll();

        assert_eq!(estimator.update(&static_sample(0.5, 0.5, [1.0, 1.0, 0.0], 0.0)), None);
        assert_eq!(estimator.update(&static_sample(0.5, 0.5, [1.0, 1.0, 0.0], -0.001)), None);
        assert_eq!(estimator.update(&static_sample(0.5, 0.5, [1.0, 1.0, 0.0], f32::NAN)), None);
        assert_eq!(*estimator.pitch(), pitch);
        assert_eq!(*estimator.roll(), roll);
        assert_eq!(estimator.stats().skipped, 3);
    }

    #[test]
    fn test_covariance_stays_non_negative() {
        let config = KalmanConfig::default();
        let mut axis = KalmanAxis::new(0.0, 0.0);
        // Deterministic pseudo random inputs and time steps
        let mut seed = 0x2545_f491u32;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed as f32 / u32::MAX as f32
        };
        for i in 0..200_000 {
            let dt = 0.0001 + 0.02 * next();
            let rate = 4.0 * (next() - 0.5);
            let measured = (i as f32 * 0.001).sin() + 0.1 * (next() - 0.5);
            assert!(axis.step(rate, measured, dt, &config));
            assert!(axis.p[0][0] >= 0.0, "P00 negative at step {}: {:?}", i, axis.p);
            assert!(axis.p[1][1] >= 0.0, "P11 negative at step {}: {:?}", i, axis.p);
        }
        assert_abs_diff_eq!(axis.p[0][1], axis.p[1][0], epsilon = 1e-5);
    }
}
