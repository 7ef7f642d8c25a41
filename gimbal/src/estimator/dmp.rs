use anyhow::{bail, Result};

use super::{EstimatorStats, OrientationEstimator};
use crate::config::QuaternionConfig;
use crate::types::{tilt_from_gravity, OrientationSample, QuaternionPacket};

/// Estimator fed with orientation already fused by the IMU motion processor
#[derive(Clone, Debug)]
pub struct QuaternionEstimator {
    config: QuaternionConfig,
    orientation: OrientationSample,
    stats: EstimatorStats,
}

impl QuaternionEstimator {
    pub fn new(config: QuaternionConfig) -> Self {
        Self {
            config,
            orientation: OrientationSample::default(),
            stats: EstimatorStats::default(),
        }
    }

    /// Tilt carried by a packet, `None` if the packet is not a unit quaternion
    fn decode(&self, packet: &QuaternionPacket) -> Option<OrientationSample> {
        let magnitude = packet.magnitude_squared();
        if !magnitude.is_finite() || (magnitude - 1.0).abs() > self.config.tolerance {
            return None;
        }
        let (pitch_rad, roll_rad) = tilt_from_gravity(&packet.normalized().gravity());
        Some(OrientationSample {
            pitch_rad,
            roll_rad,
        })
    }
}

impl OrientationEstimator for QuaternionEstimator {
    type Input = QuaternionPacket;

    fn initialize(&mut self, samples: &[QuaternionPacket]) -> Result<()> {
        match samples.iter().rev().find_map(|packet| self.decode(packet)) {
            Some(orientation) => {
                self.orientation = orientation;
                Ok(())
            },
            None => bail!("No valid quaternion among {} startup packets", samples.len()),
        }
    }

    fn update(&mut self, packet: &QuaternionPacket) -> Option<OrientationSample> {
        match self.decode(packet) {
            Some(orientation) => {
                self.orientation = orientation;
                Some(orientation)
            },
            None => {
                self.stats.discarded += 1;
                log::warn!("Invalid quaternion packet discarded, |q|² = {}", packet.magnitude_squared());
                None
            },
        }
    }

    fn orientation(&self) -> OrientationSample {
        self.orientation
    }

    fn stats(&self) -> EstimatorStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_valid_packet_updates_orientation() {
        let mut estimator = QuaternionEstimator::new(QuaternionConfig::default());
        let orientation = estimator.update(&QuaternionPacket::from_pitch_roll(0.4, -0.1)).unwrap();
        assert_abs_diff_eq!(orientation.pitch_rad, 0.4, epsilon = 1e-5);
        assert_abs_diff_eq!(orientation.roll_rad, -0.1, epsilon = 1e-5);
        assert_eq!(estimator.stats().discarded, 0);
    }

    #[test]
    fn test_corrupt_packet_is_discarded() {
        let mut estimator = QuaternionEstimator::new(QuaternionConfig::default());
        estimator.initialize(&[QuaternionPacket::from_pitch_roll(0.2, 0.3)]).unwrap();
        let before = estimator.orientation();

        let QuaternionPacket(q) = QuaternionPacket::from_pitch_roll(-0.5, 0.5);
        let scaled = QuaternionPacket(q.map(|x| x * 1.05));
        assert_eq!(estimator.update(&scaled), None);
        assert_eq!(estimator.update(&QuaternionPacket([f32::NAN, 0.0, 0.0, 0.0])), None);
        assert_eq!(estimator.orientation(), before);
        assert_eq!(estimator.stats().discarded, 2);

        // Slightly off unit length is still accepted
        let nearly = QuaternionPacket(q.map(|x| x * 1.004));
        let orientation = estimator.update(&nearly).unwrap();
        assert_abs_diff_eq!(orientation.pitch_rad, -0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_initialize_needs_a_valid_packet() {
        let mut estimator = QuaternionEstimator::new(QuaternionConfig::default());
        assert!(estimator.initialize(&[QuaternionPacket([0.0; 4])]).is_err());
        assert!(estimator.initialize(&[]).is_err());
    }
}
