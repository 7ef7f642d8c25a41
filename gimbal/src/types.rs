use serde::{Deserialize, Serialize};

/// Best estimate of the platform tilt
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
pub struct OrientationSample {
    /// Pitch angle in radian
    pub pitch_rad: f32,
    /// Roll angle in radian
    pub roll_rad: f32,
}

impl OrientationSample {
    pub fn from_degrees(pitch_deg: f32, roll_deg: f32) -> Self {
        Self {
            pitch_rad: pitch_deg.to_radians(),
            roll_rad: roll_deg.to_radians(),
        }
    }
}

/// Commanded target angles
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
pub struct Setpoint {
    /// Pitch target in degree
    pub pitch_deg: f32,
    /// Roll target in degree
    pub roll_deg: f32,
}

impl Setpoint {
    pub fn new(pitch_deg: f32, roll_deg: f32) -> Self {
        Self {
            pitch_deg,
            roll_deg,
        }
    }

    /// Convert to radian and keep both axes within `±max_angle_rad`.
    pub fn to_radians_clamped(&self, max_angle_rad: f32) -> (f32, f32) {
        (
            self.pitch_deg.to_radians().clamp(-max_angle_rad, max_angle_rad),
            self.roll_deg.to_radians().clamp(-max_angle_rad, max_angle_rad),
        )
    }
}

/// Orientation snapshot handed to the telemetry publisher
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
pub struct TelemetrySample {
    pub pitch_deg: f32,
    pub roll_deg: f32,
}

impl From<OrientationSample> for TelemetrySample {
    fn from(orientation: OrientationSample) -> Self {
        Self {
            pitch_deg: orientation.pitch_rad.to_degrees(),
            roll_deg: orientation.roll_rad.to_degrees(),
        }
    }
}

/// Raw inertial reading
///
/// Axes follow the body frame: x forward (roll axis), y right (pitch axis), z down.
#[derive(Default, Copy, Clone, Debug, PartialEq)]
pub struct ImuSample {
    /// Specific force, any unit (only the direction is used)
    pub accel: [f32; 3],
    /// Angular rate in rad/s
    pub gyro: [f32; 3],
    /// Time elapsed since the previous sample in seconds
    pub dt: f32,
}

impl ImuSample {
    pub fn pitch_rate(&self) -> f32 {
        self.gyro[1]
    }

    pub fn roll_rate(&self) -> f32 {
        self.gyro[0]
    }

    /// Pitch and roll derived from the gravity direction
    pub fn tilt(&self) -> (f32, f32) {
        tilt_from_gravity(&self.accel)
    }
}

/// Fused orientation packet `[w, x, y, z]` as delivered by a motion processor
#[derive(Default, Copy, Clone, Debug, PartialEq)]
pub struct QuaternionPacket(pub [f32; 4]);

impl QuaternionPacket {
    pub fn magnitude_squared(&self) -> f32 {
        self.0.iter().map(|x| x * x).sum()
    }

    pub fn normalized(&self) -> Self {
        let norm = self.magnitude_squared().sqrt();
        Self(self.0.map(|x| x / norm))
    }

    /// Gravity direction in the body frame
    pub fn gravity(&self) -> [f32; 3] {
        let [w, x, y, z] = self.0;
        [2.0 * (x * z - w * y), 2.0 * (w * x + y * z), w * w - x * x - y * y + z * z]
    }

    /// Quaternion of a zero yaw orientation
    pub fn from_pitch_roll(pitch_rad: f32, roll_rad: f32) -> Self {
        let (sp, cp) = (pitch_rad / 2.0).sin_cos();
        let (sr, cr) = (roll_rad / 2.0).sin_cos();
        Self([cr * cp, sr * cp, cr * sp, -sr * sp])
    }
}

/// Pitch and roll (radian) of a body whose gravity reading is `gravity`.
pub fn tilt_from_gravity(gravity: &[f32; 3]) -> (f32, f32) {
    let [gx, gy, gz] = *gravity;
    let pitch = f32::atan2(-gx, (gy * gy + gz * gz).sqrt());
    let roll = f32::atan2(gy, gz);
    (pitch, roll)
}

/// Motor effort per axis, mounting sign already applied
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
pub struct ActuatorCommand {
    pub pitch: f32,
    pub roll: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_quaternion_gravity_matches_tilt() {
        let q = QuaternionPacket::from_pitch_roll(0.3, -0.2);
        assert_abs_diff_eq!(q.magnitude_squared(), 1.0, epsilon = 1e-6);
        let (pitch, roll) = tilt_from_gravity(&q.gravity());
        assert_abs_diff_eq!(pitch, 0.3, epsilon = 1e-5);
        assert_abs_diff_eq!(roll, -0.2, epsilon = 1e-5);
    }

    #[test]
    fn test_setpoint_clamp() {
        let max = 84f32.to_radians();
        let (pitch, roll) = Setpoint::new(200.0, -10.0).to_radians_clamped(max);
        assert_eq!(pitch, max);
        assert_abs_diff_eq!(roll, -10f32.to_radians());
        let (_, roll) = Setpoint::new(0.0, -95.0).to_radians_clamped(max);
        assert_eq!(roll, -max);
    }

    #[test]
    fn test_telemetry_in_degrees() {
        let sample = TelemetrySample::from(OrientationSample::from_degrees(5.0, -3.0));
        assert_abs_diff_eq!(sample.pitch_deg, 5.0, epsilon = 1e-5);
        assert_abs_diff_eq!(sample.roll_deg, -3.0, epsilon = 1e-5);
    }
}
