use std::time::Duration;

use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &'static str = "gimbal.toml";
const ENV_PREFIX: &'static str = "GIMBAL";

/// Source of the raw derivative term
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeSource {
    /// Derivative of the error, reacts to setpoint changes
    Error,
    /// Negative derivative of the measurement, no kick on setpoint changes
    Measurement,
}

/// Proportional Integral Derivative controller parameters
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PidConfig {
    /// Proportional gain
    pub kp: f32,
    /// Integral gain
    pub ki: f32,
    /// Derivative gain
    pub kd: f32,
    /// Anti windup lower bound of the integrator
    pub integrator_min: f32,
    /// Anti windup upper bound of the integrator
    pub integrator_max: f32,
    /// Derivative low pass filter coefficient, in (0, 1)
    pub derivative_alpha: f32,
    pub derivative: DerivativeSource,
}

impl PidConfig {
    pub fn with_gains(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            ..Default::default()
        }
    }
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 8.0,
            ki: 0.01,
            kd: 1.0,
            integrator_min: -30.0,
            integrator_max: 30.0,
            derivative_alpha: 0.2,
            derivative: DerivativeSource::Measurement,
        }
    }
}

/// Control loop timing and shaping
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControlParameters {
    /// Control period in microseconds
    pub period_us: u64,
    /// Setpoint safety bound in degree
    pub max_angle_deg: f32,
    /// Errors smaller than this are ignored, in radian
    pub deadzone_rad: f32,
    /// Maximum setpoint change per cycle, in radian
    pub ramp_step_rad: f32,
    /// A telemetry sample is pushed every `telemetry_divider` cycles
    pub telemetry_divider: u32,
    /// Bounded wait on the shared state locks, in microseconds
    pub lock_timeout_us: u64,
    /// Settling time between sensor ready and the first cycle, in milliseconds
    pub start_delay_ms: u64,
    /// Statistics are logged every `stats_interval` cycles
    pub stats_interval: u64,
}

impl ControlParameters {
    pub fn period(&self) -> Duration {
        Duration::from_micros(self.period_us)
    }

    pub fn dt(&self) -> f32 {
        self.period().as_secs_f32()
    }

    pub fn max_angle_rad(&self) -> f32 {
        self.max_angle_deg.to_radians()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_micros(self.lock_timeout_us)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

impl Default for ControlParameters {
    fn default() -> Self {
        Self {
            period_us: 1000,
            max_angle_deg: 84.0,
            deadzone_rad: 0.005,
            ramp_step_rad: 0.001,
            telemetry_divider: 100,
            lock_timeout_us: 200,
            start_delay_ms: 500,
            stats_interval: 5000,
        }
    }
}

/// Motor side of the control law
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ActuatorParameters {
    /// Maximum effort magnitude sent to a motor (voltage limit)
    pub effort_limit: f32,
    /// Output sign of the pitch motor
    pub pitch_sign: f32,
    /// Output sign of the roll motor
    pub roll_sign: f32,
}

impl Default for ActuatorParameters {
    fn default() -> Self {
        Self {
            effort_limit: 3.0,
            pitch_sign: -1.0,
            roll_sign: 1.0,
        }
    }
}

/// Kalman filter noise terms
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct KalmanConfig {
    /// Process noise of the angle
    pub q_angle: f32,
    /// Process noise of the gyro bias
    pub q_bias: f32,
    /// Measurement noise of the accelerometer tilt
    pub r_measure: f32,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            q_angle: 0.001,
            q_bias: 0.003,
            r_measure: 0.03,
        }
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct QuaternionConfig {
    /// Accepted deviation of the squared magnitude from 1
    pub tolerance: f32,
}

impl Default for QuaternionConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
        }
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SensorParameters {
    /// Number of static samples averaged at start
    pub calibration_samples: usize,
    /// Sampling period in microseconds
    pub sample_period_us: u64,
}

impl SensorParameters {
    pub fn sample_period(&self) -> Duration {
        Duration::from_micros(self.sample_period_us)
    }
}

impl Default for SensorParameters {
    fn default() -> Self {
        Self {
            calibration_samples: 100,
            sample_period_us: 5000,
        }
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TelemetryParameters {
    /// Number of samples the buffer holds
    pub capacity: usize,
}

impl Default for TelemetryParameters {
    fn default() -> Self {
        Self {
            capacity: 200,
        }
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RemoteParameters {
    /// Minimum time between two accepted button presses
    pub debounce_ms: u64,
    /// Roll setpoint toggled by the button, in degree
    pub toggle_roll_deg: f32,
    /// Bounded wait on the setpoint lock
    pub lock_timeout_ms: u64,
}

impl RemoteParameters {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for RemoteParameters {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            toggle_roll_deg: -80.0,
            lock_timeout_ms: 100,
        }
    }
}

/// Gimbal configuration parameters
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GimbalParameters {
    pub control: ControlParameters,
    /// PID controller of the pitch axis
    pub pitch: PidConfig,
    /// PID controller of the roll axis
    pub roll: PidConfig,
    pub actuator: ActuatorParameters,
    pub kalman: KalmanConfig,
    pub quaternion: QuaternionConfig,
    pub sensor: SensorParameters,
    pub telemetry: TelemetryParameters,
    pub remote: RemoteParameters,
}

impl Default for GimbalParameters {
    fn default() -> Self {
        Self {
            control: ControlParameters::default(),
            pitch: PidConfig::with_gains(8.0, 0.01, 1.0),
            roll: PidConfig::with_gains(8.0, 0.01, 1.2),
            actuator: ActuatorParameters::default(),
            kalman: KalmanConfig::default(),
            quaternion: QuaternionConfig::default(),
            sensor: SensorParameters::default(),
            telemetry: TelemetryParameters::default(),
            remote: RemoteParameters::default(),
        }
    }
}

impl GimbalParameters {
    /// Read `gimbal.toml` (optional) then `GIMBAL_<SECTION>__<KEY>` environment overrides.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(Self::defaults()?)
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__").try_parsing(true))
            .build()
            .context("Cannot read configuration")?;
        Self::from_config(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(Self::defaults()?)
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .context("Cannot read configuration")?;
        Self::from_config(config)
    }

    /// Lowest priority layer: a key missing from a section falls back to that
    /// section's own default, so `[roll]` keeps the roll gains.
    fn defaults() -> Result<Config> {
        Config::try_from(&Self::default()).context("Cannot build default configuration")
    }

    fn from_config(config: Config) -> Result<Self> {
        let params: Self = config.try_deserialize().context("Cannot parse configuration")?;
        params.validate()?;
        Ok(params)
    }

    pub fn save(&self) -> Result<()> {
        let config = toml::to_string_pretty(self)?;
        std::fs::write(CONFIG_FILE, config).context("Cannot write configuration file")
    }

    pub fn validate(&self) -> Result<()> {
        let control = &self.control;
        ensure!(control.period_us > 0, "control period must be positive");
        ensure!(control.ramp_step_rad > 0.0, "ramp step must be positive");
        ensure!(control.max_angle_deg > 0.0 && control.max_angle_deg < 90.0, "max angle must be within (0, 90) degree");
        ensure!(control.deadzone_rad >= 0.0, "deadzone cannot be negative");
        ensure!(control.telemetry_divider > 0, "telemetry divider cannot be zero");
        ensure!(control.stats_interval > 0, "stats interval cannot be zero");
        for (axis, pid) in [("pitch", &self.pitch), ("roll", &self.roll)] {
            ensure!(pid.integrator_min <= pid.integrator_max, "{} integrator bounds are inverted", axis);
            ensure!(
                pid.derivative_alpha > 0.0 && pid.derivative_alpha < 1.0,
                "{} derivative alpha must be within (0, 1)",
                axis
            );
        }
        ensure!(self.actuator.effort_limit > 0.0, "effort limit must be positive");
        ensure!(self.sensor.calibration_samples > 0, "calibration needs at least one sample");
        ensure!(self.sensor.sample_period_us > 0, "sensor period must be positive");
        ensure!(self.kalman.r_measure > 0.0, "measurement noise must be positive");
        ensure!(self.kalman.q_angle >= 0.0 && self.kalman.q_bias >= 0.0, "process noise cannot be negative");
        ensure!(self.quaternion.tolerance >= 0.0, "quaternion tolerance cannot be negative");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters_are_valid() {
        let params = GimbalParameters::default();
        params.validate().unwrap();
        assert_eq!(params.roll.kd, 1.2);
        assert_eq!(params.pitch.kd, 1.0);
    }

    #[test]
    fn test_partial_file() {
        let params = GimbalParameters::from_toml_str(
            r#"
            [control]
            period_us = 5000
            deadzone_rad = 0.035

            [roll]
            kp = 4.0
            derivative = "error"
            "#,
        )
        .unwrap();
        assert_eq!(params.control.period(), Duration::from_millis(5));
        assert_eq!(params.control.deadzone_rad, 0.035);
        assert_eq!(params.control.max_angle_deg, 84.0);
        assert_eq!(params.roll.kp, 4.0);
        assert_eq!(params.roll.derivative, DerivativeSource::Error);
        assert_eq!(params.pitch, PidConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_axis_defaults() {
        let params = GimbalParameters::from_toml_str("[roll]\nkp = 4.0").unwrap();
        assert_eq!(params.roll.kp, 4.0);
        assert_eq!(params.roll.kd, 1.2);
        assert_eq!(params.roll.ki, 0.01);
        assert_eq!(params.pitch.kd, 1.0);

        let params = GimbalParameters::from_toml_str("[pitch]\nkd = 0.5").unwrap();
        assert_eq!(params.pitch.kd, 0.5);
        assert_eq!(params.roll, GimbalParameters::default().roll);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(GimbalParameters::from_toml_str("[control]\nperiod_us = 0").is_err());
        assert!(GimbalParameters::from_toml_str("[pitch]\nderivative_alpha = 1.5").is_err());
        assert!(GimbalParameters::from_toml_str("[roll]\nintegrator_min = 5.0\nintegrator_max = -5.0").is_err());
        assert!(GimbalParameters::from_toml_str("[control]\ntelemetry_divider = 0").is_err());
        assert!(GimbalParameters::from_toml_str("[kalman]\nq_angle = -0.5").is_err());
        assert!(GimbalParameters::from_toml_str("[kalman]\nq_bias = -0.001").is_err());
        assert!(GimbalParameters::from_toml_str("[quaternion]\ntolerance = -0.01").is_err());
        assert!(GimbalParameters::from_toml_str("[kalman]\nq_angle = 0.0\nq_bias = 0.0").is_ok());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut params = GimbalParameters::default();
        params.remote.toggle_roll_deg = 45.0;
        let text = toml::to_string_pretty(&params).unwrap();
        assert_eq!(GimbalParameters::from_toml_str(&text).unwrap(), params);
    }
}
