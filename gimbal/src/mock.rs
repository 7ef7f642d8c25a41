//! Simulated two axis platform
//!
//! Stands in for the IMU and the motor drivers so the whole system runs on a
//! workstation. Each motor is velocity commanded through a first order lag, the
//! pitch motor is mounted reversed and the gyro carries a constant bias.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::actuator::Actuator;
use crate::sensor::SensorSource;
use crate::types::{ActuatorCommand, ImuSample, OrientationSample, QuaternionPacket};

const GRAVITY: f32 = 9.81;
/// Motor speed per unit of effort, in rad/s
const RATE_GAIN: f32 = 1.0;
const MAX_RATE: f32 = 3.0;
const TIME_CONSTANT: f32 = 0.02;
const GYRO_BIAS: [f32; 3] = [0.01, -0.02, 0.005];
const ACCEL_NOISE: f32 = 0.05;

#[derive(Clone, Debug)]
pub struct Plant {
    orientation: OrientationSample,
    /// Angular rates `(pitch, roll)` in rad/s
    rates: (f32, f32),
    command: ActuatorCommand,
    noise: u32,
}

impl Plant {
    pub fn new(orientation: OrientationSample) -> Self {
        Self {
            orientation,
            rates: (0.0, 0.0),
            command: ActuatorCommand::default(),
            noise: 0x9E37_79B9,
        }
    }

    pub fn set_command(&mut self, command: ActuatorCommand) {
        self.command = command;
    }

    /// Integrate the motion over `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        if !(dt > 0.0) {
            return;
        }
        let lag = 1.0 - (-dt / TIME_CONSTANT).exp();
        let pitch_target = (-self.command.pitch * RATE_GAIN).clamp(-MAX_RATE, MAX_RATE);
        let roll_target = (self.command.roll * RATE_GAIN).clamp(-MAX_RATE, MAX_RATE);
        self.rates.0 += (pitch_target - self.rates.0) * lag;
        self.rates.1 += (roll_target - self.rates.1) * lag;
        self.orientation.pitch_rad += self.rates.0 * dt;
        self.orientation.roll_rad += self.rates.1 * dt;
    }

    pub fn orientation(&self) -> OrientationSample {
        self.orientation
    }

    /// Raw reading of a noisy accelerometer and a biased gyro
    pub fn imu_sample(&mut self, dt: f32) -> ImuSample {
        let gravity = self.quaternion().gravity();
        let accel = gravity.map(|g| g * GRAVITY + self.next_noise() * ACCEL_NOISE);
        ImuSample {
            accel,
            gyro: [self.rates.1 + GYRO_BIAS[0], self.rates.0 + GYRO_BIAS[1], GYRO_BIAS[2]],
            dt,
        }
    }

    pub fn quaternion(&self) -> QuaternionPacket {
        QuaternionPacket::from_pitch_roll(self.orientation.pitch_rad, self.orientation.roll_rad)
    }

    /// Uniform value in [-1, 1)
    fn next_noise(&mut self) -> f32 {
        self.noise ^= self.noise << 13;
        self.noise ^= self.noise >> 17;
        self.noise ^= self.noise << 5;
        (self.noise as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

struct Simulation {
    plant: Plant,
    last: Instant,
}

/// Real time handle on a shared [`Plant`]
///
/// Clones drive the same platform: one is handed to the sensor task, one to the
/// control loop.
#[derive(Clone)]
pub struct SimulatedGimbal {
    simulation: Arc<Mutex<Simulation>>,
    sample_period: Duration,
}

impl SimulatedGimbal {
    pub fn new(initial: OrientationSample, sample_period: Duration) -> Self {
        log::info!(
            "Simulated gimbal at pitch {:.1}° roll {:.1}°",
            initial.pitch_rad.to_degrees(),
            initial.roll_rad.to_degrees()
        );
        Self {
            simulation: Arc::new(Mutex::new(Simulation {
                plant: Plant::new(initial),
                last: Instant::now(),
            })),
            sample_period,
        }
    }

    pub fn orientation(&self) -> OrientationSample {
        self.lock().plant.orientation()
    }

    fn lock(&self) -> MutexGuard<'_, Simulation> {
        self.simulation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait one sample period and bring the plant up to date, returns the elapsed time.
    fn tick(&self) -> (MutexGuard<'_, Simulation>, f32) {
        thread::sleep(self.sample_period);
        let mut simulation = self.lock();
        let now = Instant::now();
        let dt = now.duration_since(simulation.last).as_secs_f32();
        simulation.last = now;
        simulation.plant.advance(dt);
        (simulation, dt)
    }
}

impl SensorSource<ImuSample> for SimulatedGimbal {
    fn read(&mut self) -> Result<ImuSample> {
        let (mut simulation, dt) = self.tick();
        Ok(simulation.plant.imu_sample(dt))
    }
}

impl SensorSource<QuaternionPacket> for SimulatedGimbal {
    fn read(&mut self) -> Result<QuaternionPacket> {
        let (simulation, _) = self.tick();
        Ok(simulation.plant.quaternion())
    }
}

impl Actuator for SimulatedGimbal {
    fn apply(&mut self, command: ActuatorCommand) -> Result<()> {
        self.lock().plant.set_command(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tilt_from_gravity;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_pitch_motor_is_reversed() {
        let mut plant = Plant::new(OrientationSample::default());
        plant.set_command(ActuatorCommand {
            pitch: 1.0,
            roll: 1.0,
        });
        for _ in 0..1000 {
            plant.advance(0.001);
        }
        let orientation = plant.orientation();
        assert!(orientation.pitch_rad < -0.5);
        assert!(orientation.roll_rad > 0.5);
        assert_abs_diff_eq!(orientation.pitch_rad, -orientation.roll_rad, epsilon = 1e-6);
    }

    #[test]
    fn test_accelerometer_sees_the_tilt() {
        let mut plant = Plant::new(OrientationSample::from_degrees(10.0, -25.0));
        let sample = plant.imu_sample(0.005);
        let (pitch, roll) = tilt_from_gravity(&sample.accel);
        assert_abs_diff_eq!(pitch.to_degrees(), 10.0, epsilon = 1.0);
        assert_abs_diff_eq!(roll.to_degrees(), -25.0, epsilon = 1.0);
        assert_eq!(sample.gyro, GYRO_BIAS);
    }

    #[test]
    fn test_simulated_gimbal_paces_reads() {
        let mut gimbal = SimulatedGimbal::new(OrientationSample::default(), Duration::from_millis(2));
        let start = Instant::now();
        for _ in 0..5 {
            let sample: ImuSample = gimbal.read().unwrap();
            assert!(sample.dt > 0.0);
        }
        assert!(start.elapsed() >= Duration::from_millis(10));
        let packet: QuaternionPacket = gimbal.read().unwrap();
        assert_abs_diff_eq!(packet.magnitude_squared(), 1.0, epsilon = 1e-5);
    }
}
