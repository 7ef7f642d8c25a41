use crate::config::{DerivativeSource, PidConfig};

/// Force errors strictly smaller than `threshold` to zero.
pub fn apply_deadzone(error: f32, threshold: f32) -> f32 {
    if error.abs() < threshold {
        0.0
    } else {
        error
    }
}

/// PID controller with clamped integrator and low pass filtered derivative
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pid {
    config: PidConfig,
    integrator: f32,
    /// Previous error or measurement, depending on the derivative source
    previous: f32,
    filtered_derivative: f32,
}

impl Pid {
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            integrator: 0.0,
            previous: 0.0,
            filtered_derivative: 0.0,
        }
    }

    /// Seed the derivative history so the first cycle has no derivative spike.
    pub fn seed(&mut self, error: f32, measurement: f32) {
        self.previous = match self.config.derivative {
            DerivativeSource::Error => error,
            DerivativeSource::Measurement => measurement,
        };
    }

    /// Controller output for `error` and `measurement` after `dt` seconds.
    ///
    /// A non positive `dt` returns 0 and leaves the controller untouched.
    pub fn compute(&mut self, error: f32, measurement: f32, dt: f32) -> f32 {
        if !(dt > 0.0) {
            return 0.0;
        }
        let config = &self.config;

        let p = config.kp * error;

        self.integrator = (self.integrator + error * dt).clamp(config.integrator_min, config.integrator_max);
        let i = config.ki * self.integrator;

        let (raw, current) = match config.derivative {
            DerivativeSource::Error => ((error - self.previous) / dt, error),
            DerivativeSource::Measurement => (-(measurement - self.previous) / dt, measurement),
        };
        self.filtered_derivative =
            config.derivative_alpha * raw + (1.0 - config.derivative_alpha) * self.filtered_derivative;
        let d = config.kd * self.filtered_derivative;

        self.previous = current;
        p + i + d
    }

    pub fn integrator(&self) -> f32 {
        self.integrator
    }

    pub fn filtered_derivative(&self) -> f32 {
        self.filtered_derivative
    }
}
