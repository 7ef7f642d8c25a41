use crate::types::OrientationSample;

/// Move `current` toward `target` by at most `max_step`, landing exactly on `target`.
pub fn step_toward(current: f32, target: f32, max_step: f32) -> f32 {
    let remaining = target - current;
    if remaining.abs() <= max_step {
        target
    } else {
        current + max_step.copysign(remaining)
    }
}

/// Slew rate limiter of the pitch and roll setpoints
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RampLimiter {
    max_step: f32,
    pitch: f32,
    roll: f32,
}

impl RampLimiter {
    /// Start from the current orientation so the first cycles have no error.
    pub fn new(max_step: f32, start: OrientationSample) -> Self {
        Self {
            max_step,
            pitch: start.pitch_rad,
            roll: start.roll_rad,
        }
    }

    /// Advance one cycle toward the targets, returns the ramped `(pitch, roll)`.
    pub fn advance(&mut self, pitch_target: f32, roll_target: f32) -> (f32, f32) {
        self.pitch = step_toward(self.pitch, pitch_target, self.max_step);
        self.roll = step_toward(self.roll, roll_target, self.max_step);
        (self.pitch, self.roll)
    }

    pub fn current(&self) -> (f32, f32) {
        (self.pitch, self.roll)
    }
}
