use anyhow::Result;

use crate::config::ActuatorParameters;
use crate::types::ActuatorCommand;

/// Motor driver receiving the per axis effort
pub trait Actuator {
    fn apply(&mut self, command: ActuatorCommand) -> Result<()>;
}

/// Maps the controller outputs onto the motors
///
/// Applies the mounting sign of each motor and keeps the effort within the driver limit.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MotorMapping {
    pitch_sign: f32,
    roll_sign: f32,
    limit: f32,
}

impl MotorMapping {
    pub fn new(params: &ActuatorParameters) -> Self {
        Self {
            pitch_sign: params.pitch_sign.signum(),
            roll_sign: params.roll_sign.signum(),
            limit: params.effort_limit.abs(),
        }
    }

    pub fn command(&self, pitch_output: f32, roll_output: f32) -> ActuatorCommand {
        ActuatorCommand {
            pitch: (self.pitch_sign * pitch_output).clamp(-self.limit, self.limit),
            roll: (self.roll_sign * roll_output).clamp(-self.limit, self.limit),
        }
    }
}

/// Actuator discarding every command
#[derive(Default, Copy, Clone, Debug)]
pub struct NullActuator;

impl Actuator for NullActuator {
    fn apply(&mut self, _: ActuatorCommand) -> Result<()> {
        Ok(())
    }
}
