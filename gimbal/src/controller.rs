use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::actuator::{Actuator, MotorMapping};
use crate::config::GimbalParameters;
use crate::pid::{apply_deadzone, Pid};
use crate::ramp::RampLimiter;
use crate::shared::SharedState;
use crate::telemetry::TelemetryRingBuffer;
use crate::types::{ActuatorCommand, OrientationSample, Setpoint, TelemetrySample};

/// Fixed rate scheduler sleeping until absolute deadlines
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    deadline: Instant,
    overruns: u64,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: Instant::now(),
            overruns: 0,
        }
    }

    /// Sleep until the next deadline.
    ///
    /// A late cycle is counted. When more than a full period behind, the schedule
    /// restarts from now rather than running the missed cycles back to back.
    pub fn wait(&mut self) {
        self.deadline += self.period;
        let now = Instant::now();
        if self.deadline > now {
            thread::sleep(self.deadline - now);
        } else {
            self.overruns += 1;
            if now - self.deadline > self.period {
                self.deadline = now;
            }
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

/// Faults absorbed by the control loop
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct ControlStats {
    pub cycles: u64,
    /// Cycles run with the previous setpoint because its lock was busy
    pub stale_setpoints: u64,
    /// Cycles run with the previous measurement because its lock was busy
    pub stale_measurements: u64,
    /// Telemetry samples dropped on a full buffer
    pub telemetry_dropped: u64,
    pub actuator_faults: u64,
}

/// Setpoint ramp, PID and actuator output of both axes
pub struct ControlLoop<A> {
    params: GimbalParameters,
    shared: Arc<SharedState>,
    telemetry: Option<Arc<TelemetryRingBuffer>>,
    actuator: A,
    mapping: MotorMapping,
    pitch: Pid,
    roll: Pid,
    ramp: RampLimiter,
    setpoint: Setpoint,
    measurement: OrientationSample,
    stats: ControlStats,
}

impl<A: Actuator> ControlLoop<A> {
    /// Build the loop around the first available measurement.
    ///
    /// Ramp and derivative history start from `initial` so the first cycles see
    /// neither a large error nor a derivative spike.
    pub fn new(
        params: GimbalParameters,
        shared: Arc<SharedState>,
        telemetry: Option<Arc<TelemetryRingBuffer>>,
        actuator: A,
        initial: OrientationSample,
    ) -> Self {
        let mut pitch = Pid::new(params.pitch);
        let mut roll = Pid::new(params.roll);
        pitch.seed(0.0, initial.pitch_rad);
        roll.seed(0.0, initial.roll_rad);
        let setpoint = shared.setpoint.read().unwrap_or_default();

        Self {
            mapping: MotorMapping::new(&params.actuator),
            ramp: RampLimiter::new(params.control.ramp_step_rad, initial),
            params,
            shared,
            telemetry,
            actuator,
            pitch,
            roll,
            setpoint,
            measurement: initial,
            stats: ControlStats::default(),
        }
    }

    /// One control cycle
    #[cfg_attr(feature = "profiling", function_timer::time("control"))]
    pub fn step(&mut self) -> ActuatorCommand {
        let control = &self.params.control;
        self.stats.cycles += 1;

        match self.shared.setpoint.read() {
            Some(setpoint) => self.setpoint = setpoint,
            None => self.stats.stale_setpoints += 1,
        }
        let (pitch_target, roll_target) = self.setpoint.to_radians_clamped(control.max_angle_rad());

        match self.shared.orientation.read() {
            Some(measurement) => self.measurement = measurement,
            None => self.stats.stale_measurements += 1,
        }
        let measurement = self.measurement;

        let (pitch_ramp, roll_ramp) = self.ramp.advance(pitch_target, roll_target);

        let pitch_error = apply_deadzone(pitch_ramp - measurement.pitch_rad, control.deadzone_rad);
        let roll_error = apply_deadzone(roll_ramp - measurement.roll_rad, control.deadzone_rad);

        let dt = control.dt();
        let pitch_output = self.pitch.compute(pitch_error, measurement.pitch_rad, dt);
        let roll_output = self.roll.compute(roll_error, measurement.roll_rad, dt);

        let command = self.mapping.command(pitch_output, roll_output);
        if let Err(e) = self.actuator.apply(command) {
            self.stats.actuator_faults += 1;
            if self.stats.actuator_faults == 1 {
                log::error!("Actuator rejected command: {:#}", e);
            }
        }

        if self.stats.cycles % u64::from(control.telemetry_divider) == 0 {
            if let Some(telemetry) = &self.telemetry {
                if !telemetry.try_push(TelemetrySample::from(measurement)) {
                    self.stats.telemetry_dropped += 1;
                }
            }
        }

        if self.stats.cycles % control.stats_interval == 0 {
            log::info!("{:?}", self.stats);
        }

        command
    }

    /// Run one cycle per control period, forever.
    pub fn run(&mut self) {
        let mut ticker = Ticker::new(self.params.control.period());
        let mut reported = 0;
        loop {
            ticker.wait();
            self.step();
            if ticker.overruns() > reported && self.stats.cycles % self.params.control.stats_interval == 0 {
                log::warn!("Control loop missed {} deadlines", ticker.overruns());
                reported = ticker.overruns();
            }
        }
    }

    /// Current ramped `(pitch, roll)` setpoint in radian
    pub fn ramp(&self) -> (f32, f32) {
        self.ramp.current()
    }

    pub fn stats(&self) -> ControlStats {
        self.stats
    }

    pub fn pitch_pid(&self) -> &Pid {
        &self.pitch
    }

    pub fn roll_pid(&self) -> &Pid {
        &self.roll
    }
}

/// Control task: wait for the sensors then stabilize for the process lifetime.
///
/// Returns only on an initialization fault.
pub fn control_task<A: Actuator>(
    params: GimbalParameters,
    shared: Arc<SharedState>,
    telemetry: Option<Arc<TelemetryRingBuffer>>,
    actuator: A,
    sensor_ready: Receiver<()>,
) -> Result<()> {
    sensor_ready.recv().context("Sensor task stopped before being ready")?;
    thread::sleep(params.control.start_delay());

    let initial = shared
        .orientation
        .read_within(Duration::from_secs(1))
        .context("Cannot read the first measurement")?;
    log::info!(
        "Control loop starting at pitch {:.2}° roll {:.2}°",
        initial.pitch_rad.to_degrees(),
        initial.roll_rad.to_degrees()
    );

    ControlLoop::new(params, shared, telemetry, actuator, initial).run();
    Ok(())
}
