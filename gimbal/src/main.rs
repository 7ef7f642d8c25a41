use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use thread_priority::{
    RealtimeThreadSchedulePolicy, ScheduleParams, ThreadBuilder, ThreadPriority, ThreadSchedulePolicy
};

use gimbal::config::GimbalParameters;
use gimbal::controller::control_task;
use gimbal::log::Logger;
use gimbal::mock::SimulatedGimbal;
use gimbal::publisher::{publisher_task, LogPublisher};
use gimbal::remote::{button_task, command_task};
use gimbal::sensor::SensorTask;
use gimbal::shared::SharedState;
use gimbal::telemetry::TelemetryRingBuffer;
use gimbal::types::OrientationSample;

#[cfg(not(feature = "dmp"))]
use gimbal::estimator::KalmanEstimator;
#[cfg(feature = "dmp")]
use gimbal::estimator::QuaternionEstimator;

const CONTROL_PRIORITY: u8 = 40;
const SENSOR_PRIORITY: u8 = 45;

fn realtime(name: &str, priority: u8) -> ThreadBuilder {
    ThreadBuilder::default()
        .name(name)
        .policy(ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo))
        .priority(ThreadPriority::from_posix(ScheduleParams {
            sched_priority: priority.into(),
        }))
}

/// Log the halt reason of a task
fn report(task: &str, result: Result<()>) {
    if let Err(e) = result {
        log::error!("{} task halted: {:#}", task, e);
    }
}

fn main() -> Result<()> {
    let mut log_sink = Logger::init();

    let params = match GimbalParameters::load() {
        Ok(params) => params,
        Err(e) => {
            log::warn!("Using default parameters: {:#}", e);
            GimbalParameters::default()
        },
    };

    if std::env::args().any(|arg| arg == "--save-config") {
        params.save()?;
        log::info!("Configuration written");
        log_sink.handle_logs();
        return Ok(());
    }

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, term.clone()).context("Registering SIGINT")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, term.clone()).context("Registering SIGTERM")?;

    let shared = Arc::new(SharedState::new(params.control.lock_timeout()));
    let telemetry = match TelemetryRingBuffer::new(params.telemetry.capacity) {
        Ok(buffer) => Some(Arc::new(buffer)),
        Err(e) => {
            log::error!("Running without telemetry: {:#}", e);
            None
        },
    };

    let gimbal = SimulatedGimbal::new(OrientationSample::from_degrees(5.0, -3.0), params.sensor.sample_period());
    let (ready_tx, ready_rx) = channel();

    #[cfg(not(feature = "dmp"))]
    let estimator = KalmanEstimator::new(params.kalman);
    #[cfg(feature = "dmp")]
    let estimator = QuaternionEstimator::new(params.quaternion);

    let mut sensor = SensorTask::new(params.sensor, estimator, gimbal.clone(), shared.clone());
    let sensor_stop = term.clone();
    realtime("sensor", SENSOR_PRIORITY)
        .spawn_careless(move || report("Sensor", sensor.run(ready_tx, &sensor_stop)))
        .context("Spawning sensor task")?;

    {
        let params = params.clone();
        let shared = shared.clone();
        let telemetry = telemetry.clone();
        realtime("control", CONTROL_PRIORITY)
            .spawn_careless(move || report("Control", control_task(params, shared, telemetry, gimbal, ready_rx)))
            .context("Spawning control task")?;
    }

    if let Some(telemetry) = telemetry {
        thread::Builder::new()
            .name("publisher".into())
            .spawn(move || report("Publisher", publisher_task(telemetry, LogPublisher::default())))
            .context("Spawning publisher task")?;
    }

    {
        let remote = params.remote;
        let shared = shared.clone();
        thread::Builder::new()
            .name("button".into())
            .spawn(move || report("Button", button_task(remote, shared)))
            .context("Spawning button task")?;
    }

    {
        let remote = params.remote;
        thread::Builder::new()
            .name("command".into())
            .spawn(move || report("Command", command_task(io::stdin().lock(), remote, shared)))
            .context("Spawning command task")?;
    }

    while !term.load(Ordering::Relaxed) {
        log_sink.handle_logs();
        thread::sleep(Duration::from_millis(10));
    }
    log::info!("Shutting down");
    log_sink.handle_logs();
    Ok(())
}
