use gimbal::actuator::Actuator;
use gimbal::config::{KalmanConfig, QuaternionConfig};
use gimbal::estimator::{KalmanEstimator, OrientationEstimator, QuaternionEstimator};
use gimbal::mock::SimulatedGimbal;
use gimbal::sensor::SensorSource;
use gimbal::types::{ActuatorCommand, ImuSample, OrientationSample, QuaternionPacket};

use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use mio::{unix::SourceFd, Events, Interest, Poll, Token};

const STDIN: Token = Token(0);

fn main() {
    let mut gimbal = SimulatedGimbal::new(OrientationSample::from_degrees(5.0, -3.0), Duration::from_millis(5));

    let mut kalman = KalmanEstimator::new(KalmanConfig::default());
    let calibration: Vec<ImuSample> = (0..100).map(|_| gimbal.read().unwrap()).collect();
    kalman.initialize(&calibration).expect("Cannot calibrate");

    let mut dmp = QuaternionEstimator::new(QuaternionConfig::default());
    let packet: QuaternionPacket = gimbal.read().unwrap();
    dmp.initialize(&[packet]).expect("Cannot initialize");

    // Slow sweep on both axes, reversed every 2 seconds
    let mut sweep = ActuatorCommand {
        pitch: -0.2,
        roll: 0.1,
    };

    let mut poll = Poll::new().expect("Could not create poll");
    let mut events = Events::with_capacity(4);
    poll.registry()
        .register(&mut SourceFd(&std::io::stdin().as_raw_fd()), STDIN, Interest::READABLE)
        .expect("Cannot register stdin event in epoll");

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    writeln!(&mut stdout, "Type enter to exit").unwrap();
    writeln!(&mut stdout, "  truth         | kalman        | dmp").unwrap();

    for cycle in 0.. {
        if cycle % 200 == 0 {
            sweep.pitch = -sweep.pitch;
            sweep.roll = -sweep.roll;
            gimbal.apply(sweep).unwrap();
        }
        poll.poll(&mut events, Some(Duration::ZERO)).expect("could not poll stdin");
        if !events.is_empty() {
            break;
        }

        let sample: ImuSample = gimbal.read().unwrap();
        let packet: QuaternionPacket = gimbal.read().unwrap();
        let filtered = kalman.update(&sample).unwrap_or_else(|| kalman.orientation());
        let fused = dmp.update(&packet).unwrap_or_else(|| dmp.orientation());
        let truth = gimbal.orientation();
        write!(
            &mut stdout,
            "\r{:>6.1} {:>6.1} | {:>6.1} {:>6.1} | {:>6.1} {:>6.1} ",
            truth.pitch_rad.to_degrees(),
            truth.roll_rad.to_degrees(),
            filtered.pitch_rad.to_degrees(),
            filtered.roll_rad.to_degrees(),
            fused.pitch_rad.to_degrees(),
            fused.roll_rad.to_degrees(),
        )
        .unwrap();
        stdout.flush().unwrap();
    }
}
