pub mod actuator;
pub mod config;
pub mod controller;
pub mod estimator;
pub mod log;
pub mod mock;
pub mod pid;
pub mod polling;
pub mod publisher;
pub mod ramp;
pub mod remote;
pub mod sensor;
pub mod shared;
pub mod telemetry;
pub mod types;
