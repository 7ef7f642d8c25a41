//! Non blocking logger
//!
//! Records are formatted by the calling thread and handed over a bounded channel,
//! the main thread prints them. Records are dropped when the channel is full so a
//! real time task never waits on the terminal.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "profiling")]
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
#[cfg(feature = "profiling")]
use rstats::Stats;

const CHANNEL_CAPACITY: usize = 20;

struct SyncRecord {
    timestamp: Instant,
    level: Level,
    target: String,
    content: String,
}

pub struct LogSink {
    receiver: Receiver<SyncRecord>,
    #[cfg(feature = "profiling")]
    snapshotter: Snapshotter,
    start: Instant,
    #[cfg(feature = "profiling")]
    previous: Instant,
}

pub struct Logger {
    sender: SyncSender<SyncRecord>,
}

impl Logger {
    /// Install the global logger. Only the first call installs it.
    pub fn init() -> LogSink {
        let (sender, receiver) = sync_channel(CHANNEL_CAPACITY);
        let start = Instant::now();
        let logger = Box::new(Self {
            sender,
        });
        let _ = log::set_logger(Box::leak(logger)).map(|()| log::set_max_level(LevelFilter::Trace));

        #[cfg(feature = "profiling")]
        let snapshotter = {
            let recorder = DebuggingRecorder::new();
            let snapshotter = recorder.snapshotter();
            if recorder.install().is_err() {
                eprintln!("Cannot install global recorder, profiling disabled");
            }
            snapshotter
        };
        LogSink {
            receiver,
            #[cfg(feature = "profiling")]
            snapshotter,
            start,
            #[cfg(feature = "profiling")]
            previous: start,
        }
    }
}

impl Log for Logger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = self.sender.try_send(SyncRecord {
                timestamp: Instant::now(),
                level: record.level(),
                target: record.target().trim_start_matches("gimbal::").to_owned(),
                content: std::fmt::format(*record.args()),
            });
        }
    }

    fn flush(&self) {}
}

impl LogSink {
    /// Print pending records, never blocks.
    pub fn handle_logs(&mut self) {
        for record in self.receiver.try_iter() {
            println!(
                "[{:<9.5}] {:<5} {}: {}",
                record.timestamp.duration_since(self.start).as_secs_f32(),
                record.level,
                record.target,
                record.content
            );
        }
        #[cfg(feature = "profiling")]
        {
            let delta = self.previous.elapsed().as_secs_f32();
            if delta > 0.5 {
                let snapshot = self.snapshotter.snapshot();
                for (key, _, _, metric) in snapshot.into_vec().iter() {
                    if let DebugValue::Histogram(histogram) = metric {
                        let name = key.key().labels().next().map(|label| label.value().to_owned()).unwrap_or_default();
                        let max = histogram.iter().max().map(|x| x.into_inner()).unwrap_or(0.0);
                        let freq = histogram.len() as f32 / delta;
                        if let Ok(stats) = histogram.ameanstd() {
                            println!(
                                "[{:<9.5}] {:<5} {}: {:>6.2}Hz, max: {:>6.2e}s, mean {:>6.2e}s ± {:>4.2e}s",
                                self.start.elapsed().as_secs_f32(),
                                Level::Trace,
                                name,
                                freq,
                                max,
                                stats.centre,
                                stats.spread
                            );
                        }
                    }
                }
                self.previous = Instant::now();
            }
        }
    }
}
