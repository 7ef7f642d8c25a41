//! Bounded blocking telemetry buffer
//!
//! Single producer (control loop) / single consumer (publisher) FIFO of
//! [`TelemetrySample`]. Two counting semaphores track the free and the filled
//! slots so each side sleeps on its own resource; a mutex only guards the
//! cursor and slot update.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{ensure, Result};

use crate::types::TelemetrySample;

/// Counting semaphore
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            available: Condvar::new(),
        }
    }

    /// Take one unit, waiting at most `timeout`. A zero timeout never sleeps.
    pub fn acquire(&self, timeout: Duration) -> bool {
        let count = self.lock();
        let (mut count, _) = self
            .available
            .wait_timeout_while(count, timeout, |count| *count == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Take one unit, waiting as long as needed.
    pub fn acquire_blocking(&self) {
        let count = self.lock();
        let mut count = self.available.wait_while(count, |count| *count == 0).unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
    }

    pub fn release(&self) {
        *self.lock() += 1;
        self.available.notify_one();
    }

    pub fn available(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct Slots {
    samples: Box<[TelemetrySample]>,
    write_index: usize,
    read_index: usize,
}

/// Fixed capacity circular FIFO with blocking push and pop
#[derive(Debug)]
pub struct TelemetryRingBuffer {
    slots: Mutex<Slots>,
    free: Semaphore,
    filled: Semaphore,
    capacity: usize,
}

impl TelemetryRingBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        ensure!(capacity > 0, "Telemetry buffer capacity must be greater than 0");
        log::info!("Telemetry buffer created, capacity {}", capacity);
        Ok(Self {
            slots: Mutex::new(Slots {
                samples: vec![TelemetrySample::default(); capacity].into_boxed_slice(),
                write_index: 0,
                read_index: 0,
            }),
            free: Semaphore::new(capacity),
            filled: Semaphore::new(0),
            capacity,
        })
    }

    /// Append a sample, waiting at most `timeout` for a free slot.
    ///
    /// Returns `false` when the buffer stayed full: the sample is dropped.
    pub fn push(&self, sample: TelemetrySample, timeout: Duration) -> bool {
        if !self.free.acquire(timeout) {
            return false;
        }
        {
            let mut slots = self.lock();
            let index = slots.write_index;
            slots.samples[index] = sample;
            slots.write_index = (index + 1) % self.capacity;
        }
        self.filled.release();
        true
    }

    /// Push without ever waiting
    pub fn try_push(&self, sample: TelemetrySample) -> bool {
        self.push(sample, Duration::ZERO)
    }

    /// Oldest sample, waiting at most `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<TelemetrySample> {
        if !self.filled.acquire(timeout) {
            return None;
        }
        Some(self.take())
    }

    /// Oldest sample, sleeping until one arrives.
    pub fn pop_blocking(&self) -> TelemetrySample {
        self.filled.acquire_blocking();
        self.take()
    }

    fn take(&self) -> TelemetrySample {
        let sample = {
            let mut slots = self.lock();
            let index = slots.read_index;
            slots.read_index = (index + 1) % self.capacity;
            slots.samples[index]
        };
        self.free.release();
        sample
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of unread samples
    pub fn filled(&self) -> usize {
        self.filled.available()
    }

    /// Number of slots available to the producer
    pub fn free(&self) -> usize {
        self.free.available()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TelemetryRingBuffer {
    fn drop(&mut self) {
        log::info!("Telemetry buffer released, {} samples unread", self.filled());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn sample(i: usize) -> TelemetrySample {
        TelemetrySample {
            pitch_deg: i as f32,
            roll_deg: -(i as f32),
        }
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(TelemetryRingBuffer::new(0).is_err());
    }

    #[test]
    fn test_fifo_round_trip() {
        let buffer = TelemetryRingBuffer::new(8).unwrap();
        for k in [1, 5, 8] {
            for i in 0..k {
                assert!(buffer.try_push(sample(i)));
            }
            for i in 0..k {
                assert_eq!(buffer.pop(Duration::ZERO), Some(sample(i)));
            }
        }
    }

    #[test]
    fn test_full_and_empty_do_not_block() {
        let buffer = TelemetryRingBuffer::new(3).unwrap();
        let start = Instant::now();
        assert_eq!(buffer.pop(Duration::ZERO), None);
        for i in 0..3 {
            assert!(buffer.try_push(sample(i)));
        }
        assert!(!buffer.try_push(sample(3)));
        assert!(start.elapsed() < Duration::from_millis(100));

        // The dropped sample never shows up
        assert_eq!(buffer.pop(Duration::ZERO), Some(sample(0)));
        assert!(buffer.try_push(sample(4)));
        let drained: Vec<_> = std::iter::from_fn(|| buffer.pop(Duration::ZERO)).collect();
        assert_eq!(drained, vec![sample(1), sample(2), sample(4)]);
    }

    #[test]
    fn test_timeouts_are_honoured() {
        let buffer = TelemetryRingBuffer::new(1).unwrap();
        let start = Instant::now();
        assert_eq!(buffer.pop(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));

        assert!(buffer.try_push(sample(0)));
        let start = Instant::now();
        assert!(!buffer.push(sample(1), Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_capacity_invariant() {
        let buffer = TelemetryRingBuffer::new(4).unwrap();
        // Wraps the cursors several times with a mix of operations
        let pattern = [true, true, false, true, true, true, true, false, false, true, false, false, false, false, true];
        let mut pushed = 0;
        for _ in 0..5 {
            for &push in &pattern {
                if push {
                    if buffer.try_push(sample(pushed)) {
                        pushed += 1;
                    }
                } else {
                    buffer.pop(Duration::ZERO);
                }
                assert!(buffer.filled() <= buffer.capacity());
                assert_eq!(buffer.filled() + buffer.free(), buffer.capacity());
            }
        }
    }

    #[test]
    fn test_blocked_consumer_wakes_up_in_order() {
        let buffer = TelemetryRingBuffer::new(2).unwrap();
        let received = thread::scope(|s| {
            let consumer = s.spawn(|| (0..100).map(|_| buffer.pop_blocking()).collect::<Vec<_>>());
            for i in 0..100 {
                // Producer backs off on a full buffer
                while !buffer.push(sample(i), Duration::from_millis(10)) {}
            }
            consumer.join().unwrap()
        });
        assert_eq!(received, (0..100).map(sample).collect::<Vec<_>>());
        assert_eq!(buffer.free(), 2);
    }
}
