//! State exchanged between the tasks
//!
//! Each value lives in its own [`SharedCell`]: a mutex only ever held for a copy,
//! acquired with a bounded wait so the control loop can fall back to the previous
//! value instead of blocking on a contended lock.

use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crate::types::{OrientationSample, Setpoint};

/// Pause between two attempts on a busy lock
const BACKOFF: Duration = Duration::from_micros(20);

/// Copy value protected by a bounded wait lock
#[derive(Debug)]
pub struct SharedCell<T> {
    value: Mutex<T>,
    timeout: Duration,
}

impl<T: Copy> SharedCell<T> {
    pub fn new(value: T, timeout: Duration) -> Self {
        Self {
            value: Mutex::new(value),
            timeout,
        }
    }

    /// Copy of the value, `None` if the lock could not be taken in time.
    pub fn read(&self) -> Option<T> {
        self.read_within(self.timeout)
    }

    /// Replace the value, `false` if the lock could not be taken in time.
    pub fn write(&self, value: T) -> bool {
        self.write_within(value, self.timeout)
    }

    pub fn read_within(&self, timeout: Duration) -> Option<T> {
        self.lock_within(timeout).map(|guard| *guard)
    }

    pub fn write_within(&self, value: T, timeout: Duration) -> bool {
        match self.lock_within(timeout) {
            Some(mut guard) => {
                *guard = value;
                true
            },
            None => false,
        }
    }

    /// Read, modify and write back under a single critical section.
    pub fn update_within<F: FnOnce(&mut T)>(&self, timeout: Duration, update: F) -> Option<T> {
        self.lock_within(timeout).map(|mut guard| {
            update(&mut *guard);
            *guard
        })
    }

    fn lock_within(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.value.try_lock() {
                Ok(guard) => return Some(guard),
                // The value is a plain copy, it cannot be left half written
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    // Never spin, the holder may run at a lower priority on this core
                    thread::sleep(BACKOFF.min(deadline - now));
                },
            }
        }
    }
}

/// Cells shared between the command sources, the estimator and the control loop
#[derive(Debug)]
pub struct SharedState {
    /// Written by the command sources, read by the control loop
    pub setpoint: SharedCell<Setpoint>,
    /// Written by the estimator, read by the control loop and diagnostics
    pub orientation: SharedCell<OrientationSample>,
}

impl SharedState {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            setpoint: SharedCell::new(Setpoint::default(), lock_timeout),
            orientation: SharedCell::new(OrientationSample::default(), lock_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn test_read_write() {
        let state = SharedState::new(Duration::from_millis(1));
        assert_eq!(state.setpoint.read(), Some(Setpoint::default()));
        assert!(state.setpoint.write(Setpoint::new(20.0, -80.0)));
        assert_eq!(state.setpoint.read(), Some(Setpoint::new(20.0, -80.0)));
        // The cells are independent
        assert_eq!(state.orientation.read(), Some(OrientationSample::default()));
    }

    #[test]
    fn test_contended_lock_times_out() {
        let cell = SharedCell::new(1u32, Duration::from_millis(2));
        let held = Barrier::new(2);
        let done = Barrier::new(2);
        thread::scope(|s| {
            s.spawn(|| {
                cell.update_within(Duration::from_secs(1), |_| {
                    held.wait();
                    done.wait();
                });
            });
            held.wait();
            let start = Instant::now();
            assert_eq!(cell.read(), None);
            assert!(!cell.write(5));
            assert!(start.elapsed() >= Duration::from_millis(4));
            done.wait();
        });
        assert_eq!(cell.read(), Some(1));
    }

    #[test]
    fn test_waiter_gets_the_lock_once_released() {
        let cell = SharedCell::new(1u32, Duration::from_millis(500));
        let held = Barrier::new(2);
        thread::scope(|s| {
            s.spawn(|| {
                cell.update_within(Duration::from_secs(1), |value| {
                    held.wait();
                    thread::sleep(Duration::from_millis(5));
                    *value = 2;
                });
            });
            held.wait();
            let start = Instant::now();
            // The holder keeps running while we back off
            assert_eq!(cell.read(), Some(2));
            assert!(start.elapsed() < Duration::from_millis(500));
        });
    }

    #[test]
    fn test_concurrent_writers_never_tear() {
        let cell = SharedCell::new(OrientationSample::default(), Duration::from_millis(50));
        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..10_000 {
                    let angle = i as f32;
                    cell.write(OrientationSample {
                        pitch_rad: angle,
                        roll_rad: -angle,
                    });
                }
            });
            for _ in 0..10_000 {
                if let Some(sample) = cell.read() {
                    assert_eq!(sample.pitch_rad, -sample.roll_rad);
                }
            }
        });
    }

    #[test]
    fn test_update_toggles_in_place() {
        let cell = SharedCell::new(Setpoint::default(), Duration::from_millis(1));
        let toggled = cell.update_within(Duration::from_millis(1), |setpoint| setpoint.roll_deg = -80.0);
        assert_eq!(toggled, Some(Setpoint::new(0.0, -80.0)));
    }
}
