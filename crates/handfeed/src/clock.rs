//! Display-rate scheduling and cooperative cancellation.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Paces a loop to the display's frame rate.
pub trait FrameClock {
    /// Blocks until the next frame should be processed.
    fn wait_next_frame(&mut self);
}

impl<C: FrameClock + ?Sized> FrameClock for &mut C {
    fn wait_next_frame(&mut self) {
        (**self).wait_next_frame()
    }
}

/// A [`FrameClock`] ticking at a fixed rate.
///
/// Deadlines are kept on a fixed grid, so sleep overshoot does not accumulate. If a frame runs
/// late, the missed deadlines are skipped rather than made up with a burst of frames.
pub struct IntervalClock {
    interval: Duration,
    next: Instant,
}

impl IntervalClock {
    /// Creates a clock ticking `hz` times per second. The first tick happens immediately.
    ///
    /// # Panics
    ///
    /// Panics if `hz` is 0.
    pub fn from_hz(hz: u32) -> Self {
        assert!(hz > 0, "frame rate must be greater than 0");
        Self::new(Duration::from_secs(1) / hz)
    }

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FrameClock for IntervalClock {
    fn wait_next_frame(&mut self) {
        let now = Instant::now();
        match self.next.checked_duration_since(now) {
            Some(wait) => {
                thread::sleep(wait);
                self.next += self.interval;
            }
            None => {
                let behind = now - self.next;
                if behind > self.interval {
                    log::trace!("frame clock running {:?} behind, skipping frames", behind);
                    self.next = now + self.interval;
                } else {
                    self.next += self.interval;
                }
            }
        }
    }
}

/// A flag that asks a running loop to stop after its current iteration.
///
/// Clones share the same flag. Cancellation cannot be undone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
