//! Profiling helpers for the frame pump and its collaborators.

use std::{
    fmt,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::filter::{
    ema::{Ema, EmaState},
    Filter,
};

const EMA_ALPHA: f32 = 0.3;

/// Measures how long an operation takes, smoothing the measurements with an EMA.
///
/// Displaying the timer with `{}` prints the smoothed duration and the number of samples since
/// the last time it was displayed, then starts a new measurement window.
pub struct Timer {
    name: &'static str,
    ema: Ema,
    state: Mutex<TimerState>,
}

#[derive(Default)]
struct TimerState {
    ema_state: EmaState,
    avg_secs: f32,
    samples: usize,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ema: Ema::new(EMA_ALPHA),
            state: Mutex::new(TimerState::default()),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs `f`, recording how long it took.
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        f()
    }

    /// Starts measuring; the measurement ends when the returned guard is dropped.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            timer: self,
        }
    }

    fn record(&self, elapsed: Duration) {
        let mut state = self.lock();
        let ema_state = &mut state.ema_state;
        let avg = self.ema.filter(ema_state, elapsed.as_secs_f32());
        state.avg_secs = avg;
        state.samples += 1;
    }

    /// Returns the number of samples in the current measurement window.
    pub fn samples(&self) -> usize {
        self.lock().samples
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerState> {
        // The state is plain data, a panic while holding the lock can't leave it inconsistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (avg_secs, samples) = {
            let mut state = self.lock();
            let window = (state.avg_secs, state.samples);
            state.avg_secs = 0.0;
            state.samples = 0;
            window
        };

        write!(f, "{}: {samples}x{:.01}ms", self.name, avg_secs * 1000.0)
    }
}

/// Guard returned by [`Timer::start`].
pub struct TimerGuard<'a> {
    start: Instant,
    timer: &'a Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.record(self.start.elapsed());
    }
}

/// Counts frames and logs the rate once per second.
pub struct FpsCounter {
    name: String,
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            window_start: Instant::now(),
        }
    }

    /// Counts a frame, logging the frame rate and `timers` if a second has passed.
    pub fn tick_with(&mut self, timers: &[&Timer]) {
        self.frames += 1;
        if self.window_start.elapsed() < Duration::from_secs(1) {
            return;
        }

        if timers.is_empty() {
            log::debug!("{}: {} FPS", self.name, self.frames);
        } else {
            let timers = timers
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            log::debug!("{}: {} FPS ({})", self.name, self.frames, timers);
        }

        self.frames = 0;
        self.window_start = Instant::now();
    }
}
