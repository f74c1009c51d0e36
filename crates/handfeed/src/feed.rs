//! Wiring a webcam and a hand landmarker into a running frame pump.

use crate::{
    clock::{CancellationToken, IntervalClock},
    config::FeedConfig,
    detector::HandLandmarker,
    handle::DetectorHandle,
    published::Published,
    pump::FramePump,
    video::webcam::WebcamFeed,
};

/// A webcam-driven hand landmark feed.
///
/// [`HandFeed::start`] begins loading the model and opens the camera; [`HandFeed::run`] pumps
/// frames on the calling thread until the feed's [`CancellationToken`] is cancelled. Results are
/// read through [`Published`] handles, from any thread.
pub struct HandFeed {
    pump: FramePump<WebcamFeed, HandLandmarker>,
    token: CancellationToken,
    display_hz: u32,
}

impl HandFeed {
    /// Starts constructing the detector in the background and opens the camera.
    ///
    /// Neither failure is fatal: a detector that fails to load is logged and never used, and a
    /// camera that cannot be opened is logged and leaves the feed idle.
    pub fn start(config: FeedConfig) -> Self {
        let options = config.detector.clone();
        let detector = DetectorHandle::spawn("hand landmarker", move || {
            HandLandmarker::from_options(&options)
        });

        let camera = match WebcamFeed::open(&config.camera) {
            Ok(camera) => Some(camera),
            Err(e) => {
                log::warn!("camera unavailable, hand detection will not start: {e:#}");
                None
            }
        };

        Self {
            pump: FramePump::new(camera, detector, Published::new()),
            token: CancellationToken::new(),
            display_hz: config.display_hz,
        }
    }

    /// Returns a handle to the published detection state.
    pub fn published(&self) -> Published {
        self.pump.published().clone()
    }

    /// Returns the token that stops [`HandFeed::run`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Pumps frames at the configured display rate until cancelled.
    pub fn run(&mut self) {
        let clock = IntervalClock::from_hz(self.display_hz.max(1));
        self.pump.run(clock, &self.token);
    }
}
