//! The frame pump: runs the detector on every new video frame.
//!
//! Each tick samples the video source once. A tick whose frame has the same playback time as the
//! previous tick's frame is a stall, and does not run the detector. Ticks never overlap: a tick
//! (including detection) finishes before the next one is scheduled.

use std::time::Instant;

use crate::{
    clock::{CancellationToken, FrameClock},
    detector::{HandDetector, RunningMode},
    handle::DetectorHandle,
    published::Published,
    timer::{FpsCounter, Timer},
    video::VideoSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// No video frame has been seen yet.
    Idle,
    /// The video stream is attached and being pumped.
    Running,
}

/// What a single [`FramePump::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// There is no video, or it has not decoded its first frame yet.
    Idle,
    /// The detector is still being constructed, or failed to construct.
    DetectorNotReady,
    /// The video has not advanced since the last detection.
    Stalled,
    /// Detection ran and its result, containing this many hands, was published.
    Detected(usize),
    /// Detection failed on this frame. Nothing was published.
    Failed,
}

/// Drives a [`DetectorHandle`] with frames from a [`VideoSource`] and publishes the results.
pub struct FramePump<V, D: Send + 'static> {
    source: Option<V>,
    detector: DetectorHandle<D>,
    published: Published,
    state: PumpState,
    video_mode: bool,
    last_video_time: Option<f64>,
    last_timestamp_ms: Option<u64>,
    epoch: Instant,
    t_detect: Timer,
    fps: FpsCounter,
}

impl<V: VideoSource, D: HandDetector + Send + 'static> FramePump<V, D> {
    /// Creates a pump in the [`PumpState::Idle`] state.
    ///
    /// `source` is `None` when the camera could not be opened; such a pump stays idle forever.
    pub fn new(source: Option<V>, detector: DetectorHandle<D>, published: Published) -> Self {
        Self {
            source,
            detector,
            published,
            state: PumpState::Idle,
            video_mode: false,
            last_video_time: None,
            last_timestamp_ms: None,
            epoch: Instant::now(),
            t_detect: Timer::new("detect"),
            fps: FpsCounter::new("frame pump"),
        }
    }

    #[inline]
    pub fn state(&self) -> PumpState {
        self.state
    }

    /// Returns the state this pump publishes into.
    #[inline]
    pub fn published(&self) -> &Published {
        &self.published
    }

    pub fn detector_mut(&mut self) -> &mut DetectorHandle<D> {
        &mut self.detector
    }

    /// Performs one iteration of the pump.
    pub fn tick(&mut self) -> TickOutcome {
        let Some(source) = &self.source else {
            return TickOutcome::Idle;
        };
        let Some(frame) = source.current_frame() else {
            return match self.state {
                PumpState::Idle => TickOutcome::Idle,
                PumpState::Running => TickOutcome::Stalled,
            };
        };

        if self.state == PumpState::Idle {
            log::info!("first video frame received ({})", frame.resolution());
            self.state = PumpState::Running;
            self.published.set_camera_running(true);
        }
        self.published.set_video_resolution(frame.resolution());

        if !self.detector.is_ready() {
            return TickOutcome::DetectorNotReady;
        }

        if self.last_video_time == Some(frame.time()) {
            log::trace!("video stalled at {:.3}s", frame.time());
            return TickOutcome::Stalled;
        }
        self.last_video_time = Some(frame.time());

        if !self.video_mode {
            if let Err(e) = self.detector.set_running_mode(RunningMode::Video) {
                log::warn!("failed to switch detector to video mode: {e:#}");
                return TickOutcome::Failed;
            }
            self.video_mode = true;
        }

        let timestamp_ms = self.next_timestamp_ms();
        let result = self
            .t_detect
            .time(|| self.detector.detect(&frame, timestamp_ms));
        self.fps.tick_with(&[&self.t_detect]);

        match result {
            Ok(result) => {
                let hands = result.len();
                log::trace!("frame at {:.3}s: {hands} hand(s)", frame.time());
                self.published.publish_result(result, frame.time());
                TickOutcome::Detected(hands)
            }
            Err(e) => {
                log::warn!("detection failed on frame at {:.3}s: {e:#}", frame.time());
                TickOutcome::Failed
            }
        }
    }

    /// Returns a strictly increasing timestamp, in milliseconds since the pump was created.
    fn next_timestamp_ms(&mut self) -> u64 {
        let now = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        let ts = match self.last_timestamp_ms {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last_timestamp_ms = Some(ts);
        ts
    }

    /// Ticks once per frame of `clock` until `token` is cancelled.
    ///
    /// Cancellation is checked between ticks; a detection in progress is never interrupted. When
    /// this returns, the pump is [`PumpState::Idle`] and the camera is marked as not running.
    pub fn run<C: FrameClock>(&mut self, mut clock: C, token: &CancellationToken) {
        log::debug!("frame pump started");
        while !token.is_cancelled() {
            clock.wait_next_frame();
            if token.is_cancelled() {
                break;
            }
            self.tick();
        }

        self.state = PumpState::Idle;
        self.published.set_camera_running(false);
        log::debug!("frame pump stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{gated_detector, hand_for_call, MockDetector, ScriptedVideo};

    fn pump(video: ScriptedVideo, detector: MockDetector) -> FramePump<ScriptedVideo, MockDetector> {
        FramePump::new(
            Some(video),
            DetectorHandle::ready("mock", detector),
            Published::new(),
        )
    }

    fn calls(pump: &mut FramePump<ScriptedVideo, MockDetector>) -> usize {
        pump.detector_mut().detector().unwrap().calls()
    }

    #[test]
    fn idle_until_first_frame() {
        let mut pump = pump(
            ScriptedVideo::new([None, None, Some(0.0)]),
            MockDetector::new(),
        );
        assert_eq!(pump.tick(), TickOutcome::Idle);
        assert_eq!(pump.tick(), TickOutcome::Idle);
        assert_eq!(pump.state(), PumpState::Idle);
        assert!(!pump.published().is_camera_running());

        assert_eq!(pump.tick(), TickOutcome::Detected(1));
        assert_eq!(pump.state(), PumpState::Running);
        assert!(pump.published().is_camera_running());
        assert_eq!(
            pump.published().video_resolution(),
            Some(crate::resolution::Resolution::new(4, 3))
        );
    }

    #[test]
    fn switches_detector_to_video_mode() {
        let mut pump = pump(ScriptedVideo::from_times(&[0.0]), MockDetector::new());
        pump.tick();
        let detector = pump.detector_mut().detector().unwrap();
        assert_eq!(detector.running_mode(), RunningMode::Video);
    }

    #[test]
    fn stalled_frames_are_skipped() {
        let mut pump = pump(
            ScriptedVideo::from_times(&[0.0, 0.0, 0.033, 0.033, 0.066]),
            MockDetector::new(),
        );
        let outcomes = (0..5).map(|_| pump.tick()).collect::<Vec<_>>();
        assert_eq!(
            outcomes,
            [
                TickOutcome::Detected(1),
                TickOutcome::Stalled,
                TickOutcome::Detected(1),
                TickOutcome::Stalled,
                TickOutcome::Detected(1),
            ]
        );
        assert_eq!(calls(&mut pump), 3);
        assert_eq!(pump.published().landmarks().hands(), &[hand_for_call(3)]);
    }

    #[test]
    fn stalled_tick_changes_nothing() {
        let mut pump = pump(
            ScriptedVideo::from_times(&[0.5, 0.5, 0.5]),
            MockDetector::new(),
        );
        assert_eq!(pump.tick(), TickOutcome::Detected(1));
        let before = pump.published().snapshot();
        assert_eq!(before.result_time, Some(0.5));

        assert_eq!(pump.tick(), TickOutcome::Stalled);
        assert_eq!(pump.tick(), TickOutcome::Stalled);
        assert_eq!(pump.published().snapshot(), before);
        assert_eq!(calls(&mut pump), 1);
    }

    #[test]
    fn result_time_follows_detected_frames() {
        let mut pump = pump(
            ScriptedVideo::from_times(&[0.0, 0.04, 0.04, 0.08]),
            MockDetector::new(),
        );
        let times = (0..4)
            .map(|_| {
                pump.tick();
                pump.published().result_time()
            })
            .collect::<Vec<_>>();
        assert_eq!(times, [Some(0.0), Some(0.04), Some(0.04), Some(0.08)]);
    }

    #[test]
    fn frame_seen_while_not_ready_is_detected_later() {
        let (detector, release) = gated_detector();
        let mut pump = FramePump::new(
            Some(ScriptedVideo::from_times(&[0.25])),
            detector,
            Published::new(),
        );
        assert_eq!(pump.tick(), TickOutcome::DetectorNotReady);
        assert_eq!(pump.tick(), TickOutcome::DetectorNotReady);
        assert!(pump.published().is_camera_running());
        assert!(!pump.published().is_detecting());

        release.fulfill(());
        assert!(pump.detector_mut().wait());

        // Still the same frame at 0.25s.
        assert_eq!(pump.tick(), TickOutcome::Detected(1));
        assert_eq!(pump.published().result_time(), Some(0.25));
        assert_eq!(pump.tick(), TickOutcome::Stalled);
        assert_eq!(calls(&mut pump), 1);
    }

    #[test]
    fn timestamps_strictly_increase() {
        let times = (0..20).map(|i| i as f64).collect::<Vec<_>>();
        let mut pump = pump(ScriptedVideo::from_times(&times), MockDetector::new());
        for _ in 0..20 {
            pump.tick();
        }
        let detector = pump.detector_mut().detector().unwrap();
        assert_eq!(detector.calls(), 20);
        assert!(detector.timestamps().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn failed_frame_keeps_previous_result() {
        let mut pump = pump(
            ScriptedVideo::from_times(&[0.0, 1.0, 1.0, 2.0]),
            MockDetector::new().failing_on(2),
        );
        assert_eq!(pump.tick(), TickOutcome::Detected(1));
        assert_eq!(pump.tick(), TickOutcome::Failed);
        assert_eq!(pump.published().landmarks().hands(), &[hand_for_call(1)]);
        // The failed frame is not retried.
        assert_eq!(pump.tick(), TickOutcome::Stalled);
        assert_eq!(pump.tick(), TickOutcome::Detected(1));
        assert_eq!(pump.published().landmarks().hands(), &[hand_for_call(3)]);
    }

    #[test]
    fn empty_results_clear_landmarks() {
        let mut pump = pump(
            ScriptedVideo::from_times(&[0.0]),
            MockDetector::new().finding_nothing(),
        );
        assert_eq!(pump.tick(), TickOutcome::Detected(0));
        assert!(pump.published().landmarks().is_empty());
        assert!(pump.published().is_detecting());
    }

    #[test]
    fn no_video_stays_idle() {
        let mut pump: FramePump<ScriptedVideo, _> = FramePump::new(
            None,
            DetectorHandle::ready("mock", MockDetector::new()),
            Published::new(),
        );
        for _ in 0..10 {
            assert_eq!(pump.tick(), TickOutcome::Idle);
        }
        assert_eq!(calls(&mut pump), 0);
        assert!(!pump.published().is_camera_running());
        assert!(pump.published().landmarks().is_empty());
    }

    struct CancelAfter {
        ticks: usize,
        token: CancellationToken,
    }

    impl FrameClock for CancelAfter {
        fn wait_next_frame(&mut self) {
            if self.ticks == 0 {
                self.token.cancel();
            } else {
                self.ticks -= 1;
            }
        }
    }

    #[test]
    fn run_stops_when_cancelled() {
        let times = (0..10).map(|i| i as f64).collect::<Vec<_>>();
        let mut pump = pump(ScriptedVideo::from_times(&times), MockDetector::new());
        let token = CancellationToken::new();
        let clock = CancelAfter {
            ticks: 4,
            token: token.clone(),
        };
        pump.run(clock, &token);

        assert_eq!(calls(&mut pump), 4);
        assert_eq!(pump.state(), PumpState::Idle);
        assert!(!pump.published().is_camera_running());
        // The last result stays readable after stopping.
        assert_eq!(pump.published().landmarks().hands(), &[hand_for_call(4)]);
    }
}
